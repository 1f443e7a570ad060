// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Dedicated encodings: enum constants, class literals and dynamic proxies.

use std::sync::Arc;

use obstream::{ClassSpec, Codec, Error, Instance, TypeRegistry, Value};

#[test]
fn enum_constants_round_trip_with_identity() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("color").enumeration(&["RED", "GREEN", "BLUE"]))
        .unwrap();
    let codec = Codec::new(registry.clone());

    let desc = registry.lookup("color").unwrap();
    let green = Value::Enum(desc.constant("GREEN").unwrap());

    let mut enc = codec.encoder();
    enc.write_object(&green).unwrap();
    enc.write_object(&green).unwrap();
    let bytes = enc.into_bytes();

    let mut dec = codec.decoder(&bytes).unwrap();
    let first = dec.read_object().unwrap();
    let second = dec.read_object().unwrap();
    let c1 = first.as_enum().unwrap();
    let c2 = second.as_enum().unwrap();
    assert_eq!(c1.name, "GREEN");
    assert_eq!(c1.ordinal, 1);
    assert_eq!(c1.class().name(), "color");
    // constants are interned: both reads yield the same constant
    assert!(Arc::ptr_eq(c1, c2));
    // and the local interned constant is the decoded one
    assert!(Arc::ptr_eq(c1, &desc.constant("GREEN").unwrap()));
}

#[test]
fn enum_in_object_field() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("color").enumeration(&["RED", "GREEN"]))
        .unwrap();
    registry
        .register(ClassSpec::new("pixel").field("c", "Lcolor;"))
        .unwrap();
    let codec = Codec::new(registry.clone());

    let pixel = Instance::new(&registry.lookup("pixel").unwrap());
    let red = registry.lookup("color").unwrap().constant("RED").unwrap();
    pixel.set("c", Value::Enum(red)).unwrap();

    let bytes = codec.encode(&Value::Object(pixel)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let c = back.as_object().unwrap().get("c").unwrap();
    assert_eq!(c.as_enum().unwrap().name, "RED");
}

#[test]
fn absent_enum_constant_is_invalid_object() {
    let writer_registry = Arc::new(TypeRegistry::new());
    writer_registry
        .register(
            ClassSpec::new("color")
                .version_id(1)
                .enumeration(&["RED", "GREEN", "TEAL"]),
        )
        .unwrap();
    let writer = Codec::new(writer_registry.clone());
    let teal = writer_registry.lookup("color").unwrap().constant("TEAL").unwrap();
    let bytes = writer.encode(&Value::Enum(teal)).unwrap();

    // reader's enum shares the version id but lacks the constant
    let reader_registry = Arc::new(TypeRegistry::new());
    reader_registry
        .register(
            ClassSpec::new("color")
                .version_id(1)
                .enumeration(&["RED", "GREEN"]),
        )
        .unwrap();
    let reader = Codec::new(reader_registry);
    let err = reader.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::InvalidObject(_)));
    assert!(err.to_string().contains("TEAL"));
}

#[test]
fn class_literals_round_trip() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("point").field("x", "I"))
        .unwrap();
    registry
        .register(ClassSpec::new("meta_holder").field("cls", "Lclass;"))
        .unwrap();
    let codec = Codec::new(registry.clone());

    let point_desc = registry.lookup("point").unwrap();
    let holder = Instance::new(&registry.lookup("meta_holder").unwrap());
    holder.set("cls", Value::Class(point_desc.clone())).unwrap();

    let bytes = codec.encode(&Value::Object(holder)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let cls = back.as_object().unwrap().get("cls").unwrap();
    let decoded = cls.as_class().unwrap();
    assert_eq!(decoded.name(), "point");
    // resolved through the registry, so it is the local descriptor itself
    assert!(Arc::ptr_eq(decoded, &point_desc));
}

#[test]
fn class_literal_shares_its_handle() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("point").field("x", "I"))
        .unwrap();
    let codec = Codec::new(registry.clone());
    let literal = Value::Class(registry.lookup("point").unwrap());

    let mut enc = codec.encoder();
    enc.write_object(&literal).unwrap();
    let once = enc.as_bytes().len();
    enc.write_object(&literal).unwrap();
    let twice = enc.as_bytes().len();
    // the second write is a 5-byte back-reference
    assert_eq!(twice - once, 5);

    let bytes = enc.into_bytes();
    let mut dec = codec.decoder(&bytes).unwrap();
    assert_eq!(dec.read_object().unwrap().as_class().unwrap().name(), "point");
    assert_eq!(dec.read_object().unwrap().as_class().unwrap().name(), "point");
}

fn proxy_registry() -> Arc<TypeRegistry> {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("handler_holder").field("h", "Lstring;"))
        .unwrap();
    registry
        .register(
            ClassSpec::new("billing_proxy")
                .proxy(&["api.billing", "api.audit"])
                .parent("handler_holder"),
        )
        .unwrap();
    registry
}

#[test]
fn proxy_instances_round_trip_by_interface_set() {
    let writer_registry = proxy_registry();
    let writer = Codec::new(writer_registry.clone());
    let proxy = Instance::new(&writer_registry.lookup("billing_proxy").unwrap());
    proxy.set("h", Value::str("invocation-handler")).unwrap();
    let bytes = writer.encode(&Value::Object(proxy)).unwrap();

    // the reader matches the proxy by its interface set, not by name
    let reader_registry = Arc::new(TypeRegistry::new());
    reader_registry
        .register(ClassSpec::new("handler_holder").field("h", "Lstring;"))
        .unwrap();
    reader_registry
        .register(
            ClassSpec::new("local_billing")
                .proxy(&["api.audit", "api.billing"])
                .parent("handler_holder"),
        )
        .unwrap();
    let reader = Codec::new(reader_registry);
    let back = reader.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap();
    assert!(obj.class().is_proxy());
    assert_eq!(obj.class().name(), "local_billing");
    assert_eq!(obj.get("h").unwrap(), Value::str("invocation-handler"));
}

#[test]
fn unknown_proxy_is_deferred_class_not_found() {
    let writer = Codec::new(proxy_registry());
    let proxy = Instance::new(&writer.registry().lookup("billing_proxy").unwrap());
    let mut enc = writer.encoder();
    enc.write_object(&Value::Object(proxy)).unwrap();
    enc.write_object(&Value::str("sibling")).unwrap();
    let bytes = enc.into_bytes();

    let reader_registry = Arc::new(TypeRegistry::new());
    reader_registry
        .register(ClassSpec::new("handler_holder").field("h", "Lstring;"))
        .unwrap();
    let reader = Codec::new(reader_registry);
    let mut dec = reader.decoder(&bytes).unwrap();
    let err = dec.read_object().unwrap_err();
    assert!(matches!(err, Error::ClassNotFound(_)));
    assert_eq!(dec.read_object().unwrap(), Value::str("sibling"));
}
