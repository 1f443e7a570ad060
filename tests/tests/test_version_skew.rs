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

//! Version skew between the writer's and reader's type definitions: same
//! version id tolerates added, removed and reordered fields; a differing id
//! fails naming both ids; unresolvable classes taint only their subgraph.

use std::sync::Arc;

use obstream::{ClassSpec, Codec, Error, Instance, TypeRegistry, Value};

fn writer_codec(spec: ClassSpec) -> Codec {
    let registry = Arc::new(TypeRegistry::new());
    registry.register(spec).unwrap();
    Codec::new(registry)
}

#[test]
fn added_and_removed_fields_with_same_version_id() {
    let writer = writer_codec(
        ClassSpec::new("rec")
            .version_id(100)
            .field("keep", "I")
            .field("dropped", "Lstring;"),
    );
    let inst = Instance::new(&writer.registry().lookup("rec").unwrap());
    inst.set("keep", Value::I32(11)).unwrap();
    inst.set("dropped", Value::str("gone at the reader")).unwrap();
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = writer_codec(
        ClassSpec::new("rec")
            .version_id(100)
            .field("keep", "I")
            .field("added", "J"),
    );
    let back = reader.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap();
    // shared field preserved, stream-only field discarded, local-only field
    // left at its default
    assert_eq!(obj.get("keep").unwrap(), Value::I32(11));
    assert_eq!(obj.get("added").unwrap(), Value::I64(0));
    assert!(obj.get("dropped").is_none());
}

#[test]
fn reordered_fields_match_by_name() {
    let writer = writer_codec(
        ClassSpec::new("rec")
            .version_id(7)
            .serial_fields(&[("b", "I"), ("a", "I")]),
    );
    let inst = Instance::new(&writer.registry().lookup("rec").unwrap());
    inst.set("a", Value::I32(1)).unwrap();
    inst.set("b", Value::I32(2)).unwrap();
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = writer_codec(
        ClassSpec::new("rec")
            .version_id(7)
            .serial_fields(&[("a", "I"), ("b", "I")]),
    );
    let back = reader.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap();
    assert_eq!(obj.get("a").unwrap(), Value::I32(1));
    assert_eq!(obj.get("b").unwrap(), Value::I32(2));
}

#[test]
fn version_id_mismatch_names_both_ids() {
    let writer = writer_codec(ClassSpec::new("rec").version_id(41).field("x", "I"));
    let inst = Instance::new(&writer.registry().lookup("rec").unwrap());
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = writer_codec(ClassSpec::new("rec").version_id(42).field("x", "I"));
    let err = reader.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::InvalidClass(_)));
    let msg = err.to_string();
    assert!(msg.contains("rec"), "{}", msg);
    assert!(msg.contains("41") && msg.contains("42"), "{}", msg);
}

#[test]
fn structural_version_ids_agree_between_identical_peers() {
    // no explicit id on either side: both derive the same structural digest
    let writer = writer_codec(ClassSpec::new("rec").field("x", "I").field("s", "Lstring;"));
    let inst = Instance::new(&writer.registry().lookup("rec").unwrap());
    inst.set("x", Value::I32(5)).unwrap();
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = writer_codec(ClassSpec::new("rec").field("s", "Lstring;").field("x", "I"));
    let back = reader.decode(&bytes).unwrap();
    assert_eq!(back.as_object().unwrap().get("x").unwrap(), Value::I32(5));
}

#[test]
fn same_name_type_conflict_is_invalid_class() {
    let writer = writer_codec(ClassSpec::new("rec").version_id(5).field("x", "I"));
    let inst = Instance::new(&writer.registry().lookup("rec").unwrap());
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = writer_codec(ClassSpec::new("rec").version_id(5).field("x", "J"));
    let err = reader.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::InvalidClass(_)));
    assert!(err.to_string().contains("`x`"));
}

#[test]
fn unresolvable_class_is_deferred_not_fatal() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("keeper").field("payload", "Lgone;"))
        .unwrap();
    registry
        .register(ClassSpec::new("gone").field("n", "I"))
        .unwrap();
    let writer = Codec::new(registry.clone());

    let gone = Instance::new(&registry.lookup("gone").unwrap());
    gone.set("n", Value::I32(3)).unwrap();
    let keeper = Instance::new(&registry.lookup("keeper").unwrap());
    keeper.set("payload", Value::Object(gone)).unwrap();

    let mut enc = writer.encoder();
    enc.write_object(&Value::Object(keeper)).unwrap();
    enc.write_object(&Value::str("sibling survives")).unwrap();
    let bytes = enc.into_bytes();

    // the reader knows `keeper` but not `gone`
    let reader_registry = Arc::new(TypeRegistry::new());
    reader_registry
        .register(ClassSpec::new("keeper").field("payload", "Lgone;"))
        .unwrap();
    let reader = Codec::new(reader_registry);

    let mut dec = reader.decoder(&bytes).unwrap();
    let err = dec.read_object().unwrap_err();
    assert!(matches!(err, Error::ClassNotFound(_)));
    assert!(err.to_string().contains("gone"), "{}", err);
    // the failure is localized: the next top-level value still decodes
    assert_eq!(dec.read_object().unwrap(), Value::str("sibling survives"));
}

#[test]
fn failure_propagates_through_references() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("gone").field("n", "I"))
        .unwrap();
    let writer = Codec::new(registry.clone());

    let gone = Value::Object(Instance::new(&registry.lookup("gone").unwrap()));
    let mut enc = writer.encoder();
    enc.write_object(&gone).unwrap();
    // a back-reference to the failed slot is itself tainted
    enc.write_object(&gone).unwrap();
    let bytes = enc.into_bytes();

    let reader = Codec::new(Arc::new(TypeRegistry::new()));
    let mut dec = reader.decoder(&bytes).unwrap();
    assert!(matches!(
        dec.read_object().unwrap_err(),
        Error::ClassNotFound(_)
    ));
    assert!(matches!(
        dec.read_object().unwrap_err(),
        Error::ClassNotFound(_)
    ));
}

#[test]
fn non_serializable_ancestor_is_rebuilt_by_initializer() {
    fn base_init() -> Vec<(String, Value)> {
        vec![("hits".to_string(), Value::I32(7))]
    }
    let make_registry = || {
        let registry = Arc::new(TypeRegistry::new());
        registry
            .register(
                ClassSpec::new("counter_base")
                    .not_serializable()
                    .field("hits", "I")
                    .initializer(base_init),
            )
            .unwrap();
        registry
            .register(
                ClassSpec::new("counter")
                    .parent("counter_base")
                    .field("name", "Lstring;"),
            )
            .unwrap();
        registry
    };

    let writer = Codec::new(make_registry());
    let inst = Instance::new(&writer.registry().lookup("counter").unwrap());
    inst.set("name", Value::str("c1")).unwrap();
    // mutate the non-serializable level; it must not travel
    inst.set("hits", Value::I32(99)).unwrap();
    let bytes = writer.encode(&Value::Object(inst)).unwrap();

    let reader = Codec::new(make_registry());
    let back = reader.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap();
    assert_eq!(obj.get("name").unwrap(), Value::str("c1"));
    // rebuilt from the initializer, not from the stream
    assert_eq!(obj.get("hits").unwrap(), Value::I32(7));
}
