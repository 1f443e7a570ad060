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

//! Shared references and cycles: one emission plus back-references on the
//! wire, identical sharing topology after decoding.

use std::rc::Rc;
use std::sync::Arc;

use obstream::{ClassSpec, Codec, Instance, TypeRegistry, Value};

fn pair_codec() -> Codec {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(
            ClassSpec::new("pair")
                .field("left", "Lstring;")
                .field("right", "Lstring;"),
        )
        .unwrap();
    registry
        .register(
            ClassSpec::new("node")
                .field("name", "Lstring;")
                .field("next", "Lnode;"),
        )
        .unwrap();
    Codec::new(registry)
}

#[test]
fn two_fields_same_instance_decode_reference_identical() {
    let codec = pair_codec();
    let shared = Value::str("the one and only");
    let pair = Instance::new(&codec.registry().lookup("pair").unwrap());
    pair.set("left", shared.clone()).unwrap();
    pair.set("right", shared).unwrap();

    let bytes = codec.encode(&Value::Object(pair)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap();
    let left = obj.get("left").unwrap();
    let right = obj.get("right").unwrap();
    assert_eq!(left.as_str().unwrap(), "the one and only");
    // reference-identical, not merely equal
    assert_eq!(left.identity().unwrap(), right.identity().unwrap());
}

#[test]
fn shared_subobject_is_emitted_exactly_once() {
    let codec = pair_codec();
    let shared = Value::str("unique-payload-9f3a");
    let pair = Instance::new(&codec.registry().lookup("pair").unwrap());
    pair.set("left", shared.clone()).unwrap();
    pair.set("right", shared).unwrap();

    let bytes = codec.encode(&Value::Object(pair)).unwrap();
    let needle = b"unique-payload-9f3a";
    let hits = bytes.windows(needle.len()).filter(|w| *w == needle).count();
    assert_eq!(hits, 1, "shared string must be encoded exactly once");
}

#[test]
fn cyclic_graph_round_trips() {
    let codec = pair_codec();
    let registry = codec.registry();
    let a = Instance::new(&registry.lookup("node").unwrap());
    let b = Instance::new(&registry.lookup("node").unwrap());
    a.set("name", Value::str("a")).unwrap();
    b.set("name", Value::str("b")).unwrap();
    a.set("next", Value::Object(b.clone())).unwrap();
    b.set("next", Value::Object(a.clone())).unwrap();

    let bytes = codec.encode(&Value::Object(a)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let a2 = back.as_object().unwrap().clone();
    let b2 = a2.get("next").unwrap().as_object().unwrap().clone();
    let a2_again = b2.get("next").unwrap().as_object().unwrap().clone();
    assert!(Rc::ptr_eq(&a2, &a2_again));
    assert_eq!(a2.get("name").unwrap(), Value::str("a"));
    assert_eq!(b2.get("name").unwrap(), Value::str("b"));
}

#[test]
fn self_referential_object_round_trips() {
    let codec = pair_codec();
    let node = Instance::new(&codec.registry().lookup("node").unwrap());
    node.set("name", Value::str("ouroboros")).unwrap();
    node.set("next", Value::Object(node.clone())).unwrap();

    let bytes = codec.encode(&Value::Object(node)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let n = back.as_object().unwrap();
    assert!(Rc::ptr_eq(n, n.get("next").unwrap().as_object().unwrap()));
}

#[test]
fn sharing_works_across_top_level_values() {
    let codec = pair_codec();
    let shared = Value::str("spans two writes");
    let mut enc = codec.encoder();
    enc.write_object(&shared).unwrap();
    enc.write_object(&shared).unwrap();
    let bytes = enc.into_bytes();

    let mut dec = codec.decoder(&bytes).unwrap();
    let first = dec.read_object().unwrap();
    let second = dec.read_object().unwrap();
    assert_eq!(first.identity().unwrap(), second.identity().unwrap());
}

#[test]
fn reset_drops_sharing() {
    let codec = pair_codec();
    let shared = Value::str("pre-reset");
    let mut enc = codec.encoder();
    enc.write_object(&shared).unwrap();
    enc.reset().unwrap();
    enc.write_object(&shared).unwrap();
    let bytes = enc.into_bytes();

    let mut dec = codec.decoder(&bytes).unwrap();
    let first = dec.read_object().unwrap();
    let second = dec.read_object().unwrap();
    assert_eq!(first, second);
    // the second write is a fresh copy, not a back-reference
    assert_ne!(first.identity().unwrap(), second.identity().unwrap());
}

#[test]
fn class_descriptor_is_written_once() {
    let codec = pair_codec();
    let registry = codec.registry();
    let desc = registry.lookup("pair").unwrap();
    let first = Instance::new(&desc);
    let second = Instance::new(&desc);
    first.set("left", Value::str("l1")).unwrap();
    second.set("left", Value::str("l2")).unwrap();

    let mut enc = codec.encoder();
    enc.write_object(&Value::Object(first)).unwrap();
    enc.write_object(&Value::Object(second)).unwrap();
    let bytes = enc.into_bytes();

    let needle = b"pair";
    let hits = bytes.windows(needle.len()).filter(|w| *w == needle).count();
    assert_eq!(hits, 1, "class name must appear once, then back-references");

    let mut dec = codec.decoder(&bytes).unwrap();
    assert_eq!(
        dec.read_object().unwrap().as_object().unwrap().get("left").unwrap(),
        Value::str("l1")
    );
    assert_eq!(
        dec.read_object().unwrap().as_object().unwrap().get("left").unwrap(),
        Value::str("l2")
    );
}
