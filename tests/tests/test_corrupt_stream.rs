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

//! Corrupt streams fail fast, precisely, and without panicking.

use std::sync::Arc;

use obstream::{ClassSpec, Codec, Error, Instance, Tag, TypeRegistry, Value};

const BASE_HANDLE: u32 = 0x5E0000;

fn header() -> Vec<u8> {
    let codec = Codec::default();
    let enc = codec.encoder();
    enc.into_bytes()
}

#[test]
fn bad_magic_is_rejected() {
    let codec = Codec::default();
    let err = codec.decode(&[0xCA, 0xFE, 0x00, 0x05, 0x60]).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("magic"));
}

#[test]
fn bad_version_is_rejected() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes[2] = 0xFF;
    bytes[3] = 0xFF;
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("version"));
}

#[test]
fn unknown_tag_is_rejected() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(0xFF);
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("tag"));
}

#[test]
fn truncated_stream_is_corrupt_not_a_panic() {
    let codec = Codec::default();
    let full = codec.encode(&Value::str("truncate me somewhere")).unwrap();
    for cut in 0..full.len() {
        let err = codec.decode(&full[..cut]).unwrap_err();
        assert!(
            matches!(err, Error::CorruptStream(_)),
            "cut at {} gave {:?}",
            cut,
            err
        );
    }
}

#[test]
fn out_of_range_handle_is_corrupt() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::Reference as u8);
    bytes.extend_from_slice(&(BASE_HANDLE + 7).to_be_bytes());
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("handle"));
}

#[test]
fn below_base_handle_is_corrupt() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::Reference as u8);
    bytes.extend_from_slice(&5u32.to_be_bytes());
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
}

#[test]
fn string_length_is_bounded_before_allocation() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::LongString as u8);
    bytes.extend_from_slice(&u64::MAX.to_be_bytes());
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    let codec = Codec::default().max_alloc(16);
    let payload = "seventeen bytes!!";
    let full = codec.encode(&Value::str(payload));
    // encoding is unaffected; decoding enforces the bound
    let err = Codec::default()
        .max_alloc(16)
        .decode(&full.unwrap())
        .unwrap_err();
    assert!(err.to_string().contains("allocation limit"));
}

#[test]
fn descriptor_tag_in_value_position_is_corrupt() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::ClassDesc as u8);
    // a descriptor cannot head a value; rejected before its body is parsed
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
}

#[test]
fn stray_end_block_marker_is_corrupt() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::EndBlockData as u8);
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
}

#[test]
fn exception_marker_surfaces_the_write_abort() {
    let codec = Codec::default();
    let mut bytes = header();
    bytes.push(Tag::Exception as u8);
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("aborted"));
}

#[test]
fn reset_inside_a_graph_is_corrupt() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("holder").field("v", "Lstring;"))
        .unwrap();
    let codec = Codec::new(registry.clone());
    let inst = Instance::new(&registry.lookup("holder").unwrap());
    inst.set("v", Value::str("x")).unwrap();
    let mut bytes = codec.encode(&Value::Object(inst)).unwrap();
    // splice a reset marker over the field value's tag
    let tag_at = bytes.len() - (1 + 2 + 1);
    assert_eq!(bytes[tag_at], Tag::String as u8);
    bytes[tag_at] = Tag::Reset as u8;
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("reset"));
}

#[test]
fn corrupt_field_code_names_the_class() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("victim").field("x", "I"))
        .unwrap();
    let codec = Codec::new(registry.clone());
    let inst = Instance::new(&registry.lookup("victim").unwrap());
    let mut bytes = codec.encode(&Value::Object(inst)).unwrap();
    // the field code byte sits after: header, object tag, classdesc tag,
    // name (u16 len + bytes), version id, flags, field count
    let code_at = 4 + 1 + 1 + 2 + "victim".len() + 8 + 1 + 2;
    assert_eq!(bytes[code_at], b'I');
    bytes[code_at] = b'?';
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    assert!(err.to_string().contains("victim"));
}
