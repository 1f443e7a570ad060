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

//! Array reconstruction across every element kind.

use std::rc::Rc;
use std::sync::Arc;

use obstream::{ArrayData, ArrayValue, ClassSpec, Codec, Instance, TypeRegistry, Value};

fn array(codec: &Codec, sig: &str, data: ArrayData) -> Value {
    let desc = codec.registry().array_descriptor(sig).unwrap();
    Value::Array(ArrayValue::new(&desc, data).unwrap())
}

#[test]
fn primitive_arrays_round_trip() {
    let codec = Codec::default();
    let cases = vec![
        ("[Z", ArrayData::Bool(vec![true, false, true])),
        ("[B", ArrayData::I8(vec![-1, 0, 127])),
        ("[C", ArrayData::Char(vec![b'a' as u16, 0x2603])),
        ("[S", ArrayData::I16(vec![-300, 300])),
        ("[I", ArrayData::I32(vec![i32::MIN, 0, i32::MAX])),
        ("[J", ArrayData::I64(vec![i64::MIN, 1, i64::MAX])),
        ("[F", ArrayData::F32(vec![0.5, -1.5])),
        ("[D", ArrayData::F64(vec![3.141_592_653_589_793, -2.0])),
    ];
    for (sig, data) in cases {
        let value = array(&codec, sig, data.clone());
        let bytes = codec.encode(&value).unwrap();
        let back = codec.decode(&bytes).unwrap();
        let arr = back.as_array().unwrap();
        assert_eq!(arr.class().name(), sig);
        assert_eq!(*arr.data.borrow(), data, "mismatch for {}", sig);
    }
}

#[test]
fn empty_array_round_trip() {
    let codec = Codec::default();
    let value = array(&codec, "[I", ArrayData::I32(vec![]));
    let bytes = codec.encode(&value).unwrap();
    let back = codec.decode(&bytes).unwrap();
    assert_eq!(back.as_array().unwrap().len(), 0);
}

#[test]
fn object_array_round_trip() {
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(ClassSpec::new("point").field("x", "I").field("y", "I"))
        .unwrap();
    let codec = Codec::new(registry.clone());

    let p = Instance::new(&registry.lookup("point").unwrap());
    p.set("x", Value::I32(1)).unwrap();
    p.set("y", Value::I32(2)).unwrap();

    let value = array(
        &codec,
        "[Lpoint;",
        ArrayData::Ref(vec![Value::Object(p), Value::Null, Value::str("mixed")]),
    );
    let bytes = codec.encode(&value).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let arr = back.as_array().unwrap();
    let data = arr.data.borrow();
    let ArrayData::Ref(elems) = &*data else {
        panic!("expected reference elements");
    };
    assert_eq!(elems.len(), 3);
    assert_eq!(elems[0].as_object().unwrap().get("x").unwrap(), Value::I32(1));
    assert_eq!(elems[1], Value::Null);
    assert_eq!(elems[2], Value::str("mixed"));
}

#[test]
fn nested_arrays_round_trip() {
    let codec = Codec::default();
    let inner_a = array(&codec, "[I", ArrayData::I32(vec![1, 2]));
    let inner_b = array(&codec, "[I", ArrayData::I32(vec![3]));
    let outer = array(&codec, "[[I", ArrayData::Ref(vec![inner_a, inner_b]));

    let bytes = codec.encode(&outer).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let arr = back.as_array().unwrap();
    let data = arr.data.borrow();
    let ArrayData::Ref(elems) = &*data else {
        panic!("expected reference elements");
    };
    assert_eq!(
        *elems[0].as_array().unwrap().data.borrow(),
        ArrayData::I32(vec![1, 2])
    );
    assert_eq!(
        *elems[1].as_array().unwrap().data.borrow(),
        ArrayData::I32(vec![3])
    );
}

#[test]
fn shared_array_keeps_identity() {
    let codec = Codec::default();
    let shared = array(&codec, "[J", ArrayData::I64(vec![42]));
    let outer = array(
        &codec,
        "[[J",
        ArrayData::Ref(vec![shared.clone(), shared.clone()]),
    );

    let bytes = codec.encode(&outer).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let data = back.as_array().unwrap().data.borrow().clone();
    let ArrayData::Ref(elems) = data else {
        panic!("expected reference elements");
    };
    assert!(Rc::ptr_eq(
        elems[0].as_array().unwrap(),
        elems[1].as_array().unwrap()
    ));
}

#[test]
fn self_referential_array_round_trips() {
    let codec = Codec::default();
    let desc = codec.registry().array_descriptor("[Lanything;").unwrap();
    let arr = ArrayValue::new(&desc, ArrayData::Ref(vec![Value::Null])).unwrap();
    let value = Value::Array(arr.clone());
    *arr.data.borrow_mut() = ArrayData::Ref(vec![value.clone(), Value::str("tail")]);

    let bytes = codec.encode(&value).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let outer = back.as_array().unwrap();
    let data = outer.data.borrow();
    let ArrayData::Ref(elems) = &*data else {
        panic!("expected reference elements");
    };
    assert!(Rc::ptr_eq(elems[0].as_array().unwrap(), outer));
    assert_eq!(elems[1], Value::str("tail"));
}

#[test]
fn corrupt_array_length_is_bounded() {
    let codec = Codec::default();
    let value = array(&codec, "[I", ArrayData::I32(vec![1, 2, 3]));
    let mut bytes = codec.encode(&value).unwrap();
    // the 4-byte length sits right before the 3 encoded elements
    let len_at = bytes.len() - 3 * 4 - 4;
    bytes[len_at..len_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, obstream::Error::CorruptStream(_)));
    assert!(err.to_string().contains("allocation limit"));
}
