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

//! # Obstream
//!
//! A streaming object-graph codec: encode live object graphs into a
//! self-describing byte stream and reconstruct equivalent graphs, with
//! reference identity (shared subobjects and cycles), custom per-type
//! encode/decode hooks, and tolerance for version skew between the
//! writer's and reader's type definitions.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use obstream::{ClassSpec, Codec, Instance, TypeRegistry, Value};
//!
//! let registry = Arc::new(TypeRegistry::new());
//! registry
//!     .register(
//!         ClassSpec::new("user")
//!             .field("age", "I")
//!             .field("name", "Lstring;"),
//!     )
//!     .unwrap();
//! let codec = Codec::new(registry.clone());
//!
//! let user = Instance::new(&registry.lookup("user").unwrap());
//! user.set("age", Value::I32(30)).unwrap();
//! user.set("name", Value::str("Alice")).unwrap();
//!
//! let bytes = codec.encode(&Value::Object(user)).unwrap();
//! let back = codec.decode(&bytes).unwrap();
//! assert_eq!(back.as_object().unwrap().get("name").unwrap(), Value::str("Alice"));
//! ```
//!
//! Shared references survive the round trip: write the same `Rc` twice and
//! the stream carries one copy plus a back-reference, and the decoded graph
//! is pointer-identical where the original was. For multi-value sessions
//! use [`Codec::encoder`] / [`Codec::decoder`] directly; `write_unshared` /
//! `read_unshared` bypass the sharing machinery for a single value.

pub use obstream_core::codec::Codec;
pub use obstream_core::decoder::{FieldGetter, HookReader, ObjectDecoder, ValidationFn};
pub use obstream_core::encoder::{HookWriter, ObjectEncoder};
pub use obstream_core::error::Error;
pub use obstream_core::meta::descriptor::{
    EnumConstant, FieldDescriptor, Harness, TypeDescriptor,
};
pub use obstream_core::resolver::type_registry::{ClassSpec, TypeRegistry};
pub use obstream_core::types::{Tag, TypeCode};
pub use obstream_core::value::{ArrayData, ArrayValue, Instance, Value};
