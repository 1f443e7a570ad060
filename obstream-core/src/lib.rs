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

//! # Obstream Core
//!
//! Core implementation of the obstream object-graph codec: a streaming,
//! self-describing binary format for live object graphs with reference
//! identity, custom per-type hooks, and version-tolerant type matching.
//!
//! ## Architecture
//!
//! - **`codec`**: configuration holder and entry point
//! - **`encoder`** / **`decoder`**: the two stream endpoints
//! - **`resolver`**: type registry and per-stream handle tables
//! - **`meta`**: descriptors, structural version ids, modified UTF-8
//! - **`block`**: block-data framing for custom hook output
//! - **`value`**: the dynamic value/instance model
//! - **`buffer`**: big-endian binary reader/writer
//! - **`types`**: wire tags and constants
//! - **`error`**: error taxonomy
//!
//! ## Key Concepts
//!
//! Every reference value (object, array, string, enum constant, class
//! literal) is assigned a monotonically increasing *handle* the first time
//! it is written; later occurrences become one-byte back-references, which
//! is how shared subobjects and cycles survive a round trip. Types are
//! registered up front with a [`resolver::type_registry::ClassSpec`];
//! descriptors are derived lazily, carry an explicit or structurally
//! digested version id, and tolerate field addition, removal and
//! reordering between peers with the same id. Classes a reader cannot
//! resolve do not kill the stream: the affected subgraph is consumed and
//! tagged, and the failure surfaces only when something uses it.
//!
//! This crate is typically consumed through the `obstream` facade crate.

pub mod block;
pub mod buffer;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod meta;
pub mod resolver;
pub mod types;
pub mod value;
