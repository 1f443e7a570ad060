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

//! The codec entry point.
//!
//! A [`Codec`] pairs a type registry with stream configuration and mints
//! encoder/decoder instances. Streams are single-threaded; the registry is
//! the only shared piece, so one codec can serve many threads each driving
//! their own streams.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use obstream_core::codec::Codec;
//! use obstream_core::resolver::type_registry::{ClassSpec, TypeRegistry};
//! use obstream_core::value::{Instance, Value};
//!
//! let registry = Arc::new(TypeRegistry::new());
//! registry
//!     .register(ClassSpec::new("point").field("x", "I").field("y", "I"))
//!     .unwrap();
//! let codec = Codec::new(registry.clone());
//!
//! let point = Instance::new(&registry.lookup("point").unwrap());
//! point.set("x", Value::I32(3)).unwrap();
//! point.set("y", Value::I32(4)).unwrap();
//!
//! let bytes = codec.encode(&Value::Object(point)).unwrap();
//! let back = codec.decode(&bytes).unwrap();
//! assert_eq!(back.as_object().unwrap().get("x").unwrap(), Value::I32(3));
//! ```

use std::sync::Arc;

use crate::decoder::ObjectDecoder;
use crate::encoder::ObjectEncoder;
use crate::error::Error;
use crate::resolver::type_registry::TypeRegistry;
use crate::types::DEFAULT_MAX_ALLOC;
use crate::value::Value;

pub struct Codec {
    registry: Arc<TypeRegistry>,
    max_alloc: usize,
}

impl Codec {
    pub fn new(registry: Arc<TypeRegistry>) -> Codec {
        Codec {
            registry,
            max_alloc: DEFAULT_MAX_ALLOC,
        }
    }

    /// Sets the upper bound on any single length a stream may claim before
    /// allocation (string bytes, array elements, block chunks). Corrupt
    /// length fields fail fast instead of exhausting memory.
    pub fn max_alloc(mut self, limit: usize) -> Self {
        self.max_alloc = limit;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Opens a fresh encoder with its own handle table.
    pub fn encoder(&self) -> ObjectEncoder {
        ObjectEncoder::new(self.registry.clone())
    }

    /// Opens a decoder over a byte slice, checking the stream header.
    pub fn decoder<'a>(&self, bytes: &'a [u8]) -> Result<ObjectDecoder<'a>, Error> {
        ObjectDecoder::new(self.registry.clone(), bytes, self.max_alloc)
    }

    /// Encodes a single value graph into a standalone stream.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, Error> {
        let mut encoder = self.encoder();
        encoder.write_object(value)?;
        Ok(encoder.into_bytes())
    }

    /// Decodes a single value graph from a standalone stream.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, Error> {
        self.decoder(bytes)?.read_object()
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::new(Arc::new(TypeRegistry::new()))
    }
}
