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

//! Wire-level constants: stream header, the closed tag set, class-descriptor
//! flag bits and field type codes. Encoder and decoder must agree on every
//! value in this module byte-for-byte.

use num_enum::TryFromPrimitive;

use crate::error::Error;

/// First two bytes of every stream.
pub const STREAM_MAGIC: u16 = 0x4F53;

/// Stream format version, written after the magic.
pub const STREAM_VERSION: u16 = 0x0005;

/// First handle assigned in a stream session. Handles increment by exactly
/// one per newly assigned object, array, string or class descriptor.
pub const BASE_HANDLE: u32 = 0x5E0000;

/// Block-data chunks buffer up to this many bytes before flushing.
pub const MAX_BLOCK_CHUNK: usize = 1024;

/// Longest modified-UTF-8 byte length written with the short string form;
/// anything larger uses [`Tag::LongString`] with an 8-byte length.
pub const SHORT_STRING_LIMIT: usize = u16::MAX as usize;

/// Default upper bound on any single length claimed by the stream (string
/// bytes, array elements, block chunks) before allocation.
pub const DEFAULT_MAX_ALLOC: usize = 1 << 26;

/// One-byte discriminators framing every structural element of the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Tag {
    /// A null reference value.
    Null = 0x60,
    /// Back-reference to an already-assigned handle (u32 follows).
    Reference = 0x61,
    /// A full class descriptor (name, version id, flags, fields, super).
    ClassDesc = 0x62,
    /// A new object: descriptor, handle, then per-level data.
    Object = 0x63,
    /// Short string: u16 byte length + modified UTF-8.
    String = 0x64,
    /// Long string: u64 byte length + modified UTF-8.
    LongString = 0x65,
    /// A new array: element-type descriptor, handle, u32 length, elements.
    Array = 0x66,
    /// A class literal value: descriptor + handle.
    ClassLiteral = 0x67,
    /// Block-data chunk, u8 length (<= 255 bytes).
    BlockData = 0x68,
    /// Block-data chunk, u32 length.
    BlockDataLong = 0x69,
    /// Terminates the custom-data region of one object level.
    EndBlockData = 0x6A,
    /// Drops every handle; only legal between top-level values.
    Reset = 0x6B,
    /// The writer aborted mid-stream; nothing after this is decodable.
    Exception = 0x6C,
    /// An enum constant: descriptor, handle, constant name string.
    Enum = 0x6D,
    /// A dynamic-proxy class descriptor: interface names + super.
    ProxyClassDesc = 0x6E,
}

/// Class-descriptor flag bits.
pub const FLAG_WRITE_HOOK: u8 = 0x01;
pub const FLAG_EXTERNAL: u8 = 0x02;
pub const FLAG_BLOCK_DATA: u8 = 0x04;
pub const FLAG_ENUM: u8 = 0x08;

/// One-byte field type codes used in class descriptors and field signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeCode {
    Bool = b'Z',
    I8 = b'B',
    Char = b'C',
    I16 = b'S',
    I32 = b'I',
    I64 = b'J',
    F32 = b'F',
    F64 = b'D',
    Object = b'L',
    Array = b'[',
}

impl TypeCode {
    /// Whether this code denotes a fixed-width primitive field.
    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeCode::Object | TypeCode::Array)
    }

    /// Encoded width in bytes for primitive codes.
    pub fn width(self) -> Option<usize> {
        match self {
            TypeCode::Bool | TypeCode::I8 => Some(1),
            TypeCode::Char | TypeCode::I16 => Some(2),
            TypeCode::I32 | TypeCode::F32 => Some(4),
            TypeCode::I64 | TypeCode::F64 => Some(8),
            TypeCode::Object | TypeCode::Array => None,
        }
    }

    /// Parses a field signature: a single primitive code character,
    /// `L<class>;` for object fields, or `[<elem-signature>` for arrays.
    pub fn from_signature(sig: &str) -> Result<TypeCode, Error> {
        let first = *sig.as_bytes().first().ok_or_else(|| {
            Error::invalid_class("empty field signature")
        })?;
        let code = TypeCode::try_from(first).map_err(|_| {
            Error::invalid_class(format!("malformed field signature `{}`", sig))
        })?;
        match code {
            TypeCode::Object => {
                if sig.len() < 3 || !sig.ends_with(';') {
                    return Err(Error::invalid_class(format!(
                        "malformed object signature `{}`",
                        sig
                    )));
                }
            }
            TypeCode::Array => {
                TypeCode::from_signature(&sig[1..])?;
            }
            _ => {
                if sig.len() != 1 {
                    return Err(Error::invalid_class(format!(
                        "malformed primitive signature `{}`",
                        sig
                    )));
                }
            }
        }
        Ok(code)
    }
}

impl std::fmt::Display for TypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeCode::Bool => "bool",
            TypeCode::I8 => "i8",
            TypeCode::Char => "char",
            TypeCode::I16 => "i16",
            TypeCode::I32 => "i32",
            TypeCode::I64 => "i64",
            TypeCode::F32 => "f32",
            TypeCode::F64 => "f64",
            TypeCode::Object => "object",
            TypeCode::Array => "array",
        };
        f.write_str(name)
    }
}
