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

//! Modified UTF-8 transcoding.
//!
//! Differs from standard UTF-8 in two ways: U+0000 is encoded as the two-byte
//! sequence `C0 80` (so encoded strings never contain a zero byte), and
//! characters outside the BMP are encoded as a surrogate pair of two
//! three-byte sequences. Every name and string value on the wire uses this
//! encoding.

use crate::error::Error;

/// Encodes a string as modified UTF-8.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for u in s.encode_utf16() {
        match u {
            0x0001..=0x007F => out.push(u as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((u >> 6) as u8 & 0x1F));
                out.push(0x80 | (u as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((u >> 12) as u8 & 0x0F));
                out.push(0x80 | ((u >> 6) as u8 & 0x3F));
                out.push(0x80 | (u as u8 & 0x3F));
            }
        }
    }
    out
}

/// Byte length [`encode`] would produce, without allocating.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|u| match u {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Decodes modified UTF-8 bytes back into a string.
pub fn decode(bytes: &[u8]) -> Result<String, Error> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b1 = continuation(bytes, i + 1)?;
            units.push(((b as u16 & 0x1F) << 6) | b1 as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            units.push(((b as u16 & 0x0F) << 12) | ((b1 as u16) << 6) | b2 as u16);
            i += 3;
        } else {
            return Err(Error::corrupt_stream(format!(
                "malformed modified UTF-8 byte {:#04x} at index {}",
                b, i
            )));
        }
    }
    String::from_utf16(&units)
        .map_err(|_| Error::corrupt_stream("unpaired surrogate in string data"))
}

fn continuation(bytes: &[u8], i: usize) -> Result<u8, Error> {
    match bytes.get(i) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b & 0x3F),
        Some(&b) => Err(Error::corrupt_stream(format!(
            "malformed modified UTF-8 continuation byte {:#04x} at index {}",
            b, i
        ))),
        None => Err(Error::corrupt_stream(
            "truncated modified UTF-8 sequence at end of string data",
        )),
    }
}
