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

//! Block-data framing.
//!
//! Custom hook output is framed into length-prefixed chunks — short form
//! (tag + u8 length) for up to 255 bytes, long form (tag + u32 length)
//! otherwise — terminated by [`Tag::EndBlockData`]. Chunk boundaries are
//! invisible to a well-behaved hook: the write side buffers and flushes at a
//! threshold, the read side walks chunk headers transparently. At most one
//! block region is open per recursion depth, because hooks run synchronously
//! and non-reentrantly per object level.

use crate::buffer::{Reader, Writer};
use crate::error::Error;
use crate::types::{Tag, MAX_BLOCK_CHUNK};

/// Write-side chunk buffer for one object level's custom data.
#[derive(Default)]
pub struct BlockOut {
    buf: Vec<u8>,
}

impl BlockOut {
    pub fn new() -> BlockOut {
        BlockOut::default()
    }

    /// Buffers hook output, flushing a chunk once the threshold is reached.
    pub fn write(&mut self, w: &mut Writer, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= MAX_BLOCK_CHUNK {
            self.flush(w);
        }
    }

    /// Emits any buffered bytes as one chunk.
    pub fn flush(&mut self, w: &mut Writer) {
        if self.buf.is_empty() {
            return;
        }
        if self.buf.len() <= u8::MAX as usize {
            w.write_u8(Tag::BlockData as u8);
            w.write_u8(self.buf.len() as u8);
        } else {
            w.write_u8(Tag::BlockDataLong as u8);
            w.write_u32(self.buf.len() as u32);
        }
        w.write_bytes(&self.buf);
        self.buf.clear();
    }

    /// Flushes and terminates the block region.
    pub fn end(&mut self, w: &mut Writer) {
        self.flush(w);
        w.write_u8(Tag::EndBlockData as u8);
    }
}

/// Read-side chunk cursor for one object level's custom data.
pub struct BlockIn {
    remaining: usize,
}

impl BlockIn {
    pub fn new() -> BlockIn {
        BlockIn { remaining: 0 }
    }

    /// Bytes readable in the current chunk without touching a boundary.
    /// Zero at a block boundary; the caller decides whether to [`refill`].
    ///
    /// [`refill`]: BlockIn::refill
    pub fn available(&self) -> usize {
        self.remaining
    }

    /// Consumes `n` bytes of the current chunk.
    pub fn take(&mut self, n: usize) {
        debug_assert!(n <= self.remaining);
        self.remaining -= n;
    }

    /// Advances past chunk headers until data is available. Returns `false`
    /// without consuming anything when the next element is not a chunk
    /// (end-of-block marker or a tagged value).
    pub fn refill(&mut self, r: &mut Reader) -> Result<bool, Error> {
        while self.remaining == 0 {
            let len = match Tag::try_from(r.peek_u8()?) {
                Ok(Tag::BlockData) => {
                    r.read_u8()?;
                    r.read_u8()? as usize
                }
                Ok(Tag::BlockDataLong) => {
                    r.read_u8()?;
                    r.read_u32()? as usize
                }
                _ => return Ok(false),
            };
            if len > r.remaining() {
                return Err(Error::corrupt_stream(format!(
                    "block chunk claims {} bytes but only {} remain",
                    len,
                    r.remaining()
                )));
            }
            self.remaining = len;
        }
        Ok(true)
    }
}
