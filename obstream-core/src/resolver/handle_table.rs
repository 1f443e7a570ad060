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

//! Per-stream handle tables.
//!
//! Handles start at [`BASE_HANDLE`] and increment by exactly one per newly
//! assigned object, array, string or class descriptor, with no gaps and no
//! reuse within a stream session. A received handle must always refer to an
//! earlier-assigned slot; anything else is a corrupt stream.
//!
//! [`HandleWriter`] maps value identity (pointer address) to the assigned
//! handle so a shared object is emitted once and back-referenced afterwards.
//! [`HandleReader`] is a slot vector: each slot is pending, resolved, or
//! failed — the failed state carries the deferred class-resolution error
//! that surfaces at the slot's first use.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Error;
use crate::meta::descriptor::{FailedRef, StreamClassDesc};
use crate::types::BASE_HANDLE;
use crate::value::Value;

/// Write-side handle table: identity -> handle.
#[derive(Default)]
pub struct HandleWriter {
    refs: HashMap<usize, u32>,
    next: u32,
}

impl HandleWriter {
    pub fn new() -> Self {
        HandleWriter {
            refs: HashMap::new(),
            next: 0,
        }
    }

    /// Handle previously assigned to this identity, if any.
    pub fn get(&self, identity: usize) -> Option<u32> {
        self.refs.get(&identity).copied()
    }

    /// Assigns the next handle to an identity and records it for
    /// back-referencing.
    pub fn assign(&mut self, identity: usize) -> u32 {
        let handle = BASE_HANDLE + self.next;
        self.next += 1;
        self.refs.insert(identity, handle);
        handle
    }

    /// Consumes the next handle without recording an identity. Used for
    /// values that occupy a handle slot but are never back-referenced, such
    /// as descriptor signature strings.
    pub fn assign_anonymous(&mut self) -> u32 {
        let handle = BASE_HANDLE + self.next;
        self.next += 1;
        handle
    }

    /// Drops every entry and restarts numbering at the base handle.
    pub fn clear(&mut self) {
        self.refs.clear();
        self.next = 0;
    }
}

/// What a resolved read-side slot holds.
#[derive(Clone)]
pub enum SlotEntry {
    Value(Value),
    Desc(Rc<StreamClassDesc>),
}

/// State of one read-side handle slot.
#[derive(Clone)]
pub enum Slot {
    /// Allocated but not yet filled; a back-reference here is corrupt.
    Pending,
    Resolved(SlotEntry),
    Failed(Rc<FailedRef>),
}

/// Read-side handle table.
#[derive(Default)]
pub struct HandleReader {
    slots: Vec<Slot>,
    identities: HashMap<usize, u32>,
}

impl HandleReader {
    pub fn new() -> Self {
        HandleReader::default()
    }

    /// Allocates the next slot in stream order.
    pub fn assign_pending(&mut self) -> u32 {
        let handle = BASE_HANDLE + self.slots.len() as u32;
        self.slots.push(Slot::Pending);
        handle
    }

    fn index(&self, handle: u32) -> Result<usize, Error> {
        let idx = handle.checked_sub(BASE_HANDLE).ok_or_else(|| {
            Error::corrupt_stream(format!("handle {:#x} below handle base", handle))
        })? as usize;
        if idx >= self.slots.len() {
            return Err(Error::corrupt_stream(format!(
                "reference to unassigned handle {:#x} ({} slots assigned)",
                handle,
                self.slots.len()
            )));
        }
        Ok(idx)
    }

    /// Resolves a back-reference. Out-of-range handles are corrupt; the
    /// caller decides what pending and failed slots mean at its position.
    pub fn resolve(&self, handle: u32) -> Result<&Slot, Error> {
        Ok(&self.slots[self.index(handle)?])
    }

    /// Fills a slot with a value and records the value's identity.
    pub fn set_value(&mut self, handle: u32, value: Value) {
        if let Some(id) = value.identity() {
            self.identities.insert(id, handle);
        }
        let idx = (handle - BASE_HANDLE) as usize;
        self.slots[idx] = Slot::Resolved(SlotEntry::Value(value));
    }

    /// Fills a slot with a parsed class descriptor.
    pub fn set_desc(&mut self, handle: u32, desc: Rc<StreamClassDesc>) {
        let idx = (handle - BASE_HANDLE) as usize;
        self.slots[idx] = Slot::Resolved(SlotEntry::Desc(desc));
    }

    /// Marks a slot as failed; back-references to it propagate the failure.
    pub fn fail(&mut self, handle: u32, failure: Rc<FailedRef>) {
        let idx = (handle - BASE_HANDLE) as usize;
        self.slots[idx] = Slot::Failed(failure);
    }

    /// Whether an identity is already reachable through some live handle.
    /// Used to reject read-resolve redirection of unshared slots into
    /// aliases of shared values.
    pub fn is_live_identity(&self, identity: usize) -> bool {
        self.identities.contains_key(&identity)
    }

    /// Drops every slot, releasing the strong references they hold.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.identities.clear();
    }
}
