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

//! Structural version ids.
//!
//! When a registered type does not declare an explicit version id, one is
//! derived from its structural shape so that two independently built peers
//! with identical type definitions agree on the id. The digest is SHA-1 over
//! length-prefixed parts (name, kind bits, parent name, hook-presence
//! markers, fields sorted by name then signature), reduced to the low 8
//! bytes as a little-endian signed integer.

use sha1::{Digest, Sha1};

fn push_part(hasher: &mut Sha1, part: &[u8]) {
    hasher.update((part.len() as u32).to_be_bytes());
    hasher.update(part);
}

/// Computes the structural version id of a type.
///
/// `kind` packs the descriptor kind bits (enum, external, proxy), `hooks`
/// lists the presence markers of the type's capability table, and `fields`
/// holds `(name, signature)` pairs in any order; they are sorted here so the
/// digest is insensitive to declaration order.
pub fn structural_version_id(
    name: &str,
    kind: u8,
    parent: Option<&str>,
    hooks: &[&str],
    fields: &[(String, String)],
) -> i64 {
    let mut hasher = Sha1::new();
    push_part(&mut hasher, name.as_bytes());
    push_part(&mut hasher, &[kind]);
    push_part(&mut hasher, parent.unwrap_or("").as_bytes());
    for hook in hooks {
        push_part(&mut hasher, hook.as_bytes());
    }
    let mut sorted: Vec<&(String, String)> = fields.iter().collect();
    sorted.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    for (fname, sig) in sorted {
        push_part(&mut hasher, fname.as_bytes());
        push_part(&mut hasher, sig.as_bytes());
    }
    let digest = hasher.finalize();
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(low)
}
