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

//! Type descriptors.
//!
//! [`TypeDescriptor`] is the immutable, registry-cached structural schema of
//! a registered type: ordered fields, version id, capability table and the
//! supertype link. [`StreamClassDesc`] is its stream-side counterpart, parsed
//! from the wire and holding the outcome of resolving the streamed class
//! against the local registry.

use std::rc::Rc;
use std::sync::{Arc, Weak};

use crate::decoder::HookReader;
use crate::encoder::HookWriter;
use crate::error::Error;
use crate::types::{TypeCode, FLAG_BLOCK_DATA, FLAG_ENUM, FLAG_EXTERNAL, FLAG_WRITE_HOOK};
use crate::value::{Instance, Value};

/// Custom per-level write hook. May emit framed optional data and must write
/// default fields (if at all) before any custom bytes.
pub type WriteHookFn = fn(&Rc<Instance>, &mut HookWriter<'_>) -> Result<(), Error>;

/// Custom per-level read hook, mirroring [`WriteHookFn`].
pub type ReadHookFn = fn(&Rc<Instance>, &mut HookReader<'_, '_>) -> Result<(), Error>;

/// Value substitution hook (write-replace / read-resolve). Substitutions
/// chain until a hook returns its argument or a value of the same class.
pub type ReplaceFn = fn(&Value) -> Result<Value, Error>;

/// Zero-argument initializer of a non-serializable ancestor: produces the
/// `(field name, value)` pairs that class contributes to a fresh instance.
pub type InitFn = fn() -> Vec<(String, Value)>;

/// Capability table attached to each descriptor. Hook presence is resolved
/// once at descriptor-construction time and checked before each invocation
/// point; there is no per-call dynamic lookup.
#[derive(Clone, Copy, Default)]
pub struct Harness {
    pub write_hook: Option<WriteHookFn>,
    pub read_hook: Option<ReadHookFn>,
    pub write_replace: Option<ReplaceFn>,
    pub read_resolve: Option<ReplaceFn>,
}

/// One field of a descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, unique within its descriptor.
    pub name: String,
    /// One-byte type code.
    pub code: TypeCode,
    /// Full signature for object and array fields, `None` for primitives.
    pub signature: Option<String>,
}

/// One constant of an enum descriptor. Constants are interned per descriptor
/// so identity comparison works like any other reference value.
pub struct EnumConstant {
    pub(crate) class: Weak<TypeDescriptor>,
    pub name: String,
    pub ordinal: u32,
}

impl EnumConstant {
    /// The descriptor this constant belongs to.
    pub fn class(&self) -> Arc<TypeDescriptor> {
        self.class
            .upgrade()
            .expect("enum descriptor outlives its constants")
    }
}

impl std::fmt::Debug for EnumConstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnumConstant({})", self.name)
    }
}

/// Structural schema of a registered type.
///
/// Created lazily on first use, cached for the registry's lifetime, and
/// immutable afterwards. The supertype link forms a tree: cycles are
/// rejected at construction time.
pub struct TypeDescriptor {
    pub(crate) name: String,
    pub(crate) version_id: i64,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) parent: Option<Arc<TypeDescriptor>>,
    pub(crate) harness: Harness,
    pub(crate) serializable: bool,
    pub(crate) external: bool,
    pub(crate) is_enum: bool,
    pub(crate) is_proxy: bool,
    pub(crate) is_array: bool,
    pub(crate) provisional: bool,
    pub(crate) enum_constants: Vec<Arc<EnumConstant>>,
    pub(crate) proxy_interfaces: Vec<String>,
    pub(crate) array_elem: Option<TypeCode>,
    pub(crate) initializer: Option<InitFn>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_id(&self) -> i64 {
        self.version_id
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn parent(&self) -> Option<&Arc<TypeDescriptor>> {
        self.parent.as_ref()
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn is_enum(&self) -> bool {
        self.is_enum
    }

    pub fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn proxy_interfaces(&self) -> &[String] {
        &self.proxy_interfaces
    }

    /// Element type code for array descriptors.
    pub fn array_elem(&self) -> Option<TypeCode> {
        self.array_elem
    }

    pub fn initializer(&self) -> Option<InitFn> {
        self.initializer
    }

    pub fn enum_constants(&self) -> &[Arc<EnumConstant>] {
        &self.enum_constants
    }

    /// Looks up an interned enum constant by name.
    pub fn constant(&self, name: &str) -> Option<Arc<EnumConstant>> {
        self.enum_constants
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Whether this level carries framed optional data on the wire.
    pub fn has_hook_data(&self) -> bool {
        self.external || self.harness.write_hook.is_some()
    }

    /// The descriptor flags byte as written to the wire.
    pub fn flags_byte(&self) -> u8 {
        let mut flags = 0;
        if self.external {
            flags |= FLAG_EXTERNAL | FLAG_BLOCK_DATA;
        } else if self.harness.write_hook.is_some() {
            flags |= FLAG_WRITE_HOOK | FLAG_BLOCK_DATA;
        }
        if self.is_enum {
            flags |= FLAG_ENUM;
        }
        flags
    }

    /// Full inheritance chain, root ancestor first, `this` last.
    pub fn chain(this: &Arc<TypeDescriptor>) -> Vec<Arc<TypeDescriptor>> {
        let mut chain = Vec::new();
        let mut cur = Some(this.clone());
        while let Some(d) = cur {
            cur = d.parent.clone();
            chain.push(d);
        }
        chain.reverse();
        chain
    }

    /// Serializable chain levels, root first. Non-serializable ancestors
    /// never appear on the wire; their state is rebuilt by their registered
    /// zero-argument initializer.
    pub fn wire_chain(this: &Arc<TypeDescriptor>) -> Vec<Arc<TypeDescriptor>> {
        Self::chain(this)
            .into_iter()
            .filter(|d| d.serializable)
            .collect()
    }

    /// Nearest serializable ancestor, if any.
    pub fn wire_parent(this: &Arc<TypeDescriptor>) -> Option<Arc<TypeDescriptor>> {
        let mut cur = this.parent.clone();
        while let Some(d) = cur {
            if d.serializable {
                return Some(d);
            }
            cur = d.parent.clone();
        }
        None
    }

    /// Bare placeholder descriptor handed to a re-entrant registry lookup
    /// while the real descriptor for `name` is still under construction.
    pub(crate) fn provisional(name: &str) -> Arc<TypeDescriptor> {
        Self::skeleton(name, true)
    }

    /// Bare non-serializable descriptor for introspecting unknown or
    /// malformed types; `lookup_any` hands these out instead of failing.
    pub(crate) fn opaque(name: &str) -> Arc<TypeDescriptor> {
        Self::skeleton(name, false)
    }

    fn skeleton(name: &str, provisional: bool) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor {
            name: name.to_string(),
            version_id: 0,
            fields: Vec::new(),
            parent: None,
            harness: Harness::default(),
            serializable: false,
            external: false,
            is_enum: false,
            is_proxy: false,
            is_array: false,
            provisional,
            enum_constants: Vec::new(),
            proxy_interfaces: Vec::new(),
            array_elem: None,
            initializer: None,
        })
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Deferred resolution failure attached to a handle slot. Slots referencing
/// a failed slot fail transitively; the stored failure surfaces as
/// [`Error::ClassNotFound`] at the first attempted use.
#[derive(Debug, Clone)]
pub struct FailedRef {
    pub class_name: String,
    pub message: String,
}

impl FailedRef {
    pub fn new(class_name: &str, message: impl Into<String>) -> Rc<FailedRef> {
        Rc::new(FailedRef {
            class_name: class_name.to_string(),
            message: message.into(),
        })
    }

    pub fn to_error(&self) -> Error {
        Error::class_not_found(format!("`{}`: {}", self.class_name, self.message))
    }
}

/// One field of a stream-side class descriptor.
#[derive(Debug, Clone)]
pub struct StreamField {
    pub name: String,
    pub code: TypeCode,
    pub signature: Option<String>,
}

/// A class descriptor as parsed from the wire, plus the outcome of matching
/// it against the local registry. An unresolvable class is *not* an
/// immediate error: the descriptor still drives byte consumption so the
/// stream stays framed, and the failure is deferred into the handle slots.
pub struct StreamClassDesc {
    pub name: String,
    pub version_id: i64,
    pub flags: u8,
    pub fields: Vec<StreamField>,
    pub parent: Option<Rc<StreamClassDesc>>,
    pub proxy_interfaces: Option<Vec<String>>,
    pub local: Result<Arc<TypeDescriptor>, Rc<FailedRef>>,
}

impl StreamClassDesc {
    /// Stream chain, root ancestor first.
    pub fn chain(this: &Rc<StreamClassDesc>) -> Vec<Rc<StreamClassDesc>> {
        let mut chain = Vec::new();
        let mut cur = Some(this.clone());
        while let Some(d) = cur {
            cur = d.parent.clone();
            chain.push(d);
        }
        chain.reverse();
        chain
    }

    /// Whether this level carries framed optional data on the wire.
    pub fn has_hook_data(&self) -> bool {
        self.flags & (FLAG_WRITE_HOOK | FLAG_EXTERNAL) != 0
    }

    pub fn is_external(&self) -> bool {
        self.flags & FLAG_EXTERNAL != 0
    }
}

impl std::fmt::Debug for StreamClassDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClassDesc")
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .field("flags", &self.flags)
            .finish()
    }
}
