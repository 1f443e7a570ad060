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

//! The type descriptor registry.
//!
//! Types are registered as [`ClassSpec`]s; descriptors are derived lazily on
//! first use and cached for the registry's lifetime. Construction for a
//! given name is guarded by a per-name cell so concurrent first-use from
//! multiple threads resolves to a single winner — losers observe the same
//! descriptor or the same failure. A re-entrant lookup from the thread that
//! is already constructing the same type gets a provisional placeholder
//! instead of deadlocking; placeholders are never cached, and a finished
//! build whose chain still contains one fails as a circular chain.
//!
//! The registry is the injectable collaborator for dynamic type resolution:
//! streams hold an `Arc<TypeRegistry>`, and tests construct isolated
//! instances.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::Error;
use crate::meta::descriptor::{
    EnumConstant, FieldDescriptor, Harness, InitFn, ReadHookFn, ReplaceFn, TypeDescriptor,
    WriteHookFn,
};
use crate::meta::version::structural_version_id;
use crate::types::TypeCode;

/// Declaration of a serializable type, handed to [`TypeRegistry::register`].
///
/// # Examples
///
/// ```
/// use obstream_core::resolver::type_registry::ClassSpec;
///
/// let spec = ClassSpec::new("point")
///     .field("x", "I")
///     .field("y", "I")
///     .field("label", "Lstring;");
/// ```
#[derive(Clone)]
pub struct ClassSpec {
    name: String,
    parent: Option<String>,
    version_id: Option<i64>,
    fields: Vec<(String, String)>,
    explicit_fields: Option<Vec<(String, String)>>,
    serializable: bool,
    external: bool,
    enum_constants: Option<Vec<String>>,
    proxy_interfaces: Option<Vec<String>>,
    harness: Harness,
    initializer: Option<InitFn>,
}

impl ClassSpec {
    pub fn new(name: &str) -> ClassSpec {
        ClassSpec {
            name: name.to_string(),
            parent: None,
            version_id: None,
            fields: Vec::new(),
            explicit_fields: None,
            serializable: true,
            external: false,
            enum_constants: None,
            proxy_interfaces: None,
            harness: Harness::default(),
            initializer: None,
        }
    }

    /// Declares a field by name and signature (`I`, `J`, `Lpoint;`, `[D`, ...).
    pub fn field(mut self, name: &str, signature: &str) -> Self {
        self.fields.push((name.to_string(), signature.to_string()));
        self
    }

    /// Declares an explicit serial-field list. When present it is used
    /// exactly as given instead of the default field enumeration; a
    /// malformed list fails descriptor construction with InvalidClass.
    pub fn serial_fields(mut self, fields: &[(&str, &str)]) -> Self {
        self.explicit_fields = Some(
            fields
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
        );
        self
    }

    pub fn parent(mut self, name: &str) -> Self {
        self.parent = Some(name.to_string());
        self
    }

    /// Declares an explicit version id, suppressing the structural digest.
    pub fn version_id(mut self, id: i64) -> Self {
        self.version_id = Some(id);
        self
    }

    pub fn write_hook(mut self, hook: WriteHookFn) -> Self {
        self.harness.write_hook = Some(hook);
        self
    }

    pub fn read_hook(mut self, hook: ReadHookFn) -> Self {
        self.harness.read_hook = Some(hook);
        self
    }

    pub fn write_replace(mut self, hook: ReplaceFn) -> Self {
        self.harness.write_replace = Some(hook);
        self
    }

    pub fn read_resolve(mut self, hook: ReplaceFn) -> Self {
        self.harness.read_resolve = Some(hook);
        self
    }

    /// Marks the type as fully hook-encoded: no default field data is
    /// written, the hooks produce and consume everything.
    pub fn external(mut self, write: WriteHookFn, read: ReadHookFn) -> Self {
        self.external = true;
        self.harness.write_hook = Some(write);
        self.harness.read_hook = Some(read);
        self
    }

    /// Declares an enum type with the given constants, in ordinal order.
    pub fn enumeration(mut self, constants: &[&str]) -> Self {
        self.enum_constants = Some(constants.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Declares a dynamic-proxy type implementing the given interfaces.
    /// Proxies carry no fields of their own; state lives in the superclass.
    pub fn proxy(mut self, interfaces: &[&str]) -> Self {
        self.proxy_interfaces = Some(interfaces.iter().map(|i| i.to_string()).collect());
        self
    }

    /// Marks the type as non-serializable. It may still appear as an
    /// ancestor of serializable classes if it has an [`initializer`].
    ///
    /// [`initializer`]: ClassSpec::initializer
    pub fn not_serializable(mut self) -> Self {
        self.serializable = false;
        self
    }

    /// Zero-argument initializer used to rebuild this (non-serializable)
    /// level of an instance, since its fields never travel on the wire.
    pub fn initializer(mut self, init: InitFn) -> Self {
        self.initializer = Some(init);
        self
    }
}

enum CellState {
    Idle,
    Building(ThreadId),
    Ready(Arc<TypeDescriptor>),
    Failed(String),
}

struct BuildCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

impl Default for BuildCell {
    fn default() -> Self {
        BuildCell {
            state: Mutex::new(CellState::Idle),
            ready: Condvar::new(),
        }
    }
}

/// Process-wide (or test-local) descriptor registry.
pub struct TypeRegistry {
    specs: RwLock<HashMap<String, ClassSpec>>,
    cells: Mutex<HashMap<String, Arc<BuildCell>>>,
    arrays: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry::new()
    }
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry {
            specs: RwLock::new(HashMap::new()),
            cells: Mutex::new(HashMap::new()),
            arrays: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a type. Registration must precede the type's first use;
    /// once a descriptor has been derived the definition is frozen.
    pub fn register(&self, spec: ClassSpec) -> Result<(), Error> {
        if spec.name.is_empty() || spec.name.starts_with('[') {
            return Err(Error::invalid_class(format!(
                "`{}` is not a registrable type name",
                spec.name
            )));
        }
        {
            let cells = self.cells.lock();
            if let Some(cell) = cells.get(&spec.name) {
                let state = cell.state.lock();
                if matches!(*state, CellState::Ready(_) | CellState::Failed(_)) {
                    return Err(Error::invalid_class(format!(
                        "type `{}` is already resolved; registration must precede first use",
                        spec.name
                    )));
                }
            }
        }
        log::debug!("registering type `{}`", spec.name);
        self.specs.write().insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Looks up the descriptor of a serializable type.
    pub fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        let desc = self.get_or_build(name)?;
        if !desc.is_serializable() {
            return Err(Error::not_serializable(format!(
                "class `{}` has no serialization capability",
                name
            )));
        }
        Ok(desc)
    }

    /// Looks up a descriptor for reflective introspection. Never fails:
    /// unknown or malformed types yield a bare, non-serializable descriptor.
    pub fn lookup_any(&self, name: &str) -> Arc<TypeDescriptor> {
        match self.get_or_build(name) {
            Ok(desc) => desc,
            Err(_) => TypeDescriptor::opaque(name),
        }
    }

    /// Resolves a streamed class by name and version id.
    ///
    /// Unregistered names are [`Error::ClassNotFound`] (deferred by the
    /// decoder); a registered name whose local version id differs from the
    /// stream's is [`Error::InvalidClass`] naming both ids.
    pub fn resolve_by_name(
        &self,
        name: &str,
        version_id: i64,
    ) -> Result<Arc<TypeDescriptor>, Error> {
        let desc = if name.starts_with('[') {
            self.array_descriptor(name)?
        } else {
            self.get_or_build(name)?
        };
        if desc.version_id() != version_id {
            return Err(Error::invalid_class(format!(
                "`{}`: local version id {} is incompatible with stream version id {}",
                name,
                desc.version_id(),
                version_id
            )));
        }
        Ok(desc)
    }

    /// Resolves a streamed proxy descriptor by its interface set.
    pub fn resolve_proxy(&self, interfaces: &[String]) -> Result<Arc<TypeDescriptor>, Error> {
        let mut wanted: Vec<&String> = interfaces.iter().collect();
        wanted.sort();
        let name = {
            let specs = self.specs.read();
            specs
                .values()
                .find(|s| {
                    s.proxy_interfaces.as_ref().is_some_and(|ifaces| {
                        let mut have: Vec<&String> = ifaces.iter().collect();
                        have.sort();
                        have == wanted
                    })
                })
                .map(|s| s.name.clone())
        };
        match name {
            Some(n) => self.get_or_build(&n),
            None => Err(Error::class_not_found(format!(
                "no proxy type implementing [{}]",
                interfaces.join(", ")
            ))),
        }
    }

    /// Synthesizes (and caches) the descriptor of an array type from its
    /// signature, e.g. `[I` or `[Lpoint;`.
    pub fn array_descriptor(&self, signature: &str) -> Result<Arc<TypeDescriptor>, Error> {
        if let Some(desc) = self.arrays.read().get(signature) {
            return Ok(desc.clone());
        }
        if !signature.starts_with('[') {
            return Err(Error::invalid_class(format!(
                "`{}` is not an array signature",
                signature
            )));
        }
        let elem = TypeCode::from_signature(&signature[1..])?;
        let version_id = structural_version_id(signature, KIND_ARRAY, None, &[], &[]);
        let desc = Arc::new(TypeDescriptor {
            name: signature.to_string(),
            version_id,
            fields: Vec::new(),
            parent: None,
            harness: Harness::default(),
            serializable: true,
            external: false,
            is_enum: false,
            is_proxy: false,
            is_array: true,
            provisional: false,
            enum_constants: Vec::new(),
            proxy_interfaces: Vec::new(),
            array_elem: Some(elem),
            initializer: None,
        });
        // first inserter wins a racing synthesis
        Ok(self
            .arrays
            .write()
            .entry(signature.to_string())
            .or_insert(desc)
            .clone())
    }

    fn get_or_build(&self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        let cell = {
            let mut cells = self.cells.lock();
            cells
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(BuildCell::default()))
                .clone()
        };
        {
            let mut state = cell.state.lock();
            loop {
                let wait = match &*state {
                    CellState::Ready(desc) => return Ok(desc.clone()),
                    CellState::Failed(msg) => return Err(Error::invalid_class(msg.clone())),
                    CellState::Building(owner) => {
                        if *owner == thread::current().id() {
                            log::trace!(
                                "re-entrant lookup of `{}` during its own construction",
                                name
                            );
                            return Ok(TypeDescriptor::provisional(name));
                        }
                        true
                    }
                    CellState::Idle => false,
                };
                if wait {
                    cell.ready.wait(&mut state);
                } else {
                    *state = CellState::Building(thread::current().id());
                    break;
                }
            }
        }
        let result = self.build_descriptor(name);
        {
            let mut state = cell.state.lock();
            *state = match &result {
                Ok(desc) => CellState::Ready(desc.clone()),
                // unregistered stays retryable; a later registration may fix it
                Err(Error::ClassNotFound(_)) => CellState::Idle,
                Err(e) => CellState::Failed(raw_message(e)),
            };
            cell.ready.notify_all();
        }
        result
    }

    fn build_descriptor(&self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        let spec = self.specs.read().get(name).cloned().ok_or_else(|| {
            Error::class_not_found(format!("type `{}` is not registered", name))
        })?;

        if let Some(constants) = &spec.enum_constants {
            return build_enum(&spec, constants);
        }

        if spec.external && (spec.harness.write_hook.is_none() || spec.harness.read_hook.is_none())
        {
            return Err(Error::invalid_class(format!(
                "external type `{}` must provide both a write and a read hook",
                name
            )));
        }

        let is_proxy = spec.proxy_interfaces.is_some();
        if is_proxy {
            if !spec.fields.is_empty() || spec.explicit_fields.is_some() {
                return Err(Error::invalid_class(format!(
                    "proxy `{}` cannot declare fields; state belongs in its superclass",
                    name
                )));
            }
            if spec.harness.write_hook.is_some() || spec.harness.read_hook.is_some() {
                return Err(Error::invalid_class(format!(
                    "proxy `{}` cannot declare read or write hooks",
                    name
                )));
            }
        }

        let fields = enumerate_fields(&spec)?;

        let parent = match &spec.parent {
            Some(p) => Some(self.get_or_build(p).map_err(|e| {
                Error::invalid_class(format!("superclass `{}` of `{}`: {}", p, name, e))
            })?),
            None => None,
        };

        // chain validation: no placeholders, and every non-serializable
        // ancestor of a serializable class must be reconstructible
        let mut cursor = parent.clone();
        while let Some(ancestor) = cursor {
            if ancestor.is_provisional() {
                return Err(Error::invalid_class(format!(
                    "circular superclass chain involving `{}`",
                    ancestor.name()
                )));
            }
            if spec.serializable
                && !ancestor.is_serializable()
                && ancestor.initializer().is_none()
            {
                return Err(Error::invalid_class(format!(
                    "inaccessible ancestor constructor: `{}` has no zero-argument \
                     initializer reachable from `{}`",
                    ancestor.name(),
                    name
                )));
            }
            cursor = ancestor.parent().cloned();
        }

        let kind = kind_bits(false, spec.external, is_proxy);
        let version_id = spec.version_id.unwrap_or_else(|| {
            structural_version_id(
                name,
                kind,
                spec.parent.as_deref(),
                &hook_markers(&spec),
                &digest_fields(&fields),
            )
        });

        let desc = Arc::new(TypeDescriptor {
            name: name.to_string(),
            version_id,
            fields,
            parent,
            harness: spec.harness,
            serializable: spec.serializable,
            external: spec.external,
            is_enum: false,
            is_proxy,
            is_array: false,
            provisional: false,
            enum_constants: Vec::new(),
            proxy_interfaces: spec.proxy_interfaces.clone().unwrap_or_default(),
            array_elem: None,
            initializer: spec.initializer,
        });
        log::debug!(
            "built descriptor for `{}` (version id {})",
            name,
            desc.version_id()
        );
        Ok(desc)
    }
}

const KIND_ENUM: u8 = 0x01;
const KIND_EXTERNAL: u8 = 0x02;
const KIND_PROXY: u8 = 0x04;
const KIND_ARRAY: u8 = 0x08;

fn kind_bits(is_enum: bool, external: bool, is_proxy: bool) -> u8 {
    let mut kind = 0;
    if is_enum {
        kind |= KIND_ENUM;
    }
    if external {
        kind |= KIND_EXTERNAL;
    }
    if is_proxy {
        kind |= KIND_PROXY;
    }
    kind
}

fn hook_markers(spec: &ClassSpec) -> Vec<&'static str> {
    let mut markers = Vec::new();
    if spec.harness.write_hook.is_some() {
        markers.push("write_hook");
    }
    if spec.harness.read_hook.is_some() {
        markers.push("read_hook");
    }
    if spec.external {
        markers.push("external");
    }
    markers
}

fn digest_fields(fields: &[FieldDescriptor]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|f| {
            let sig = f
                .signature
                .clone()
                .unwrap_or_else(|| (f.code as u8 as char).to_string());
            (f.name.clone(), sig)
        })
        .collect()
}

fn enumerate_fields(spec: &ClassSpec) -> Result<Vec<FieldDescriptor>, Error> {
    let explicit = spec.explicit_fields.is_some();
    let raw = spec
        .explicit_fields
        .as_ref()
        .unwrap_or(&spec.fields);

    let mut seen = HashSet::new();
    for (fname, _) in raw {
        if !seen.insert(fname.as_str()) {
            return Err(Error::invalid_class(format!(
                "duplicate field `{}` in {} of `{}`",
                fname,
                if explicit {
                    "explicit field list"
                } else {
                    "declared fields"
                },
                spec.name
            )));
        }
    }

    let mut fields = Vec::with_capacity(raw.len());
    for (fname, sig) in raw {
        let code = TypeCode::from_signature(sig).map_err(|e| {
            Error::invalid_class(format!("field `{}` of `{}`: {}", fname, spec.name, e))
        })?;
        fields.push(FieldDescriptor {
            name: fname.clone(),
            code,
            signature: (!code.is_primitive()).then(|| sig.clone()),
        });
    }

    // default enumeration order is part of the wire contract; an explicit
    // list is used exactly as declared
    if !explicit {
        fields.sort_by(|a, b| {
            b.code
                .is_primitive()
                .cmp(&a.code.is_primitive())
                .then_with(|| a.name.cmp(&b.name))
        });
    }
    Ok(fields)
}

fn build_enum(spec: &ClassSpec, constants: &[String]) -> Result<Arc<TypeDescriptor>, Error> {
    if spec.parent.is_some() {
        return Err(Error::invalid_class(format!(
            "enum `{}` cannot declare a superclass",
            spec.name
        )));
    }
    if !spec.fields.is_empty() || spec.explicit_fields.is_some() {
        return Err(Error::invalid_class(format!(
            "enum `{}` cannot declare serial fields",
            spec.name
        )));
    }
    let mut seen = HashSet::new();
    for c in constants {
        if !seen.insert(c.as_str()) {
            return Err(Error::invalid_class(format!(
                "duplicate constant `{}` in enum `{}`",
                c, spec.name
            )));
        }
    }
    let digest: Vec<(String, String)> = constants
        .iter()
        .map(|c| (c.clone(), String::new()))
        .collect();
    let version_id = spec.version_id.unwrap_or_else(|| {
        structural_version_id(&spec.name, kind_bits(true, false, false), None, &[], &digest)
    });
    let name = spec.name.clone();
    let harness = spec.harness;
    let constants = constants.to_vec();
    Ok(Arc::new_cyclic(|weak| TypeDescriptor {
        name,
        version_id,
        fields: Vec::new(),
        parent: None,
        harness,
        serializable: true,
        external: false,
        is_enum: true,
        is_proxy: false,
        is_array: false,
        provisional: false,
        enum_constants: constants
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Arc::new(EnumConstant {
                    class: weak.clone(),
                    name: c.clone(),
                    ordinal: i as u32,
                })
            })
            .collect(),
        proxy_interfaces: Vec::new(),
        array_elem: None,
        initializer: None,
    }))
}

fn raw_message(e: &Error) -> String {
    match e {
        Error::InvalidClass(m) => m.to_string(),
        other => other.to_string(),
    }
}
