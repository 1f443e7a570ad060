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

//! The dynamic value model.
//!
//! A stream carries [`Value`]s. Primitive kinds are plain copies; string,
//! object, array, enum and class-literal kinds are reference-counted so that
//! two fields holding the same value share identity, which is what the
//! handle table tracks. A [`Value`] is deliberately `!Send`: one stream is
//! always driven by a single thread.
//!
//! Equality is structural (two separately built graphs with the same shape
//! compare equal); identity is compared through the underlying pointers,
//! e.g. `Rc::ptr_eq`. Structural equality recurses and is therefore not
//! usable on cyclic graphs; use identity assertions for those.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::Error;
use crate::meta::descriptor::{EnumConstant, TypeDescriptor};
use crate::types::TypeCode;

/// A value in an object graph.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A UTF-16 code unit, as stored in `char` fields and char arrays.
    Char(u16),
    Str(Rc<String>),
    Object(Rc<Instance>),
    Array(Rc<ArrayValue>),
    Enum(Arc<EnumConstant>),
    Class(Arc<TypeDescriptor>),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    /// The identity of a reference value: the address of its shared
    /// allocation. `None` for primitives and null.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::as_ptr(s) as usize),
            Value::Object(o) => Some(Rc::as_ptr(o) as usize),
            Value::Array(a) => Some(Rc::as_ptr(a) as usize),
            Value::Enum(c) => Some(Arc::as_ptr(c) as usize),
            Value::Class(d) => Some(Arc::as_ptr(d) as usize),
            _ => None,
        }
    }

    /// Whether this value may sit in an object or array field.
    pub fn is_reference_kind(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Str(_)
                | Value::Object(_)
                | Value::Array(_)
                | Value::Enum(_)
                | Value::Class(_)
        )
    }

    /// The zero value a freshly constructed field of the given code holds.
    pub fn default_for(code: TypeCode) -> Value {
        match code {
            TypeCode::Bool => Value::Bool(false),
            TypeCode::I8 => Value::I8(0),
            TypeCode::Char => Value::Char(0),
            TypeCode::I16 => Value::I16(0),
            TypeCode::I32 => Value::I32(0),
            TypeCode::I64 => Value::I64(0),
            TypeCode::F32 => Value::F32(0.0),
            TypeCode::F64 => Value::F64(0.0),
            TypeCode::Object | TypeCode::Array => Value::Null,
        }
    }

    /// Whether this value is storable in a field of the given code.
    pub fn matches_code(&self, code: TypeCode) -> bool {
        match code {
            TypeCode::Bool => matches!(self, Value::Bool(_)),
            TypeCode::I8 => matches!(self, Value::I8(_)),
            TypeCode::Char => matches!(self, Value::Char(_)),
            TypeCode::I16 => matches!(self, Value::I16(_)),
            TypeCode::I32 => matches!(self, Value::I32(_)),
            TypeCode::I64 => matches!(self, Value::I64(_)),
            TypeCode::F32 => matches!(self, Value::F32(_)),
            TypeCode::F64 => matches!(self, Value::F64(_)),
            TypeCode::Object | TypeCode::Array => self.is_reference_kind(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Enum(_) => "enum",
            Value::Class(_) => "class",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            Value::I8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Value::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<u16> {
        match self {
            Value::Char(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<Instance>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<ArrayValue>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Arc<EnumConstant>> {
        match self {
            Value::Enum(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            Value::Class(d) => Some(d),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || a.structural_eq(b),
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.class().name() == b.class().name() && *a.data.borrow() == *b.data.borrow())
            }
            (Value::Enum(a), Value::Enum(b)) => {
                Arc::ptr_eq(a, b) || (a.name == b.name && a.class().name() == b.class().name())
            }
            (Value::Class(a), Value::Class(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

/// An instance of a registered class: one field map per level of the
/// descriptor chain, pre-filled with type-code defaults (and, for
/// non-serializable ancestor levels, the values their zero-argument
/// initializer produces).
pub struct Instance {
    desc: Arc<TypeDescriptor>,
    chain: Vec<Arc<TypeDescriptor>>,
    fields: RefCell<Vec<HashMap<String, Value>>>,
}

impl Instance {
    pub fn new(desc: &Arc<TypeDescriptor>) -> Rc<Instance> {
        let chain = TypeDescriptor::chain(desc);
        let mut levels = Vec::with_capacity(chain.len());
        for level in &chain {
            let mut map: HashMap<String, Value> = level
                .fields()
                .iter()
                .map(|f| (f.name.clone(), Value::default_for(f.code)))
                .collect();
            if !level.is_serializable() {
                if let Some(init) = level.initializer() {
                    for (name, value) in init() {
                        map.insert(name, value);
                    }
                }
            }
            levels.push(map);
        }
        Rc::new(Instance {
            desc: desc.clone(),
            chain,
            fields: RefCell::new(levels),
        })
    }

    pub fn class(&self) -> &Arc<TypeDescriptor> {
        &self.desc
    }

    /// Descriptor chain, root ancestor first.
    pub fn chain_levels(&self) -> &[Arc<TypeDescriptor>] {
        &self.chain
    }

    /// Reads a field, searching from the concrete class up the chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let fields = self.fields.borrow();
        for map in fields.iter().rev() {
            if let Some(v) = map.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    /// Writes a field, searching from the concrete class up the chain.
    /// The value must match the declared field code.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        for (idx, level) in self.chain.iter().enumerate().rev() {
            if let Some(fd) = level.field(name) {
                if !value.matches_code(fd.code) {
                    return Err(Error::invalid_class(format!(
                        "field `{}` of `{}` expects {}, got {}",
                        name,
                        level.name(),
                        fd.code,
                        value.kind_name()
                    )));
                }
                self.fields.borrow_mut()[idx].insert(name.to_string(), value);
                return Ok(());
            }
            // non-serializable levels may hold initializer-provided state
            if self.fields.borrow()[idx].contains_key(name) {
                self.fields.borrow_mut()[idx].insert(name.to_string(), value);
                return Ok(());
            }
        }
        Err(Error::invalid_class(format!(
            "no field `{}` in class `{}`",
            name,
            self.desc.name()
        )))
    }

    pub(crate) fn get_at(&self, level: usize, name: &str) -> Option<Value> {
        self.fields.borrow()[level].get(name).cloned()
    }

    pub(crate) fn set_at(&self, level: usize, name: &str, value: Value) {
        self.fields.borrow_mut()[level].insert(name.to_string(), value);
    }

    fn structural_eq(&self, other: &Instance) -> bool {
        if self.desc.name() != other.desc.name() || self.chain.len() != other.chain.len() {
            return false;
        }
        *self.fields.borrow() == *other.fields.borrow()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instance({})", self.desc.name())
    }
}

/// A typed array value.
pub struct ArrayValue {
    desc: Arc<TypeDescriptor>,
    pub data: RefCell<ArrayData>,
}

impl ArrayValue {
    /// Creates an array whose element storage matches the descriptor's
    /// element code.
    pub fn new(desc: &Arc<TypeDescriptor>, data: ArrayData) -> Result<Rc<ArrayValue>, Error> {
        let elem = desc.array_elem().ok_or_else(|| {
            Error::invalid_class(format!("`{}` is not an array type", desc.name()))
        })?;
        let ok = match &data {
            ArrayData::Ref(_) => !elem.is_primitive(),
            other => other.code() == elem,
        };
        if !ok {
            return Err(Error::invalid_class(format!(
                "array `{}` cannot hold {} elements",
                desc.name(),
                data.code()
            )));
        }
        Ok(Rc::new(ArrayValue {
            desc: desc.clone(),
            data: RefCell::new(data),
        }))
    }

    pub fn class(&self) -> &Arc<TypeDescriptor> {
        &self.desc
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ArrayValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArrayValue({}, len {})", self.desc.name(), self.len())
    }
}

/// Element storage of an array, one variant per element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Char(Vec<u16>),
    Ref(Vec<Value>),
}

impl ArrayData {
    pub fn code(&self) -> TypeCode {
        match self {
            ArrayData::Bool(_) => TypeCode::Bool,
            ArrayData::I8(_) => TypeCode::I8,
            ArrayData::I16(_) => TypeCode::I16,
            ArrayData::I32(_) => TypeCode::I32,
            ArrayData::I64(_) => TypeCode::I64,
            ArrayData::F32(_) => TypeCode::F32,
            ArrayData::F64(_) => TypeCode::F64,
            ArrayData::Char(_) => TypeCode::Char,
            ArrayData::Ref(_) => TypeCode::Object,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::I8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Ref(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
