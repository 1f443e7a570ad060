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

//! The object writer.
//!
//! Walks a value graph and emits the tagged stream: primitives as
//! fixed-width big-endian fields, strings as length-prefixed modified UTF-8
//! (long form above the 16-bit threshold), objects as descriptor plus
//! per-level data from the root ancestor down, arrays as element descriptor
//! plus length plus elements. Every reference value is checked against the
//! handle table first and back-referenced when already emitted; unshared
//! writes skip the table entirely for the top value.
//!
//! A failure thrown from a custom write hook aborts the whole stream: an
//! exception marker is emitted, the encoder is poisoned, and every further
//! write is rejected.

use std::rc::Rc;
use std::sync::Arc;

use crate::block::BlockOut;
use crate::buffer::Writer;
use crate::ensure;
use crate::error::Error;
use crate::meta::descriptor::{EnumConstant, FieldDescriptor, TypeDescriptor};
use crate::meta::mutf8;
use crate::resolver::handle_table::HandleWriter;
use crate::resolver::type_registry::TypeRegistry;
use crate::types::{Tag, TypeCode, SHORT_STRING_LIMIT, STREAM_MAGIC, STREAM_VERSION};
use crate::value::{ArrayData, ArrayValue, Instance, Value};

/// A descriptor and the class literal it denotes are distinct stream
/// entities backed by the same allocation; the literal's identity key is
/// offset so each gets its own handle.
const LITERAL_KEY: usize = 1;

pub struct ObjectEncoder {
    registry: Arc<TypeRegistry>,
    writer: Writer,
    handles: HandleWriter,
    depth: u32,
    poisoned: bool,
}

impl ObjectEncoder {
    pub(crate) fn new(registry: Arc<TypeRegistry>) -> ObjectEncoder {
        let mut writer = Writer::default();
        writer.write_u16(STREAM_MAGIC);
        writer.write_u16(STREAM_VERSION);
        ObjectEncoder {
            registry,
            writer,
            handles: HandleWriter::new(),
            depth: 0,
            poisoned: false,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Writes one value graph, sharing reference identity with everything
    /// written before on this stream.
    pub fn write_object(&mut self, value: &Value) -> Result<(), Error> {
        self.write_top(value, false)
    }

    /// Writes one value graph without recording the top value in the handle
    /// table: it is always freshly encoded and never back-referenceable.
    pub fn write_unshared(&mut self, value: &Value) -> Result<(), Error> {
        self.write_top(value, true)
    }

    /// Emits a reset marker and drops every handle. Only legal between
    /// top-level values.
    pub fn reset(&mut self) -> Result<(), Error> {
        ensure!(
            !self.poisoned,
            Error::not_active("stream poisoned by an earlier write failure")
        );
        ensure!(
            self.depth == 0,
            Error::not_active("reset is not allowed while an object graph is being written")
        );
        self.writer.write_u8(Tag::Reset as u8);
        self.handles.clear();
        log::trace!("stream reset, handle table cleared");
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.writer.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    fn write_top(&mut self, value: &Value, unshared: bool) -> Result<(), Error> {
        ensure!(
            !self.poisoned,
            Error::not_active("stream poisoned by an earlier write failure")
        );
        ensure!(
            value.is_reference_kind(),
            Error::not_serializable(format!(
                "top-level {} value; only reference values can head a graph",
                value.kind_name()
            ))
        );
        match self.write_value(value, unshared) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = true;
                self.writer.write_u8(Tag::Exception as u8);
                Err(e)
            }
        }
    }

    fn write_value(&mut self, value: &Value, unshared: bool) -> Result<(), Error> {
        let value = self.apply_write_replace(value)?;
        match &value {
            Value::Null => {
                self.writer.write_u8(Tag::Null as u8);
                Ok(())
            }
            Value::Str(s) => self.write_string(s, unshared),
            Value::Object(inst) => self.write_instance(inst, unshared),
            Value::Array(arr) => self.write_array(arr, unshared),
            Value::Enum(constant) => self.write_enum(constant, unshared),
            Value::Class(desc) => self.write_class_literal(desc, unshared),
            other => Err(Error::not_serializable(format!(
                "cannot write a bare {} value",
                other.kind_name()
            ))),
        }
    }

    /// Runs the write-replace chain. A hook returning its argument or a
    /// value of the same class terminates substitution; an identity cycle
    /// is an error.
    fn apply_write_replace(&mut self, value: &Value) -> Result<Value, Error> {
        let mut current = value.clone();
        let mut seen_ids: Vec<usize> = Vec::new();
        let mut seen_classes: Vec<String> = Vec::new();
        loop {
            let Value::Object(inst) = &current else {
                return Ok(current);
            };
            let desc = inst.class().clone();
            let Some(replace) = desc.harness().write_replace else {
                return Ok(current);
            };
            let id = current.identity().expect("objects have identity");
            if seen_ids.contains(&id) {
                return Err(Error::invalid_object(format!(
                    "write-replace cycle detected for class `{}`",
                    desc.name()
                )));
            }
            seen_ids.push(id);
            seen_classes.push(desc.name().to_string());
            let next = replace(&current)?;
            if next.identity() == Some(id) {
                return Ok(current);
            }
            if let Value::Object(next_inst) = &next {
                let next_class = next_inst.class().name();
                // a replacement of the same class terminates substitution
                if next_class == desc.name() {
                    return Ok(next);
                }
                if seen_classes.iter().any(|c| c == next_class) {
                    return Err(Error::invalid_object(format!(
                        "write-replace cycle between `{}` and `{}`",
                        desc.name(),
                        next_class
                    )));
                }
            }
            current = next;
        }
    }

    fn write_string(&mut self, s: &Rc<String>, unshared: bool) -> Result<(), Error> {
        let identity = Rc::as_ptr(s) as usize;
        if !unshared {
            if let Some(handle) = self.handles.get(identity) {
                return self.write_reference(handle);
            }
        }
        let bytes = mutf8::encode(s);
        if bytes.len() <= SHORT_STRING_LIMIT {
            self.writer.write_u8(Tag::String as u8);
            self.writer.write_u16(bytes.len() as u16);
        } else {
            self.writer.write_u8(Tag::LongString as u8);
            self.writer.write_u64(bytes.len() as u64);
        }
        self.writer.write_bytes(&bytes);
        if !unshared {
            self.handles.assign(identity);
        }
        Ok(())
    }

    fn write_reference(&mut self, handle: u32) -> Result<(), Error> {
        self.writer.write_u8(Tag::Reference as u8);
        self.writer.write_u32(handle);
        Ok(())
    }

    /// Plain length-prefixed name, no tag and no handle.
    fn write_utf(&mut self, s: &str) -> Result<(), Error> {
        let bytes = mutf8::encode(s);
        ensure!(
            bytes.len() <= u16::MAX as usize,
            Error::invalid_class(format!("name of {} encoded bytes is too long", bytes.len()))
        );
        self.writer.write_u16(bytes.len() as u16);
        self.writer.write_bytes(&bytes);
        Ok(())
    }

    /// Field signature written as a string value occupying one anonymous
    /// handle slot; signatures are never back-referenced.
    fn write_sig_string(&mut self, sig: &str) -> Result<(), Error> {
        let bytes = mutf8::encode(sig);
        self.writer.write_u8(Tag::String as u8);
        self.writer.write_u16(bytes.len() as u16);
        self.writer.write_bytes(&bytes);
        self.handles.assign_anonymous();
        Ok(())
    }

    fn write_class_desc(&mut self, desc: &Arc<TypeDescriptor>) -> Result<(), Error> {
        let identity = Arc::as_ptr(desc) as usize;
        if let Some(handle) = self.handles.get(identity) {
            return self.write_reference(handle);
        }
        if desc.is_proxy() {
            self.writer.write_u8(Tag::ProxyClassDesc as u8);
            self.handles.assign(identity);
            let interfaces = desc.proxy_interfaces();
            self.writer.write_u16(interfaces.len() as u16);
            for iface in interfaces {
                self.write_utf(iface)?;
            }
        } else {
            self.writer.write_u8(Tag::ClassDesc as u8);
            self.write_utf(desc.name())?;
            self.writer.write_i64(desc.version_id());
            self.handles.assign(identity);
            self.writer.write_u8(desc.flags_byte());
            let fields = desc.fields();
            ensure!(
                fields.len() <= u16::MAX as usize,
                Error::invalid_class(format!(
                    "class `{}` declares too many fields",
                    desc.name()
                ))
            );
            self.writer.write_u16(fields.len() as u16);
            for field in fields {
                self.writer.write_u8(field.code as u8);
                self.write_utf(&field.name)?;
                if let Some(sig) = &field.signature {
                    self.write_sig_string(sig)?;
                }
            }
        }
        match TypeDescriptor::wire_parent(desc) {
            Some(parent) => self.write_class_desc(&parent),
            None => {
                self.writer.write_u8(Tag::Null as u8);
                Ok(())
            }
        }
    }

    fn write_instance(&mut self, inst: &Rc<Instance>, unshared: bool) -> Result<(), Error> {
        let desc = inst.class().clone();
        ensure!(
            desc.is_serializable(),
            Error::not_serializable(format!(
                "class `{}` has no serialization capability",
                desc.name()
            ))
        );
        let identity = Rc::as_ptr(inst) as usize;
        if !unshared {
            if let Some(handle) = self.handles.get(identity) {
                return self.write_reference(handle);
            }
        }
        self.writer.write_u8(Tag::Object as u8);
        self.write_class_desc(&desc)?;
        if !unshared {
            self.handles.assign(identity);
        }
        self.depth += 1;
        let result = self.write_levels(inst, &desc);
        self.depth -= 1;
        result
    }

    fn write_levels(&mut self, inst: &Rc<Instance>, desc: &Arc<TypeDescriptor>) -> Result<(), Error> {
        let chain = TypeDescriptor::chain(desc);
        for (idx, level) in chain.iter().enumerate() {
            if !level.is_serializable() {
                continue;
            }
            if let Some(hook) = level.harness().write_hook {
                // a hooked level's field data always precedes its custom
                // data, so readers can locate both without guessing
                if !level.is_external() {
                    self.write_default_fields(inst, level, idx)?;
                }
                let mut hw = HookWriter {
                    enc: self,
                    block: BlockOut::new(),
                    external: level.is_external(),
                };
                hook(inst, &mut hw)?;
                hw.finish();
            } else {
                self.write_default_fields(inst, level, idx)?;
            }
        }
        Ok(())
    }

    fn write_default_fields(
        &mut self,
        inst: &Instance,
        level: &Arc<TypeDescriptor>,
        level_idx: usize,
    ) -> Result<(), Error> {
        for field in level.fields() {
            let value = inst
                .get_at(level_idx, &field.name)
                .unwrap_or_else(|| Value::default_for(field.code));
            self.write_field_value(level, field, &value)?;
        }
        Ok(())
    }

    fn write_field_value(
        &mut self,
        owner: &TypeDescriptor,
        field: &FieldDescriptor,
        value: &Value,
    ) -> Result<(), Error> {
        if !value.matches_code(field.code) {
            return Err(Error::invalid_class(format!(
                "field `{}` of `{}` expects {}, got {}",
                field.name,
                owner.name(),
                field.code,
                value.kind_name()
            )));
        }
        match field.code {
            TypeCode::Bool => self.writer.write_u8(value.as_bool().unwrap() as u8),
            TypeCode::I8 => self.writer.write_i8(value.as_i8().unwrap()),
            TypeCode::Char => self.writer.write_u16(value.as_char().unwrap()),
            TypeCode::I16 => self.writer.write_i16(value.as_i16().unwrap()),
            TypeCode::I32 => self.writer.write_i32(value.as_i32().unwrap()),
            TypeCode::I64 => self.writer.write_i64(value.as_i64().unwrap()),
            TypeCode::F32 => self.writer.write_f32(value.as_f32().unwrap()),
            TypeCode::F64 => self.writer.write_f64(value.as_f64().unwrap()),
            TypeCode::Object | TypeCode::Array => return self.write_value(value, false),
        }
        Ok(())
    }

    fn write_array(&mut self, arr: &Rc<ArrayValue>, unshared: bool) -> Result<(), Error> {
        let identity = Rc::as_ptr(arr) as usize;
        if !unshared {
            if let Some(handle) = self.handles.get(identity) {
                return self.write_reference(handle);
            }
        }
        self.writer.write_u8(Tag::Array as u8);
        self.write_class_desc(arr.class())?;
        if !unshared {
            self.handles.assign(identity);
        }
        let data = arr.data.borrow();
        ensure!(
            data.len() <= u32::MAX as usize,
            Error::not_serializable(format!("array of {} elements is too long", data.len()))
        );
        self.writer.write_u32(data.len() as u32);
        match &*data {
            ArrayData::Bool(v) => v.iter().for_each(|b| self.writer.write_u8(*b as u8)),
            ArrayData::I8(v) => v.iter().for_each(|x| self.writer.write_i8(*x)),
            ArrayData::I16(v) => v.iter().for_each(|x| self.writer.write_i16(*x)),
            ArrayData::I32(v) => v.iter().for_each(|x| self.writer.write_i32(*x)),
            ArrayData::I64(v) => v.iter().for_each(|x| self.writer.write_i64(*x)),
            ArrayData::F32(v) => v.iter().for_each(|x| self.writer.write_f32(*x)),
            ArrayData::F64(v) => v.iter().for_each(|x| self.writer.write_f64(*x)),
            ArrayData::Char(v) => v.iter().for_each(|x| self.writer.write_u16(*x)),
            ArrayData::Ref(v) => {
                let elems = v.clone();
                drop(data);
                for elem in &elems {
                    ensure!(
                        elem.is_reference_kind(),
                        Error::not_serializable(format!(
                            "array `{}` holds a bare {} element",
                            arr.class().name(),
                            elem.kind_name()
                        ))
                    );
                    self.write_value(elem, false)?;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    fn write_enum(&mut self, constant: &Arc<EnumConstant>, unshared: bool) -> Result<(), Error> {
        let identity = Arc::as_ptr(constant) as usize;
        if !unshared {
            if let Some(handle) = self.handles.get(identity) {
                return self.write_reference(handle);
            }
        }
        self.writer.write_u8(Tag::Enum as u8);
        let desc = constant.class();
        self.write_class_desc(&desc)?;
        if !unshared {
            self.handles.assign(identity);
        }
        // constant name: a fresh string value occupying one handle slot
        let bytes = mutf8::encode(&constant.name);
        self.writer.write_u8(Tag::String as u8);
        self.writer.write_u16(bytes.len() as u16);
        self.writer.write_bytes(&bytes);
        self.handles.assign_anonymous();
        Ok(())
    }

    fn write_class_literal(&mut self, desc: &Arc<TypeDescriptor>, unshared: bool) -> Result<(), Error> {
        let identity = (Arc::as_ptr(desc) as usize) | LITERAL_KEY;
        if !unshared {
            if let Some(handle) = self.handles.get(identity) {
                return self.write_reference(handle);
            }
        }
        self.writer.write_u8(Tag::ClassLiteral as u8);
        self.write_class_desc(desc)?;
        if !unshared {
            self.handles.assign(identity);
        }
        Ok(())
    }
}

/// Stream access handed to a custom write hook for one object level.
///
/// The encoder emits the level's default field data before the hook runs
/// and terminates the level's block region itself, so a hook only produces
/// its custom bytes and may simply return.
pub struct HookWriter<'a> {
    enc: &'a mut ObjectEncoder,
    block: BlockOut,
    external: bool,
}

impl<'a> HookWriter<'a> {
    /// Retained for symmetry with the read side: the level's fields are
    /// already on the wire, ahead of any custom data.
    pub fn default_write_fields(&mut self) -> Result<(), Error> {
        ensure!(
            !self.external,
            Error::not_active("external types have no default field data")
        );
        Ok(())
    }

    fn custom(&mut self, bytes: &[u8]) {
        self.block.write(&mut self.enc.writer, bytes);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.custom(&[v as u8]);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_char(&mut self, v: u16) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.custom(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.custom(bytes);
    }

    /// Length-prefixed modified UTF-8 string inside the block data.
    pub fn write_utf(&mut self, s: &str) -> Result<(), Error> {
        let bytes = mutf8::encode(s);
        ensure!(
            bytes.len() <= u16::MAX as usize,
            Error::invalid_object(format!(
                "string of {} encoded bytes is too long for block data",
                bytes.len()
            ))
        );
        self.custom(&(bytes.len() as u16).to_be_bytes());
        self.custom(&bytes);
        Ok(())
    }

    /// Writes a nested value into the custom data region.
    pub fn write_value(&mut self, value: &Value) -> Result<(), Error> {
        self.block.flush(&mut self.enc.writer);
        self.enc.write_value(value, false)
    }

    fn finish(&mut self) {
        self.block.end(&mut self.enc.writer);
    }
}
