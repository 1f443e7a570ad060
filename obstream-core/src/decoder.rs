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

//! The object reader.
//!
//! Mirrors the encoder's recursive walk: read a tag, resolve
//! back-references through the handle table, reconstruct new values. Two
//! failure channels exist side by side:
//!
//! - structural errors (bad tag, bad handle, truncation) are fatal to the
//!   whole stream;
//! - per-object resolution failures are deferred: the slot is marked failed,
//!   the object's bytes are consumed using the *stream* descriptor so the
//!   cursor stays correct, and the failure surfaces as ClassNotFound at the
//!   slot's first use, tainting any slot that references it.
//!
//! A read hook that throws leaves the partially populated object exactly as
//! it was at the throw (no rollback) while the decoder discards the rest of
//! that object's bytes, so the next top-level value still decodes.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::block::BlockIn;
use crate::buffer::Reader;
use crate::ensure;
use crate::error::Error;
use crate::meta::descriptor::{FailedRef, StreamClassDesc, StreamField, TypeDescriptor};
use crate::meta::mutf8;
use crate::resolver::handle_table::{HandleReader, Slot, SlotEntry};
use crate::resolver::type_registry::TypeRegistry;
use crate::types::{Tag, TypeCode, STREAM_MAGIC, STREAM_VERSION};
use crate::value::{ArrayData, ArrayValue, Instance, Value};

/// Validation callback registered during deserialization; runs after the
/// top-level graph completes.
pub type ValidationFn = Box<dyn FnOnce() -> Result<(), Error>>;

enum Decoded {
    Val(Value),
    Tagged(Rc<FailedRef>),
}

struct Validator {
    priority: i32,
    seq: u64,
    cb: ValidationFn,
}

fn is_fatal(e: &Error) -> bool {
    matches!(e, Error::CorruptStream(_))
}

pub struct ObjectDecoder<'a> {
    registry: Arc<TypeRegistry>,
    reader: Reader<'a>,
    handles: HandleReader,
    depth: u32,
    validators: Vec<Validator>,
    validator_seq: u64,
    max_alloc: usize,
    // mirror of the innermost active hook block, so available() works
    // from the decoder handle as well
    block_remaining: usize,
}

impl<'a> ObjectDecoder<'a> {
    pub(crate) fn new(
        registry: Arc<TypeRegistry>,
        bytes: &'a [u8],
        max_alloc: usize,
    ) -> Result<ObjectDecoder<'a>, Error> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u16()?;
        ensure!(
            magic == STREAM_MAGIC,
            Error::corrupt_stream(format!("bad stream magic {:#06x}", magic))
        );
        let version = reader.read_u16()?;
        ensure!(
            version == STREAM_VERSION,
            Error::corrupt_stream(format!("unsupported stream version {}", version))
        );
        Ok(ObjectDecoder {
            registry,
            reader,
            handles: HandleReader::new(),
            depth: 0,
            validators: Vec::new(),
            validator_seq: 0,
            max_alloc,
            block_remaining: 0,
        })
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Reads the next value graph.
    pub fn read_object(&mut self) -> Result<Value, Error> {
        self.read_top(false)
    }

    /// Reads the next value graph without registering the top value in the
    /// handle table: it can never be aliased by later back-references.
    pub fn read_unshared(&mut self) -> Result<Value, Error> {
        self.read_top(true)
    }

    /// Bytes readable without blocking. Nonzero only inside a custom read
    /// hook, and then only up to the current chunk boundary; at the end of
    /// an optional-data block this is 0, never a guess.
    pub fn available(&self) -> usize {
        self.block_remaining
    }

    /// Registers a validation callback to run once the top-level graph
    /// finishes, before `read_object` returns. Callbacks run highest
    /// priority first; within a priority, later registrations first.
    pub fn register_validation(&mut self, priority: i32, cb: ValidationFn) -> Result<(), Error> {
        ensure!(
            self.depth > 0,
            Error::not_active("no deserialization is active")
        );
        self.validators.push(Validator {
            priority,
            seq: self.validator_seq,
            cb,
        });
        self.validator_seq += 1;
        Ok(())
    }

    fn read_top(&mut self, unshared: bool) -> Result<Value, Error> {
        match self.read_value(unshared) {
            Ok(Decoded::Val(v)) => {
                self.run_validators()?;
                Ok(v)
            }
            Ok(Decoded::Tagged(failure)) => {
                self.validators.clear();
                Err(failure.to_error())
            }
            Err(e) => {
                self.validators.clear();
                Err(e)
            }
        }
    }

    fn run_validators(&mut self) -> Result<(), Error> {
        let mut validators = std::mem::take(&mut self.validators);
        validators.sort_by_key(|v| (Reverse(v.priority), Reverse(v.seq)));
        for v in validators {
            (v.cb)()?;
        }
        Ok(())
    }

    fn read_value(&mut self, unshared: bool) -> Result<Decoded, Error> {
        loop {
            let byte = self.reader.read_u8()?;
            let tag = Tag::try_from(byte)
                .map_err(|_| Error::corrupt_stream(format!("unknown tag {:#04x}", byte)))?;
            return match tag {
                Tag::Reset => {
                    ensure!(
                        self.depth == 0,
                        Error::corrupt_stream("reset marker inside an object graph")
                    );
                    self.handles.clear();
                    log::trace!("stream reset, handle table cleared");
                    continue;
                }
                Tag::Null => Ok(Decoded::Val(Value::Null)),
                Tag::Reference => {
                    let handle = self.reader.read_u32()?;
                    match self.handles.resolve(handle)? {
                        Slot::Resolved(SlotEntry::Value(v)) => Ok(Decoded::Val(v.clone())),
                        Slot::Resolved(SlotEntry::Desc(_)) => Err(Error::corrupt_stream(format!(
                            "handle {:#x} refers to a class descriptor, not a value",
                            handle
                        ))),
                        Slot::Pending => Err(Error::corrupt_stream(format!(
                            "forward reference to handle {:#x}",
                            handle
                        ))),
                        Slot::Failed(f) => Ok(Decoded::Tagged(f.clone())),
                    }
                }
                Tag::String | Tag::LongString => {
                    self.read_string_body(tag, unshared).map(Decoded::Val)
                }
                Tag::Object => self.read_instance(unshared),
                Tag::Array => self.read_array(unshared),
                Tag::Enum => self.read_enum(unshared),
                Tag::ClassLiteral => self.read_class_literal(unshared),
                Tag::ClassDesc | Tag::ProxyClassDesc => Err(Error::corrupt_stream(
                    "class descriptor tag outside a value position",
                )),
                Tag::BlockData | Tag::BlockDataLong => Err(Error::optional_data_end(false)),
                Tag::EndBlockData => {
                    Err(Error::corrupt_stream("unexpected end-of-block marker"))
                }
                Tag::Exception => Err(Error::corrupt_stream("stream aborted by the writer")),
            };
        }
    }

    fn read_string_body(&mut self, tag: Tag, unshared: bool) -> Result<Value, Error> {
        let len = match tag {
            Tag::String => self.reader.read_u16()? as usize,
            _ => {
                let n = self.reader.read_u64()?;
                usize::try_from(n).map_err(|_| {
                    Error::corrupt_stream(format!("string length {} does not fit this platform", n))
                })?
            }
        };
        ensure!(
            len <= self.max_alloc,
            Error::corrupt_stream(format!(
                "declared string length {} exceeds allocation limit {}",
                len, self.max_alloc
            ))
        );
        let bytes = self.reader.read_bytes(len)?;
        let value = Value::Str(Rc::new(mutf8::decode(bytes)?));
        if !unshared {
            let handle = self.handles.assign_pending();
            self.handles.set_value(handle, value.clone());
        }
        Ok(value)
    }

    /// Plain length-prefixed name, no tag and no handle.
    fn read_utf(&mut self) -> Result<String, Error> {
        let len = self.reader.read_u16()? as usize;
        let bytes = self.reader.read_bytes(len)?;
        mutf8::decode(bytes)
    }

    /// A string in value position: new string or back-reference.
    fn read_string_value(&mut self) -> Result<Rc<String>, Error> {
        let byte = self.reader.read_u8()?;
        let tag = Tag::try_from(byte)
            .map_err(|_| Error::corrupt_stream(format!("unknown tag {:#04x}", byte)))?;
        match tag {
            Tag::String | Tag::LongString => match self.read_string_body(tag, false)? {
                Value::Str(s) => Ok(s),
                _ => unreachable!(),
            },
            Tag::Reference => {
                let handle = self.reader.read_u32()?;
                match self.handles.resolve(handle)? {
                    Slot::Resolved(SlotEntry::Value(Value::Str(s))) => Ok(s.clone()),
                    _ => Err(Error::corrupt_stream(format!(
                        "handle {:#x} does not refer to a string",
                        handle
                    ))),
                }
            }
            other => Err(Error::corrupt_stream(format!(
                "expected a string value, found tag {:?}",
                other
            ))),
        }
    }

    fn read_class_desc(&mut self) -> Result<Rc<StreamClassDesc>, Error> {
        let byte = self.reader.read_u8()?;
        let tag = Tag::try_from(byte)
            .map_err(|_| Error::corrupt_stream(format!("unknown tag {:#04x}", byte)))?;
        match self.read_class_desc_inner(tag)? {
            Some(desc) => Ok(desc),
            None => Err(Error::corrupt_stream("null where a class descriptor is required")),
        }
    }

    fn read_class_desc_or_null(&mut self) -> Result<Option<Rc<StreamClassDesc>>, Error> {
        let byte = self.reader.read_u8()?;
        let tag = Tag::try_from(byte)
            .map_err(|_| Error::corrupt_stream(format!("unknown tag {:#04x}", byte)))?;
        self.read_class_desc_inner(tag)
    }

    fn read_class_desc_inner(&mut self, tag: Tag) -> Result<Option<Rc<StreamClassDesc>>, Error> {
        match tag {
            Tag::Null => Ok(None),
            Tag::ClassDesc => self.read_plain_class_desc().map(Some),
            Tag::ProxyClassDesc => self.read_proxy_class_desc().map(Some),
            Tag::Reference => {
                let handle = self.reader.read_u32()?;
                match self.handles.resolve(handle)? {
                    Slot::Resolved(SlotEntry::Desc(d)) => Ok(Some(d.clone())),
                    _ => Err(Error::corrupt_stream(format!(
                        "handle {:#x} does not refer to a class descriptor",
                        handle
                    ))),
                }
            }
            other => Err(Error::corrupt_stream(format!(
                "expected class descriptor, found tag {:?}",
                other
            ))),
        }
    }

    fn read_plain_class_desc(&mut self) -> Result<Rc<StreamClassDesc>, Error> {
        let name = self.read_utf()?;
        let version_id = self.reader.read_i64()?;
        let handle = self.handles.assign_pending();
        let flags = self.reader.read_u8()?;
        let nfields = self.reader.read_u16()? as usize;
        let mut fields = Vec::with_capacity(nfields);
        for _ in 0..nfields {
            let code_byte = self.reader.read_u8()?;
            let code = TypeCode::try_from(code_byte).map_err(|_| {
                Error::corrupt_stream(format!(
                    "bad field type code {:#04x} in descriptor of `{}`",
                    code_byte, name
                ))
            })?;
            let fname = self.read_utf()?;
            let signature = if code.is_primitive() {
                None
            } else {
                Some((*self.read_string_value()?).clone())
            };
            fields.push(StreamField {
                name: fname,
                code,
                signature,
            });
        }
        let parent = self.read_class_desc_or_null()?;
        let local = self.resolve_local(&name, version_id)?;
        let desc = Rc::new(StreamClassDesc {
            name,
            version_id,
            flags,
            fields,
            parent,
            proxy_interfaces: None,
            local,
        });
        self.handles.set_desc(handle, desc.clone());
        Ok(desc)
    }

    fn read_proxy_class_desc(&mut self) -> Result<Rc<StreamClassDesc>, Error> {
        let handle = self.handles.assign_pending();
        let count = self.reader.read_u16()? as usize;
        let mut interfaces = Vec::with_capacity(count);
        for _ in 0..count {
            interfaces.push(self.read_utf()?);
        }
        let parent = self.read_class_desc_or_null()?;
        let name = format!("$proxy[{}]", interfaces.join(","));
        let local = match self.registry.resolve_proxy(&interfaces) {
            Ok(d) => Ok(d),
            Err(Error::ClassNotFound(msg)) => {
                log::debug!("deferring unresolvable proxy `{}`", name);
                Err(FailedRef::new(&name, msg.to_string()))
            }
            Err(e) => return Err(e),
        };
        let desc = Rc::new(StreamClassDesc {
            name,
            version_id: 0,
            flags: 0,
            fields: Vec::new(),
            parent,
            proxy_interfaces: Some(interfaces),
            local,
        });
        self.handles.set_desc(handle, desc.clone());
        Ok(desc)
    }

    fn resolve_local(
        &self,
        name: &str,
        version_id: i64,
    ) -> Result<Result<Arc<TypeDescriptor>, Rc<FailedRef>>, Error> {
        match self.registry.resolve_by_name(name, version_id) {
            Ok(d) => Ok(Ok(d)),
            Err(Error::ClassNotFound(msg)) => {
                log::debug!("deferring unresolvable class `{}`", name);
                Ok(Err(FailedRef::new(name, msg.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    fn read_instance(&mut self, unshared: bool) -> Result<Decoded, Error> {
        let sdesc = self.read_class_desc()?;
        let handle = if unshared {
            None
        } else {
            Some(self.handles.assign_pending())
        };
        match sdesc.local.clone() {
            Ok(local) => {
                if !local.is_serializable() {
                    return Err(Error::invalid_class(format!(
                        "class `{}` is not serializable locally",
                        local.name()
                    )));
                }
                let inst = Instance::new(&local);
                let value = Value::Object(inst.clone());
                if let Some(h) = handle {
                    self.handles.set_value(h, value.clone());
                }
                self.depth += 1;
                let outcome = self.read_instance_data(Some(&inst), &sdesc);
                self.depth -= 1;
                match outcome {
                    Ok(None) => {
                        let resolved = self.apply_read_resolve(value.clone())?;
                        if resolved.identity() != value.identity() {
                            match handle {
                                Some(h) => self.handles.set_value(h, resolved.clone()),
                                None => {
                                    if let Some(id) = resolved.identity() {
                                        if self.handles.is_live_identity(id) {
                                            return Err(Error::invalid_object(format!(
                                                "read-resolve of unshared `{}` aliases an \
                                                 already-shared value",
                                                local.name()
                                            )));
                                        }
                                    }
                                }
                            }
                        }
                        Ok(Decoded::Val(resolved))
                    }
                    Ok(Some(failure)) => {
                        if let Some(h) = handle {
                            self.handles.fail(h, failure.clone());
                        }
                        Ok(Decoded::Tagged(failure))
                    }
                    Err(e) => {
                        if let Some(h) = handle {
                            self.handles.fail(h, FailedRef::new(local.name(), e.to_string()));
                        }
                        Err(e)
                    }
                }
            }
            Err(failure) => {
                // class unknown here: keep the stream framed by consuming the
                // object's bytes with the stream descriptor, defer the error
                if let Some(h) = handle {
                    self.handles.fail(h, failure.clone());
                }
                self.depth += 1;
                let r = self.read_instance_data(None, &sdesc);
                self.depth -= 1;
                r?;
                Ok(Decoded::Tagged(failure))
            }
        }
    }

    fn read_instance_data(
        &mut self,
        inst: Option<&Rc<Instance>>,
        sdesc: &Rc<StreamClassDesc>,
    ) -> Result<Option<Rc<FailedRef>>, Error> {
        let stream_chain = StreamClassDesc::chain(sdesc);
        let local_chain: Vec<Arc<TypeDescriptor>> = inst
            .map(|i| i.chain_levels().to_vec())
            .unwrap_or_default();
        let mut tagged: Option<Rc<FailedRef>> = None;
        let mut failure: Option<Error> = None;
        for slevel in &stream_chain {
            let level_idx = local_chain.iter().position(|ll| {
                (slevel.proxy_interfaces.is_some() && ll.is_proxy()) || slevel.name == ll.name()
            });
            // a tainted or failed object no longer populates, and its
            // remaining hooks are never invoked
            let target = if failure.is_none() && tagged.is_none() {
                inst.zip(level_idx)
            } else {
                None
            };
            match self.read_level(target, slevel) {
                Ok(None) => {}
                Ok(Some(f)) => {
                    if tagged.is_none() {
                        tagged = Some(f);
                    }
                }
                Err(e) => {
                    if is_fatal(&e) {
                        return Err(e);
                    }
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(tagged),
        }
    }

    fn read_level(
        &mut self,
        target: Option<(&Rc<Instance>, usize)>,
        slevel: &Rc<StreamClassDesc>,
    ) -> Result<Option<Rc<FailedRef>>, Error> {
        let external = slevel.is_external();
        let has_custom = slevel.has_hook_data();
        let local_level: Option<Arc<TypeDescriptor>> =
            target.map(|(ins, idx)| ins.chain_levels()[idx].clone());
        let local_hook = local_level.as_ref().and_then(|ll| {
            if ll.is_external() == external {
                ll.harness().read_hook
            } else {
                None
            }
        });

        let mut failure: Option<Error> = None;
        let mut tagged: Option<Rc<FailedRef>> = None;
        let mut fields_consumed = external;
        let mut blk = BlockIn::new();

        if let (Some((ins, idx)), Some(hook), Some(ll)) = (target, local_hook, &local_level) {
            let ins = ins.clone();
            let mut hr = HookReader::new(self, &ins, idx, slevel.clone(), ll.clone(), external, has_custom);
            let result = hook(&ins, &mut hr);
            fields_consumed = fields_consumed || hr.fields_consumed;
            blk = hr.finish();
            match result {
                Ok(()) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => failure = Some(e),
            }
        } else if !external {
            match self.populate_fields(target, slevel) {
                Ok(t) => tagged = t,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => failure = Some(e),
            }
            fields_consumed = true;
        }

        if !fields_consumed {
            // the hook never touched the default data the writer put first
            self.discard_fields_from(slevel, 0)?;
        }
        if has_custom {
            // discard whatever optional data the hook left unconsumed
            self.skip_custom_data(&mut blk)?;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(tagged),
        }
    }

    /// Reads one level's field values in stream order, assigning fields the
    /// local class shares with the stream and discarding the rest. Always
    /// consumes the level's full field extent unless the stream is corrupt.
    fn populate_fields(
        &mut self,
        target: Option<(&Rc<Instance>, usize)>,
        slevel: &StreamClassDesc,
    ) -> Result<Option<Rc<FailedRef>>, Error> {
        // match stream fields against the local level before consuming
        // anything; a same-name type conflict fails the whole object
        let mut assign = vec![false; slevel.fields.len()];
        if let Some((ins, idx)) = target {
            let ll = ins.chain_levels()[idx].clone();
            for (i, sf) in slevel.fields.iter().enumerate() {
                match ll.field(&sf.name) {
                    Some(lf) if lf.code == sf.code => assign[i] = true,
                    Some(lf) => {
                        let conflict = Error::invalid_class(format!(
                            "field `{}` of `{}`: stream type {} conflicts with local type {}",
                            sf.name, slevel.name, sf.code, lf.code
                        ));
                        self.discard_fields_from(slevel, 0)?;
                        return Err(conflict);
                    }
                    None => {}
                }
            }
        }

        let mut tagged: Option<Rc<FailedRef>> = None;
        for (i, sf) in slevel.fields.iter().enumerate() {
            if sf.code.is_primitive() {
                let v = self.read_primitive(sf.code)?;
                if assign[i] {
                    let (ins, idx) = target.unwrap();
                    ins.set_at(idx, &sf.name, v);
                }
            } else {
                match self.read_value(false) {
                    Ok(Decoded::Val(v)) => {
                        if assign[i] {
                            let (ins, idx) = target.unwrap();
                            ins.set_at(idx, &sf.name, v);
                        }
                    }
                    Ok(Decoded::Tagged(f)) => {
                        // only a value actually assigned taints the object
                        if assign[i] && tagged.is_none() {
                            tagged = Some(f);
                        }
                    }
                    Err(e) => {
                        if is_fatal(&e) {
                            return Err(e);
                        }
                        self.discard_fields_from(slevel, i + 1)?;
                        return Err(e);
                    }
                }
            }
        }
        Ok(tagged)
    }

    fn discard_fields_from(&mut self, slevel: &StreamClassDesc, start: usize) -> Result<(), Error> {
        for sf in &slevel.fields[start..] {
            match sf.code.width() {
                Some(w) => self.reader.skip(w)?,
                None => match self.read_value(false) {
                    Ok(_) => {}
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(_) => {}
                },
            }
        }
        Ok(())
    }

    fn read_primitive(&mut self, code: TypeCode) -> Result<Value, Error> {
        Ok(match code {
            TypeCode::Bool => Value::Bool(self.reader.read_u8()? != 0),
            TypeCode::I8 => Value::I8(self.reader.read_i8()?),
            TypeCode::Char => Value::Char(self.reader.read_u16()?),
            TypeCode::I16 => Value::I16(self.reader.read_i16()?),
            TypeCode::I32 => Value::I32(self.reader.read_i32()?),
            TypeCode::I64 => Value::I64(self.reader.read_i64()?),
            TypeCode::F32 => Value::F32(self.reader.read_f32()?),
            TypeCode::F64 => Value::F64(self.reader.read_f64()?),
            TypeCode::Object | TypeCode::Array => {
                return Err(Error::corrupt_stream(
                    "reference type code in primitive position",
                ))
            }
        })
    }

    /// Consumes chunks and embedded values up to and including the
    /// end-of-block marker.
    fn skip_custom_data(&mut self, blk: &mut BlockIn) -> Result<(), Error> {
        loop {
            let pending = blk.available();
            if pending > 0 {
                self.reader.skip(pending)?;
                blk.take(pending);
            }
            if blk.refill(&mut self.reader)? {
                continue;
            }
            let byte = self.reader.peek_u8()?;
            if matches!(Tag::try_from(byte), Ok(Tag::EndBlockData)) {
                self.reader.read_u8()?;
                return Ok(());
            }
            // an object the hook wrote but never read back; it still owns
            // handle slots, so it must be decoded, not skipped
            match self.read_value(false) {
                Ok(_) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(_) => {}
            }
        }
    }

    fn read_array(&mut self, unshared: bool) -> Result<Decoded, Error> {
        let sdesc = self.read_class_desc()?;
        let handle = if unshared {
            None
        } else {
            Some(self.handles.assign_pending())
        };
        let local = match sdesc.local.clone() {
            Ok(local) => local,
            Err(failure) => {
                return Err(Error::corrupt_stream(format!(
                    "unresolvable array descriptor `{}`: {}",
                    sdesc.name, failure.message
                )))
            }
        };
        let elem = local.array_elem().ok_or_else(|| {
            Error::corrupt_stream(format!("`{}` is not an array descriptor", local.name()))
        })?;
        let len = self.reader.read_u32()? as usize;
        let claimed = len.saturating_mul(elem.width().unwrap_or(1));
        ensure!(
            claimed <= self.max_alloc,
            Error::corrupt_stream(format!(
                "declared array size {} exceeds allocation limit {}",
                claimed, self.max_alloc
            ))
        );

        let shell = match elem {
            TypeCode::Bool => ArrayData::Bool(Vec::new()),
            TypeCode::I8 => ArrayData::I8(Vec::new()),
            TypeCode::Char => ArrayData::Char(Vec::new()),
            TypeCode::I16 => ArrayData::I16(Vec::new()),
            TypeCode::I32 => ArrayData::I32(Vec::new()),
            TypeCode::I64 => ArrayData::I64(Vec::new()),
            TypeCode::F32 => ArrayData::F32(Vec::new()),
            TypeCode::F64 => ArrayData::F64(Vec::new()),
            TypeCode::Object | TypeCode::Array => ArrayData::Ref(Vec::new()),
        };
        let arr = ArrayValue::new(&local, shell)?;
        let value = Value::Array(arr.clone());
        if let Some(h) = handle {
            // registered before the elements so self-references resolve
            self.handles.set_value(h, value.clone());
        }

        macro_rules! fill_prim {
            ($variant:ident, $read:ident) => {{
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(self.reader.$read()?);
                }
                *arr.data.borrow_mut() = ArrayData::$variant(v);
            }};
        }
        let mut tagged: Option<Rc<FailedRef>> = None;
        match elem {
            TypeCode::Bool => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(self.reader.read_u8()? != 0);
                }
                *arr.data.borrow_mut() = ArrayData::Bool(v);
            }
            TypeCode::I8 => fill_prim!(I8, read_i8),
            TypeCode::Char => fill_prim!(Char, read_u16),
            TypeCode::I16 => fill_prim!(I16, read_i16),
            TypeCode::I32 => fill_prim!(I32, read_i32),
            TypeCode::I64 => fill_prim!(I64, read_i64),
            TypeCode::F32 => fill_prim!(F32, read_f32),
            TypeCode::F64 => fill_prim!(F64, read_f64),
            TypeCode::Object | TypeCode::Array => {
                let mut out: Vec<Value> = Vec::with_capacity(len);
                for i in 0..len {
                    match self.read_value(false) {
                        Ok(Decoded::Val(v)) => out.push(v),
                        Ok(Decoded::Tagged(f)) => {
                            out.push(Value::Null);
                            if tagged.is_none() {
                                tagged = Some(f);
                            }
                        }
                        Err(e) => {
                            if is_fatal(&e) {
                                return Err(e);
                            }
                            for _ in i + 1..len {
                                match self.read_value(false) {
                                    Ok(_) => {}
                                    Err(e2) if is_fatal(&e2) => return Err(e2),
                                    Err(_) => {}
                                }
                            }
                            if let Some(h) = handle {
                                self.handles
                                    .fail(h, FailedRef::new(local.name(), e.to_string()));
                            }
                            return Err(e);
                        }
                    }
                }
                *arr.data.borrow_mut() = ArrayData::Ref(out);
            }
        }
        if let Some(f) = tagged {
            if let Some(h) = handle {
                self.handles.fail(h, f.clone());
            }
            return Ok(Decoded::Tagged(f));
        }
        Ok(Decoded::Val(value))
    }

    fn read_enum(&mut self, unshared: bool) -> Result<Decoded, Error> {
        let sdesc = self.read_class_desc()?;
        let handle = if unshared {
            None
        } else {
            Some(self.handles.assign_pending())
        };
        let name = self.read_string_value()?;
        match sdesc.local.clone() {
            Ok(local) if local.is_enum() => match local.constant(&name) {
                Some(constant) => {
                    let value = Value::Enum(constant);
                    if let Some(h) = handle {
                        self.handles.set_value(h, value.clone());
                    }
                    Ok(Decoded::Val(value))
                }
                None => {
                    if let Some(h) = handle {
                        self.handles
                            .fail(h, FailedRef::new(local.name(), format!("no constant `{}`", name)));
                    }
                    Err(Error::invalid_object(format!(
                        "enum class `{}` has no constant `{}`",
                        local.name(),
                        name
                    )))
                }
            },
            Ok(other) => Err(Error::invalid_class(format!(
                "`{}` is not an enum locally",
                other.name()
            ))),
            Err(failure) => {
                if let Some(h) = handle {
                    self.handles.fail(h, failure.clone());
                }
                Ok(Decoded::Tagged(failure))
            }
        }
    }

    fn read_class_literal(&mut self, unshared: bool) -> Result<Decoded, Error> {
        let sdesc = self.read_class_desc()?;
        let handle = if unshared {
            None
        } else {
            Some(self.handles.assign_pending())
        };
        match sdesc.local.clone() {
            Ok(local) => {
                let value = Value::Class(local);
                if let Some(h) = handle {
                    self.handles.set_value(h, value.clone());
                }
                Ok(Decoded::Val(value))
            }
            Err(failure) => {
                if let Some(h) = handle {
                    self.handles.fail(h, failure.clone());
                }
                Ok(Decoded::Tagged(failure))
            }
        }
    }

    /// Runs the read-resolve chain after full construction, mirroring the
    /// write-replace rules.
    fn apply_read_resolve(&mut self, value: Value) -> Result<Value, Error> {
        let mut current = value;
        let mut seen_ids: Vec<usize> = Vec::new();
        let mut seen_classes: Vec<String> = Vec::new();
        loop {
            let Value::Object(inst) = &current else {
                return Ok(current);
            };
            let desc = inst.class().clone();
            let Some(resolve) = desc.harness().read_resolve else {
                return Ok(current);
            };
            let id = current.identity().expect("objects have identity");
            if seen_ids.contains(&id) {
                return Err(Error::invalid_object(format!(
                    "read-resolve cycle detected for class `{}`",
                    desc.name()
                )));
            }
            seen_ids.push(id);
            seen_classes.push(desc.name().to_string());
            let next = resolve(&current)?;
            if next.identity() == Some(id) {
                return Ok(current);
            }
            if let Value::Object(next_inst) = &next {
                let next_class = next_inst.class().name();
                if next_class == desc.name() {
                    return Ok(next);
                }
                if seen_classes.iter().any(|c| c == next_class) {
                    return Err(Error::invalid_object(format!(
                        "read-resolve cycle between `{}` and `{}`",
                        desc.name(),
                        next_class
                    )));
                }
            }
            current = next;
        }
    }

    fn collect_fields(
        &mut self,
        slevel: &StreamClassDesc,
        local: &Arc<TypeDescriptor>,
    ) -> Result<FieldGetter, Error> {
        let mut entries: HashMap<String, Result<Value, Rc<FailedRef>>> = HashMap::new();
        for (i, sf) in slevel.fields.iter().enumerate() {
            if sf.code.is_primitive() {
                let v = self.read_primitive(sf.code)?;
                entries.insert(sf.name.clone(), Ok(v));
            } else {
                match self.read_value(false) {
                    Ok(Decoded::Val(v)) => {
                        entries.insert(sf.name.clone(), Ok(v));
                    }
                    Ok(Decoded::Tagged(f)) => {
                        entries.insert(sf.name.clone(), Err(f));
                    }
                    Err(e) => {
                        if is_fatal(&e) {
                            return Err(e);
                        }
                        self.discard_fields_from(slevel, i + 1)?;
                        return Err(e);
                    }
                }
            }
        }
        Ok(FieldGetter {
            class_name: slevel.name.clone(),
            local: local.clone(),
            entries,
        })
    }
}

/// Named access to one level's field values, as read from the stream.
///
/// Errors name the requesting class and field. A field present locally but
/// absent from the stream reads as its default value; a field absent from
/// both is an error at the point of access, as is a field whose value is
/// tagged with a deferred class-resolution failure.
pub struct FieldGetter {
    class_name: String,
    local: Arc<TypeDescriptor>,
    entries: HashMap<String, Result<Value, Rc<FailedRef>>>,
}

impl FieldGetter {
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        match self.entries.get(name) {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(f)) => Err(f.to_error()),
            None => match self.local.field(name) {
                Some(lf) => Ok(Value::default_for(lf.code)),
                None => Err(Error::invalid_class(format!(
                    "no field `{}` in class `{}`",
                    name, self.class_name
                ))),
            },
        }
    }

    /// Whether the stream omitted this (locally declared) field.
    pub fn defaulted(&self, name: &str) -> Result<bool, Error> {
        if self.entries.contains_key(name) {
            Ok(false)
        } else if self.local.field(name).is_some() {
            Ok(true)
        } else {
            Err(Error::invalid_class(format!(
                "no field `{}` in class `{}`",
                name, self.class_name
            )))
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, Error> {
        self.typed(name, Value::as_bool, "bool")
    }

    pub fn get_i32(&self, name: &str) -> Result<i32, Error> {
        self.typed(name, Value::as_i32, "i32")
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, Error> {
        self.typed(name, Value::as_i64, "i64")
    }

    fn typed<T>(
        &self,
        name: &str,
        extract: impl Fn(&Value) -> Option<T>,
        wanted: &str,
    ) -> Result<T, Error> {
        let v = self.get(name)?;
        extract(&v).ok_or_else(|| {
            Error::invalid_class(format!(
                "field `{}` of `{}` is not {}",
                name, self.class_name, wanted
            ))
        })
    }
}

/// Stream access handed to a custom read hook for one object level.
///
/// The level's default field data precedes its custom data on the wire.
/// A hook consumes the fields through [`default_read_fields`] or
/// [`read_fields`]; touching the custom data first forfeits them. Reads
/// never cross the level's block boundary — running past it raises
/// [`Error::OptionalDataEnd`] instead of consuming the next object's bytes.
///
/// [`default_read_fields`]: HookReader::default_read_fields
/// [`read_fields`]: HookReader::read_fields
pub struct HookReader<'h, 'de> {
    dec: &'h mut ObjectDecoder<'de>,
    inst: &'h Rc<Instance>,
    level_idx: usize,
    slevel: Rc<StreamClassDesc>,
    local_level: Arc<TypeDescriptor>,
    blk: BlockIn,
    external: bool,
    /// Whether the stream level carries a custom-data region at all.
    has_custom: bool,
    fields_consumed: bool,
    prev_block_remaining: usize,
}

impl<'h, 'de> HookReader<'h, 'de> {
    fn new(
        dec: &'h mut ObjectDecoder<'de>,
        inst: &'h Rc<Instance>,
        level_idx: usize,
        slevel: Rc<StreamClassDesc>,
        local_level: Arc<TypeDescriptor>,
        external: bool,
        has_custom: bool,
    ) -> HookReader<'h, 'de> {
        let prev_block_remaining = dec.block_remaining;
        dec.block_remaining = 0;
        HookReader {
            dec,
            inst,
            level_idx,
            slevel,
            local_level,
            blk: BlockIn::new(),
            external,
            has_custom,
            fields_consumed: external,
            prev_block_remaining,
        }
    }

    /// The level's field data sits ahead of its custom data; a hook that
    /// starts reading custom bytes without touching the fields forfeits
    /// them, and the decoder drops them here so the chunks line up.
    fn forfeit_fields(&mut self) -> Result<(), Error> {
        if !self.fields_consumed {
            self.fields_consumed = true;
            let slevel = self.slevel.clone();
            self.dec.discard_fields_from(&slevel, 0)?;
        }
        Ok(())
    }

    fn finish(self) -> BlockIn {
        let HookReader {
            dec,
            blk,
            prev_block_remaining,
            ..
        } = self;
        dec.block_remaining = prev_block_remaining;
        blk
    }

    /// Populates this level's fields from the stream. A field whose value
    /// carries a deferred resolution failure raises ClassNotFound here,
    /// after the level's remaining field bytes have been consumed.
    pub fn default_read_fields(&mut self) -> Result<(), Error> {
        ensure!(
            !self.external,
            Error::not_active("external types have no default field data")
        );
        ensure!(
            !self.fields_consumed,
            Error::not_active("default field data already consumed")
        );
        self.fields_consumed = true;
        match self
            .dec
            .populate_fields(Some((self.inst, self.level_idx)), &self.slevel)?
        {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    /// Reads this level's field values for named access instead of
    /// populating the instance.
    pub fn read_fields(&mut self) -> Result<FieldGetter, Error> {
        ensure!(
            !self.external,
            Error::not_active("external types have no default field data")
        );
        ensure!(
            !self.fields_consumed,
            Error::not_active("default field data already consumed")
        );
        self.fields_consumed = true;
        let slevel = self.slevel.clone();
        self.dec.collect_fields(&slevel, &self.local_level)
    }

    /// Bytes readable in the current chunk without blocking; 0 at a block
    /// boundary.
    pub fn available(&self) -> usize {
        self.blk.available()
    }

    pub fn register_validation(&mut self, priority: i32, cb: ValidationFn) -> Result<(), Error> {
        self.dec.register_validation(priority, cb)
    }

    fn read_block_exact(&mut self, out: &mut [u8]) -> Result<(), Error> {
        if !self.has_custom {
            return Err(Error::optional_data_end(true));
        }
        self.forfeit_fields()?;
        let mut filled = 0;
        while filled < out.len() {
            if self.blk.available() == 0 && !self.blk.refill(&mut self.dec.reader)? {
                self.dec.block_remaining = 0;
                return Err(Error::optional_data_end(true));
            }
            let n = (out.len() - filled).min(self.blk.available());
            let bytes = self.dec.reader.read_bytes(n)?;
            out[filled..filled + n].copy_from_slice(bytes);
            self.blk.take(n);
            filled += n;
        }
        self.dec.block_remaining = self.blk.available();
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        let mut b = [0u8; 1];
        self.read_block_exact(&mut b)?;
        Ok(b[0] != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8, Error> {
        let mut b = [0u8; 1];
        self.read_block_exact(&mut b)?;
        Ok(b[0] as i8)
    }

    pub fn read_char(&mut self) -> Result<u16, Error> {
        let mut b = [0u8; 2];
        self.read_block_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_i16(&mut self) -> Result<i16, Error> {
        let mut b = [0u8; 2];
        self.read_block_exact(&mut b)?;
        Ok(i16::from_be_bytes(b))
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let mut b = [0u8; 4];
        self.read_block_exact(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        let mut b = [0u8; 8];
        self.read_block_exact(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        let mut b = [0u8; 4];
        self.read_block_exact(&mut b)?;
        Ok(f32::from_be_bytes(b))
    }

    pub fn read_f64(&mut self) -> Result<f64, Error> {
        let mut b = [0u8; 8];
        self.read_block_exact(&mut b)?;
        Ok(f64::from_be_bytes(b))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        ensure!(
            len <= self.dec.max_alloc,
            Error::corrupt_stream(format!(
                "requested {} block bytes, allocation limit is {}",
                len, self.dec.max_alloc
            ))
        );
        let mut out = vec![0u8; len];
        self.read_block_exact(&mut out)?;
        Ok(out)
    }

    /// Length-prefixed modified UTF-8 string from the block data.
    pub fn read_utf(&mut self) -> Result<String, Error> {
        let mut b = [0u8; 2];
        self.read_block_exact(&mut b)?;
        let len = u16::from_be_bytes(b) as usize;
        let bytes = self.read_bytes(len)?;
        mutf8::decode(&bytes)
    }

    /// Reads a nested value the paired write hook emitted into this level's
    /// custom data. With unread primitive bytes still in the current chunk,
    /// or past the block's end, this raises [`Error::OptionalDataEnd`].
    pub fn read_value(&mut self) -> Result<Value, Error> {
        if !self.has_custom {
            return Err(Error::optional_data_end(true));
        }
        self.forfeit_fields()?;
        if self.blk.available() > 0 || self.blk.refill(&mut self.dec.reader)? {
            return Err(Error::optional_data_end(false));
        }
        if matches!(
            Tag::try_from(self.dec.reader.peek_u8()?),
            Ok(Tag::EndBlockData)
        ) {
            return Err(Error::optional_data_end(true));
        }
        self.dec.block_remaining = 0;
        match self.dec.read_value(false)? {
            Decoded::Val(v) => Ok(v),
            Decoded::Tagged(f) => Err(f.to_error()),
        }
    }
}
