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

//! Error taxonomy for stream encoding and decoding.
//!
//! Error constructors sit on every buffer read and type check, so they keep
//! the same `#[inline(always)]`/`#[cold]` shape on the constructor functions:
//! the error paths stay out of line while the hot paths stay optimizable.
//!
//! Always create errors through the static constructor functions
//! ([`Error::corrupt_stream`], [`Error::invalid_class`], ...) rather than the
//! enum variants; the constructors handle message conversion and honor the
//! `OBSTREAM_PANIC_ON_ERROR` debug switch.

use std::borrow::Cow;

use thiserror::Error;

/// Compile-time flag: set `OBSTREAM_PANIC_ON_ERROR=1` in the build environment
/// to panic at the exact location an error is created. Combine with
/// `RUST_BACKTRACE=1` to see where a decode went wrong.
pub const PANIC_ON_ERROR: bool = option_env!("OBSTREAM_PANIC_ON_ERROR").is_some();

/// Error type for all encode and decode operations.
///
/// The taxonomy is closed and maps onto stream failure modes:
///
/// - [`Error::CorruptStream`] — malformed tag, out-of-range handle, truncated
///   framing. Fatal to the whole stream; there is no resynchronization past a
///   corrupt tag.
/// - [`Error::InvalidClass`] — version id mismatch, malformed explicit field
///   list, inaccessible ancestor constructor, duplicate field names.
/// - [`Error::NotSerializable`] — the type has no serialization capability
///   and no substitution applies; the message names the offending class.
/// - [`Error::ClassNotFound`] — surfaces at the first *use* of a slot whose
///   class could not be resolved, not at the point the slot was skipped.
/// - [`Error::OptionalDataEnd`] — a custom read hook attempted to read past
///   its own block of optional data.
/// - [`Error::NotActive`] — a call that is only legal during an active
///   serialization or deserialization was made outside one.
/// - [`Error::InvalidObject`] — a post-construction invariant violation,
///   such as an enum constant absent locally or a replacement cycle.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed tag, bad handle, or truncated framing.
    ///
    /// Do not construct directly; use [`Error::corrupt_stream`].
    #[error("corrupt stream: {0}")]
    CorruptStream(Cow<'static, str>),

    /// Local and stream type definitions are incompatible.
    ///
    /// Do not construct directly; use [`Error::invalid_class`].
    #[error("invalid class: {0}")]
    InvalidClass(Cow<'static, str>),

    /// The value's type cannot be serialized.
    ///
    /// Do not construct directly; use [`Error::not_serializable`].
    #[error("not serializable: {0}")]
    NotSerializable(Cow<'static, str>),

    /// A referenced class could not be resolved locally.
    ///
    /// Do not construct directly; use [`Error::class_not_found`].
    #[error("class not found: {0}")]
    ClassNotFound(Cow<'static, str>),

    /// A custom read hook ran past the end of its optional-data block.
    ///
    /// `eof` is true when the block's custom data is exhausted, false when an
    /// object read was attempted while unread primitive bytes remain.
    ///
    /// Do not construct directly; use [`Error::optional_data_end`].
    #[error("end of optional data (eof = {eof})")]
    OptionalDataEnd {
        /// Whether the custom-data region is fully exhausted.
        eof: bool,
    },

    /// A stream-lifecycle call was made at an illegal time.
    ///
    /// Do not construct directly; use [`Error::not_active`].
    #[error("not active: {0}")]
    NotActive(Cow<'static, str>),

    /// A reconstructed object violates an invariant.
    ///
    /// Do not construct directly; use [`Error::invalid_object`].
    #[error("invalid object: {0}")]
    InvalidObject(Cow<'static, str>),
}

impl Error {
    /// Creates a new [`Error::CorruptStream`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn corrupt_stream<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::CorruptStream(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::InvalidClass`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn invalid_class<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::InvalidClass(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::NotSerializable`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn not_serializable<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::NotSerializable(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::ClassNotFound`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn class_not_found<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::ClassNotFound(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::OptionalDataEnd`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn optional_data_end(eof: bool) -> Self {
        let err = Error::OptionalDataEnd { eof };
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::NotActive`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn not_active<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::NotActive(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }

    /// Creates a new [`Error::InvalidObject`].
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn invalid_object<S: Into<Cow<'static, str>>>(s: S) -> Self {
        let err = Error::InvalidObject(s.into());
        if PANIC_ON_ERROR {
            panic!("OBSTREAM_PANIC_ON_ERROR: {}", err);
        }
        err
    }
}

/// Ensures a condition is true; otherwise returns an [`enum@Error`].
///
/// # Examples
/// ```
/// use obstream_core::ensure;
/// use obstream_core::error::Error;
///
/// fn check_len(n: usize) -> Result<(), Error> {
///     ensure!(n < 10, Error::corrupt_stream(format!("length {} too large", n)));
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

/// Returns early with an [`enum@Error`].
///
/// # Examples
/// ```
/// use obstream_core::bail;
/// use obstream_core::error::Error;
///
/// fn fail_fast() -> Result<(), Error> {
///     bail!(Error::not_active("stream is closed"));
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($err)
    };
}
