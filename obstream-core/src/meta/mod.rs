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

//! Type metadata: descriptors, structural version ids, and the modified
//! UTF-8 transcoding used for every name and string on the wire.

pub mod descriptor;
pub mod mutf8;
pub mod version;

pub use descriptor::{
    EnumConstant, FailedRef, FieldDescriptor, Harness, StreamClassDesc, StreamField,
    TypeDescriptor,
};
pub use version::structural_version_id;
