// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! LZ and GLZ encoders.
//!
//! Both encoders share the match finder pieces in `common` and write through
//! an [`OutputSink`](crate::io::OutputSink).

pub(crate) mod common;
pub mod glz;
pub mod lz;

// Re-export encoder types
pub use glz::{GlzEncoded, GlzEncoder, GlzEncoderConfig};
pub use lz::LzEncoder;
