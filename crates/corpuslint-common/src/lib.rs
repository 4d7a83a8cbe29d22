// Copyright (C) corpuslint contributors
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Types and wire protocol shared between the corpuslint orchestrator and its workers.
//!
//! Nothing in this crate spawns a process or owns scheduler state - it only describes the data
//! that crosses the process boundary (see [`message`]), the unit of work that crosses it
//! (see [`batch`]), and the memory-sample shape both sides record (see [`sample`]).

pub mod batch;
pub mod message;
pub mod sample;

pub use batch::Batch;
pub use message::{FailureKind, IpcMessage};
pub use sample::MemorySample;

/// Tracing target used by every crate in the workspace, suffixed with a per-crate component.
pub const LOG_TARGET_ROOT: &str = "corpuslint";
