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

//! Worker-side logic: the analyzer collaborator, the memory sampler, and the per-task driver
//! that ties them together over the master's Unix socket.
//!
//! Nothing here spawns the *worker itself* - that's [`corpuslint_host::worker_handle`] on the
//! master side. This crate is the binary that ends up running inside the spawned process.

pub mod analyzer;
pub mod driver;
pub mod sampler;

pub const LOG_TARGET: &str = "corpuslint::worker";
