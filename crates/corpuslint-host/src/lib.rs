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

//! The orchestrator side of corpuslint: admission control, the scheduler reactor, failure
//! classification and recovery, persistence, file discovery, and legacy config conversion.

pub mod admission;
pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod legacy_config;
pub mod persist;
pub mod scheduler;
pub mod worker_handle;

pub const LOG_TARGET: &str = "corpuslint::host";
