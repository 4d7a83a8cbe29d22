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

//! Orchestrator configuration: spec §4.5/§6 defaults, overridable by CLI flags in `corpuslint-cli`.

/// Tunables governing scheduling, admission, and recovery. Every field has the spec-mandated
/// default; `corpuslint-cli` overrides fields the user passed flags for and leaves the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_workers: usize,
    pub container_limit_mb: u64,
    pub mem_threshold_percent: u8,
    pub max_retries: u32,
    pub initial_divisor: usize,
    pub output_dir: String,
    pub worker_memory_limit_mb: Option<u64>,
}

impl Config {
    pub const DEFAULT_MAX_WORKERS: usize = 2;
    pub const DEFAULT_CONTAINER_LIMIT_MB: u64 = 4096;
    pub const DEFAULT_MEM_THRESHOLD_PERCENT: u8 = 75;
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
    pub const DEFAULT_OUTPUT_DIR: &'static str = "./lint-results";

    /// The admission threshold in bytes, derived from `container_limit_mb` and
    /// `mem_threshold_percent` (spec §4.5: `CONTAINER_LIMIT_MB * 1024^2 * MEM_THRESHOLD_PERCENT / 100`).
    pub fn threshold_bytes(&self) -> u64 {
        self.container_limit_mb * 1024 * 1024 * self.mem_threshold_percent as u64 / 100
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
            container_limit_mb: Self::DEFAULT_CONTAINER_LIMIT_MB,
            mem_threshold_percent: Self::DEFAULT_MEM_THRESHOLD_PERCENT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            initial_divisor: corpuslint_common::batch::DEFAULT_INITIAL_DIVISOR,
            output_dir: Self::DEFAULT_OUTPUT_DIR.to_string(),
            worker_memory_limit_mb: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_matches_s6_scenario_arithmetic() {
        let cfg = Config { container_limit_mb: 1024, mem_threshold_percent: 10, ..Default::default() };
        assert_eq!(cfg.threshold_bytes(), 1024 * 1024 * 1024 / 10);
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.container_limit_mb, 4096);
        assert_eq!(cfg.mem_threshold_percent, 75);
        assert_eq!(cfg.max_retries, 2);
    }
}
