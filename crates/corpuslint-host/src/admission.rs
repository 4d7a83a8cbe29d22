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

//! Admission control (C5): gates worker spawning on both a concurrency cap and an observed
//! memory budget.

use crate::config::Config;

/// Everything `can_spawn` needs to know about one active worker: only its last observed RSS
/// matters here (spec §4.5: newly spawned workers with no sample yet contribute 0).
pub struct ActiveWorker {
    pub last_rss_bytes: Option<u64>,
}

/// True iff both hold: fewer than `max_workers` are active, and the observed total RSS
/// (master + sum of active workers' last samples) stays under the configured threshold.
pub fn can_spawn(cfg: &Config, master_rss_bytes: u64, active: &[ActiveWorker]) -> bool {
    if active.len() >= cfg.max_workers {
        return false;
    }
    let total_observed = master_rss_bytes
        + active.iter().map(|w| w.last_rss_bytes.unwrap_or(0)).sum::<u64>();
    total_observed < cfg.threshold_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_workers: usize, container_limit_mb: u64, mem_threshold_percent: u8) -> Config {
        Config { max_workers, container_limit_mb, mem_threshold_percent, ..Default::default() }
    }

    #[test]
    fn admits_when_below_both_caps() {
        let c = cfg(2, 4096, 75);
        assert!(can_spawn(&c, 0, &[]));
    }

    #[test]
    fn refuses_when_worker_count_cap_reached() {
        let c = cfg(1, 4096, 75);
        let active = vec![ActiveWorker { last_rss_bytes: Some(1) }];
        assert!(!can_spawn(&c, 0, &active));
    }

    #[test]
    fn refuses_when_memory_threshold_exceeded() {
        // S6: MAX_WORKERS=4, containerLimitMB=1024, memoryThresholdPercent=10 => threshold ~107MB.
        let c = cfg(4, 1024, 10);
        let active = vec![ActiveWorker { last_rss_bytes: Some(200 * 1024 * 1024) }];
        assert!(!can_spawn(&c, 0, &active));
    }

    #[test]
    fn newly_spawned_worker_with_no_sample_contributes_zero() {
        let c = cfg(4, 1024, 10);
        let active = vec![ActiveWorker { last_rss_bytes: None }];
        assert!(can_spawn(&c, 0, &active));
    }

    #[test]
    fn master_rss_counts_toward_the_same_threshold() {
        let c = cfg(4, 1024, 10);
        let threshold = c.threshold_bytes();
        assert!(!can_spawn(&c, threshold, &[]));
        assert!(can_spawn(&c, threshold - 1, &[]));
    }
}
