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

//! The memory-sample shape shared by the worker's self-reporting and the host's own sampler.

use serde::{Deserialize, Serialize};

/// One point in a process's memory timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub worker_id: u64,
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// An ordered timeline of samples for a single process, with a running peak.
///
/// This is the in-memory accumulator driven by `corpuslint_worker::sampler::MemorySampler` and
/// the host's own self-sampling; it is deliberately dumb (append + max) so both sides can share
/// it without either depending on the other's process-spawning concerns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    samples: Vec<MemorySample>,
    peak_rss_bytes: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MemorySample) {
        self.peak_rss_bytes = self.peak_rss_bytes.max(sample.rss_bytes);
        self.samples.push(sample);
    }

    /// The maximum RSS ever observed; `0` for an empty timeline.
    pub fn peak(&self) -> u64 {
        self.peak_rss_bytes
    }

    pub fn last(&self) -> Option<&MemorySample> {
        self.samples.last()
    }

    pub fn samples(&self) -> &[MemorySample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rss: u64) -> MemorySample {
        MemorySample { worker_id: 1, rss_bytes: rss, heap_used_bytes: rss / 2, timestamp: 0 }
    }

    #[test]
    fn empty_timeline_has_zero_peak() {
        assert_eq!(Timeline::new().peak(), 0);
    }

    #[test]
    fn peak_tracks_the_maximum_rss_seen() {
        let mut t = Timeline::new();
        t.push(sample(10));
        t.push(sample(30));
        t.push(sample(20));
        assert_eq!(t.peak(), 30);
        assert_eq!(t.last().unwrap().rss_bytes, 20);
    }
}
