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

//! Periodic RSS/heap sampling (C1), grounded on the same `sysinfo`-driven polling loop used for
//! master-side self-sampling in `corpuslint-host`, but run at the worker's faster default tick.

use std::time::Duration;

use corpuslint_common::sample::{MemorySample, Timeline};
use sysinfo::{Pid, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default tick interval for in-worker sampling (spec §4.1: 200ms in workers).
pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_millis(200);

/// Drives a periodic tick that samples this process's own RSS/heap and forwards each sample on
/// `tx`, while also accumulating a local [`Timeline`] the driver can consult for the final peak.
pub struct MemorySampler {
    worker_id: u64,
    handle: Option<JoinHandle<Timeline>>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl MemorySampler {
    pub fn new(worker_id: u64) -> Self {
        Self { worker_id, handle: None, stop_tx: None }
    }

    /// Starts sampling this process at `interval`, forwarding every sample on `tx`. Calling
    /// `start` while already running replaces the previous run.
    pub fn start(&mut self, interval: Duration, tx: mpsc::Sender<MemorySample>) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let worker_id = self.worker_id;
        let pid = Pid::from_u32(std::process::id());

        let handle = tokio::spawn(async move {
            let mut sys = System::new();
            let mut timeline = Timeline::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sys.refresh_process(pid);
                        let (rss, heap) = match sys.process(pid) {
                            Some(proc) => (proc.memory(), proc.virtual_memory().min(proc.memory())),
                            None => (0, 0),
                        };
                        let sample = MemorySample {
                            worker_id,
                            rss_bytes: rss,
                            heap_used_bytes: heap,
                            timestamp: current_millis(),
                        };
                        timeline.push(sample);
                        // A stopped/dropped receiver just means nobody is listening anymore; the
                        // sampler keeps accumulating into `timeline` regardless.
                        let _ = tx.send(sample).await;
                    }
                    _ = stop_rx.recv() => break,
                }
            }
            timeline
        });

        self.handle = Some(handle);
        self.stop_tx = Some(stop_tx);
    }

    /// Stops sampling (idempotent) and returns the accumulated timeline, if sampling was ever
    /// started.
    pub async fn stop(&mut self) -> Option<Timeline> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(()).await;
        }
        match self.handle.take() {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }
}

/// `timestamp` is milliseconds-since-epoch; sampling ticks happen inside a running tokio runtime
/// only, so `SystemTime::now()` is always available here (unlike workflow-script contexts).
fn current_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sampler_emits_at_least_one_sample_before_stop() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sampler = MemorySampler::new(1);
        sampler.start(Duration::from_millis(10), tx);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(first.unwrap().is_some());

        let timeline = sampler.stop().await.unwrap();
        assert!(!timeline.is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_harmless_no_op() {
        let mut sampler = MemorySampler::new(1);
        assert!(sampler.stop().await.is_none());
    }
}
