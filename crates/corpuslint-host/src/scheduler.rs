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

//! The orchestrator reactor (C6): one `mpsc` channel fed by per-worker IO tasks, drained by a
//! single `tokio::select!` loop that exclusively owns [`SchedulerState`] - the same shape as
//! `run_engine`'s `internal_rx`-driven loop in the teacher's `engine.rs`, adapted from a
//! job-queue-backed-by-HTTP engine to a file-batch queue backed by spawned worker processes.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use corpuslint_common::batch::{initial_partition, Batch};
use corpuslint_common::message::{recv_classified, Classification, DiagnosticRecord, FailureKind, IpcMessage};
use corpuslint_common::sample::{MemorySample, Timeline};
use sysinfo::{Pid, System};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::admission::{can_spawn, ActiveWorker as AdmissionWorker};
use crate::classifier::{classify_exit, recover, FailedFile, RecoveryAction};
use crate::config::Config;
use crate::worker_handle::{ExitInfo, Spawner, WorkerHandle};
use crate::LOG_TARGET;

/// Master-side self-sampling tick (spec §4.1: 500ms default in the orchestrator).
const MASTER_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Per-worker summary record retained for the final report (spec §4.8).
#[derive(Debug, Clone)]
pub struct WorkerStat {
    pub worker_id: u64,
    pub files: usize,
    pub peak_rss_bytes: u64,
    pub duration_ms: u64,
}

/// Everything the run produced, handed to the aggregator.
pub struct RunOutcome {
    pub completed: HashMap<u64, Vec<DiagnosticRecord>>,
    pub failed: Vec<FailedFile>,
    pub worker_stats: Vec<WorkerStat>,
    pub worker_samples: HashMap<u64, Vec<MemorySample>>,
    pub master_timeline: Timeline,
}

/// Parameters for one run. `spawn` is the only moving part that differs between production (a
/// [`crate::worker_handle::process_spawner`] wired to the real worker binary) and tests (a fake
/// in-process worker); everything else is read-only for the reactor's lifetime.
pub struct RunParams<'a> {
    pub cfg: &'a Config,
    pub files: &'a [String],
    pub spawn: Spawner,
}

struct ActiveEntry {
    batch: Batch,
    samples: Vec<MemorySample>,
    last_rss_bytes: Option<u64>,
    started_at: Instant,
    /// Set once a terminal `result` or `error` message (or a classified exit) has already been
    /// resolved, so the exit handler doesn't double-process it.
    handled: bool,
}

struct SchedulerState {
    pending: VecDeque<Batch>,
    active: HashMap<u64, ActiveEntry>,
    completed: HashMap<u64, Vec<DiagnosticRecord>>,
    failed: Vec<FailedFile>,
    worker_stats: Vec<WorkerStat>,
    next_batch_id: u64,
    next_worker_id: u64,
    master_rss_bytes: u64,
    max_retries: u32,
}

enum SchedulerEvent {
    Message(u64, Classification),
    Exited(u64, std::io::Result<ExitInfo>),
}

/// Runs the scheduler to completion: partitions `params.files`, spawns workers under admission
/// control, classifies and recovers from failures, and returns once `pending` and `active` are
/// both empty (spec §4.6's termination condition).
pub async fn run(params: RunParams<'_>) -> RunOutcome {
    let mut batch_id_counter: u64 = 0;
    let batches = initial_partition(params.files, params.cfg.initial_divisor, || {
        let id = batch_id_counter;
        batch_id_counter += 1;
        id
    });

    let mut state = SchedulerState {
        pending: batches.into_iter().collect(),
        active: HashMap::new(),
        completed: HashMap::new(),
        failed: Vec::new(),
        worker_stats: Vec::new(),
        next_batch_id: batch_id_counter,
        next_worker_id: 0,
        master_rss_bytes: 0,
        max_retries: params.cfg.max_retries,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerEvent>();
    let mut sys = System::new();
    let own_pid = Pid::from_u32(std::process::id());
    let mut master_ticker = tokio::time::interval(MASTER_SAMPLE_INTERVAL);
    let mut master_timeline = Timeline::new();
    let mut worker_samples: HashMap<u64, Vec<MemorySample>> = HashMap::new();

    spawn_loop(&mut state, &params, &tx).await;

    loop {
        if state.pending.is_empty() && state.active.is_empty() {
            break;
        }

        tokio::select! {
            _ = master_ticker.tick() => {
                sys.refresh_process(own_pid);
                let rss = sys.process(own_pid).map(|p| p.memory()).unwrap_or(0);
                state.master_rss_bytes = rss;
                master_timeline.push(MemorySample {
                    worker_id: 0,
                    rss_bytes: rss,
                    heap_used_bytes: 0,
                    timestamp: now_millis(),
                });
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    SchedulerEvent::Message(worker_id, classification) => {
                        handle_message(&mut state, worker_id, classification);
                    }
                    SchedulerEvent::Exited(worker_id, exit_result) => {
                        handle_exit(&mut state, worker_id, exit_result, &mut worker_samples);
                    }
                }
                spawn_loop(&mut state, &params, &tx).await;
            }
        }
    }

    RunOutcome {
        completed: state.completed,
        failed: state.failed,
        worker_stats: state.worker_stats,
        worker_samples,
        master_timeline,
    }
}

async fn spawn_loop(state: &mut SchedulerState, params: &RunParams<'_>, tx: &mpsc::UnboundedSender<SchedulerEvent>) {
    loop {
        let admission_view: Vec<AdmissionWorker> = state
            .active
            .values()
            .map(|w| AdmissionWorker { last_rss_bytes: w.last_rss_bytes })
            .collect();
        if state.pending.is_empty() || !can_spawn(params.cfg, state.master_rss_bytes, &admission_view) {
            break;
        }
        let batch = state.pending.pop_front().expect("checked non-empty above");
        let worker_id = state.next_worker_id;
        state.next_worker_id += 1;

        match (params.spawn)(worker_id, batch.clone()).await {
            Ok(handle) => {
                state.active.insert(
                    worker_id,
                    ActiveEntry {
                        batch,
                        samples: Vec::new(),
                        last_rss_bytes: None,
                        started_at: Instant::now(),
                        handled: false,
                    },
                );
                spawn_io_tasks(handle, tx.clone());
            }
            Err(err) => {
                warn!(target: LOG_TARGET, worker_id, %err, "failed to spawn worker; re-queueing batch");
                state.pending.push_front(batch);
                break;
            }
        }
    }
}

/// One task per worker that first drains every message the worker sends, then awaits its exit.
///
/// Draining to EOF before awaiting `child.wait()` (rather than racing two independent tasks
/// against each other) is deliberate: it guarantees every `Message` event this worker will ever
/// produce is enqueued on `tx` strictly before its `Exited` event, closing the race named in spec
/// §5 ("the orchestrator must tolerate the race where `result`/`error` is observed together with,
/// or shortly before, the process-exit notification") by construction instead of by tolerating it
/// in the handler - a dropped-in-the-gap `result` would otherwise silently violate the
/// conservation invariant (§8 property 1) if the exit event reached `handle_exit` first.
fn spawn_io_tasks(handle: WorkerHandle, tx: mpsc::UnboundedSender<SchedulerEvent>) {
    let WorkerHandle { worker_id, stream, exit } = handle;
    let (mut read_half, _write_half) = stream.into_split();

    tokio::spawn(async move {
        loop {
            match recv_classified(&mut read_half).await {
                Ok(classification) => {
                    if tx.send(SchedulerEvent::Message(worker_id, classification)).is_err() {
                        return;
                    }
                }
                Err(_) => break, // EOF or IO error: the socket is done, move on to the exit wait.
            }
        }

        let result = exit.await;
        let _ = tx.send(SchedulerEvent::Exited(worker_id, result));
    });
}

fn handle_message(state: &mut SchedulerState, worker_id: u64, classification: Classification) {
    let msg = match classification {
        Classification::Message(msg) => msg,
        Classification::Unknown { raw } => {
            warn!(target: LOG_TARGET, worker_id, %raw, "worker sent an unrecognized message");
            return;
        }
    };

    let Some(entry) = state.active.get_mut(&worker_id) else {
        warn!(target: LOG_TARGET, worker_id, "message from a worker no longer tracked as active");
        return;
    };

    match msg {
        IpcMessage::Memory { rss, heap_used, timestamp, .. } => {
            let sample = MemorySample { worker_id, rss_bytes: rss, heap_used_bytes: heap_used, timestamp };
            entry.last_rss_bytes = Some(rss);
            entry.samples.push(sample);
        }
        IpcMessage::Result { results, peak_rss, duration_ms, .. } => {
            info!(target: LOG_TARGET, worker_id, file_count = entry.batch.files.len(), "batch succeeded");
            state.worker_stats.push(WorkerStat {
                worker_id,
                files: entry.batch.files.len(),
                peak_rss_bytes: peak_rss,
                duration_ms,
            });
            state.completed.insert(worker_id, results);
            entry.handled = true;
        }
        IpcMessage::Error { error_type, message, file, .. } => {
            warn!(target: LOG_TARGET, worker_id, %error_type, %message, "batch failed");
            apply_recovery(state, worker_id, error_type, file.as_deref(), &message);
        }
        IpcMessage::Lint { .. } => {
            warn!(target: LOG_TARGET, worker_id, "unexpected lint message from a worker");
        }
    }
}

fn apply_recovery(
    state: &mut SchedulerState,
    worker_id: u64,
    kind: FailureKind,
    maybe_file: Option<&str>,
    message: &str,
) {
    let Some(entry) = state.active.get_mut(&worker_id) else { return };
    entry.handled = true;
    let batch = entry.batch.clone();
    let max_retries = state.max_retries;

    let action = recover(&batch, kind, maybe_file, message, max_retries, &mut || {
        let id = state.next_batch_id;
        state.next_batch_id += 1;
        id
    });
    dispatch_recovery(state, action);
}

fn dispatch_recovery(state: &mut SchedulerState, action: RecoveryAction) {
    match action {
        RecoveryAction::Bisect(left, right) => {
            state.pending.push_back(left);
            state.pending.push_back(right);
        }
        RecoveryAction::FailBatch(mut failed) => state.failed.append(&mut failed),
        RecoveryAction::FailOneRequeueRest(failed, requeued) => {
            state.failed.push(failed);
            state.pending.push_back(requeued);
        }
    }
}

fn handle_exit(
    state: &mut SchedulerState,
    worker_id: u64,
    exit_result: std::io::Result<ExitInfo>,
    worker_samples: &mut HashMap<u64, Vec<MemorySample>>,
) {
    let Some(entry) = state.active.remove(&worker_id) else { return };
    worker_samples.insert(worker_id, entry.samples);

    if entry.handled {
        return;
    }

    let exit_info = match exit_result {
        Ok(info) => info,
        Err(err) => {
            warn!(target: LOG_TARGET, worker_id, %err, "failed to observe worker exit status");
            ExitInfo { code: None, was_signaled_kill: true }
        }
    };

    // The worker exited without us ever resolving a `result`/`error` for its batch (`entry.handled`
    // is false). `classify_exit` only speaks to the OOM/forced-kill/nonzero-exit cases named in
    // spec §4.6; a clean `code == 0` exit that still never produced a terminal message is not
    // named there, but treating it as a silent success would drop the batch's files out of every
    // tracked set, violating the conservation invariant (§8 property 1). Fall back to `Unknown` so
    // every unresolved batch is always classified one way or another.
    let kind = classify_exit(exit_info.code, exit_info.was_signaled_kill).unwrap_or(FailureKind::Unknown);
    let _elapsed = entry.started_at.elapsed();
    warn!(target: LOG_TARGET, worker_id, %kind, code = ?exit_info.code, "worker exited without a terminal message");
    let message = format!("worker exited (code={:?}, forced_kill={}) without a terminal message", exit_info.code, exit_info.was_signaled_kill);
    let max_retries = state.max_retries;
    let action = recover(&entry.batch, kind, None, &message, max_retries, &mut || {
        let id = state.next_batch_id;
        state.next_batch_id += 1;
        id
    });
    dispatch_recovery(state, action);
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
