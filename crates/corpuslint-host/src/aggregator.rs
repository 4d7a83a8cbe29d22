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

//! Aggregator / Reporter (C8): consolidates a finished run's per-worker results into the
//! persisted `Summary` record and a human-readable report (spec §4.8/§6).

use std::path::Path;

use corpuslint_common::message::FailureKind;
use serde::Serialize;
use tracing::info;

use crate::classifier::FailedFile;
use crate::persist::{self, PersistError};
use crate::scheduler::{RunOutcome, WorkerStat};
use crate::LOG_TARGET;

/// The persisted shape of a [`FailedFile`]. Spec §3 names this field `path`; the in-flight
/// `classifier::FailedFile` calls it `file` since that's the name shared with `Batch::files`, but
/// the two should not be confused for the same wire contract.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedFailedFile {
    pub path: String,
    pub reason: FailureKind,
    pub message: String,
}

impl From<FailedFile> for PersistedFailedFile {
    fn from(f: FailedFile) -> Self {
        Self { path: f.file, reason: f.reason, message: f.message }
    }
}

/// Persisted per-worker summary record (spec §3 Summary: "per-worker records (id, file count
/// handled, peak RSS, duration)").
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker_id: u64,
    pub files: usize,
    pub peak_rss_bytes: u64,
    pub duration_ms: u64,
}

impl From<&WorkerStat> for WorkerSummary {
    fn from(s: &WorkerStat) -> Self {
        Self { worker_id: s.worker_id, files: s.files, peak_rss_bytes: s.peak_rss_bytes, duration_ms: s.duration_ms }
    }
}

/// The finalized run report (spec §3/§4.8), persisted verbatim as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_count: usize,
    pub total_errors: u32,
    pub total_warnings: u32,
    pub workers: Vec<WorkerSummary>,
    pub failures: Vec<PersistedFailedFile>,
}

/// Consolidates `outcome` into a [`Summary`], persisting every artifact named in spec §6 under
/// `output_dir` along the way, and prints the human-readable report.
pub fn finalize(outcome: RunOutcome, output_dir: &Path) -> Result<Summary, PersistError> {
    persist::ensure_output_dir(output_dir)?;

    let mut processed_files = 0usize;
    let mut total_errors = 0u32;
    let mut total_warnings = 0u32;
    for (&worker_id, results) in &outcome.completed {
        processed_files += results.len();
        for r in results {
            total_errors += r.error_count;
            total_warnings += r.warning_count;
        }
        persist::write_worker_results(output_dir, worker_id, results)?;
    }

    for (&worker_id, samples) in &outcome.worker_samples {
        persist::write_worker_memory(output_dir, worker_id, samples)?;
    }
    persist::write_master_memory(output_dir, &outcome.master_timeline)?;

    let failed_count = outcome.failed.len();
    let total_files = outcome.worker_stats.iter().map(|s| s.files).sum::<usize>() + failed_count;

    let summary = Summary {
        total_files,
        processed_files,
        failed_count,
        total_errors,
        total_warnings,
        workers: outcome.worker_stats.iter().map(WorkerSummary::from).collect(),
        failures: outcome.failed.into_iter().map(PersistedFailedFile::from).collect(),
    };

    persist::write_summary(output_dir, &summary)?;
    print_report(&summary);
    Ok(summary)
}

fn print_report(summary: &Summary) {
    info!(
        target: LOG_TARGET,
        total_files = summary.total_files,
        processed_files = summary.processed_files,
        failed_count = summary.failed_count,
        total_errors = summary.total_errors,
        total_warnings = summary.total_warnings,
        "run finished",
    );
    println!(
        "corpuslint: {} processed, {} failed, {} errors, {} warnings across {} worker(s)",
        summary.processed_files,
        summary.failed_count,
        summary.total_errors,
        summary.total_warnings,
        summary.workers.len(),
    );
    for failure in &summary.failures {
        eprintln!("  FAILED {} [{}]: {}", failure.path, failure.reason, failure.message);
    }
}

/// Process exit code per spec §4.8/§6: 0 if nothing failed, else 1.
pub fn exit_code(summary: &Summary) -> i32 {
    if summary.failed_count == 0 {
        0
    } else {
        1
    }
}
