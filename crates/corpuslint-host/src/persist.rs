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

//! JSON writers for the persisted state layout (spec §6): one writer per artifact kind, sharing
//! the same `serde_json::to_writer_pretty` idiom used for config/results elsewhere in the corpus.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use corpuslint_common::message::DiagnosticRecord;
use corpuslint_common::sample::{MemorySample, Timeline};
use serde::Serialize;

use crate::aggregator::Summary;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to create output directory {path:?}: {err}")]
    CreateDir { path: PathBuf, err: String },
    #[error("failed to write {path:?}: {err}")]
    Write { path: PathBuf, err: String },
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let file =
        File::create(path).map_err(|err| PersistError::Write { path: path.to_path_buf(), err: err.to_string() })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|err| PersistError::Write { path: path.to_path_buf(), err: err.to_string() })
}

/// Creates `output_dir` (and any missing parents) if it doesn't already exist.
pub fn ensure_output_dir(output_dir: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(output_dir)
        .map_err(|err| PersistError::CreateDir { path: output_dir.to_path_buf(), err: err.to_string() })
}

pub fn write_summary(output_dir: &Path, summary: &Summary) -> Result<(), PersistError> {
    write_json(&output_dir.join("summary.json"), summary)
}

pub fn write_master_memory(output_dir: &Path, timeline: &Timeline) -> Result<(), PersistError> {
    write_json(&output_dir.join("master-memory.json"), timeline)
}

pub fn write_worker_results(
    output_dir: &Path,
    worker_id: u64,
    results: &[DiagnosticRecord],
) -> Result<(), PersistError> {
    write_json(&output_dir.join(format!("worker-{worker_id}-results.json")), results)
}

pub fn write_worker_memory(
    output_dir: &Path,
    worker_id: u64,
    samples: &[MemorySample],
) -> Result<(), PersistError> {
    write_json(&output_dir.join(format!("worker-{worker_id}-memory.json")), samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_round_trips_worker_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        ensure_output_dir(dir.path()).unwrap();

        let results = vec![DiagnosticRecord {
            file: "/src/a.ts".into(),
            error_count: 1,
            warning_count: 0,
            extra: serde_json::json!({}),
        }];
        write_worker_results(dir.path(), 3, &results).unwrap();
        let path = dir.path().join("worker-3-results.json");
        assert!(path.exists());
        let read_back: Vec<DiagnosticRecord> = serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].error_count, 1);

        let mut timeline = Timeline::new();
        timeline.push(MemorySample { worker_id: 3, rss_bytes: 100, heap_used_bytes: 50, timestamp: 0 });
        write_worker_memory(dir.path(), 3, timeline.samples()).unwrap();
        assert!(dir.path().join("worker-3-memory.json").exists());
    }

    #[test]
    fn ensure_output_dir_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
