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

//! The worker's state machine (C4): `START -> AWAIT_TASK -> LINTING -> REPORTING_{OK,ERR} -> EXIT`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use corpuslint_common::message::{recv_classified, send_message, Classification, FailureKind, IpcMessage};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::sampler::{MemorySampler, DEFAULT_WORKER_INTERVAL};
use crate::LOG_TARGET;

/// Runs one worker's entire lifetime against an already-connected socket: waits for exactly one
/// `lint` task, runs `analyzer` against it while sampling memory, and reports exactly one
/// terminal message before returning.
///
/// Per spec §4.4, a worker handles a single task per process invocation - there is no loop back
/// to `AWAIT_TASK` after reporting. The `LINTING` state runs on a spawned task rather than being
/// polled in place so that an uncaught panic inside the analyzer (spec §4.4's "asynchronous fatal
/// condition") surfaces as a `JoinError` instead of unwinding out of the driver and killing the
/// process before any message is sent; `stringify_join_panic` turns that into the same `unknown`
/// `error` message a forced-kill-free crash would produce.
pub async fn run(mut stream: UnixStream, analyzer: impl Analyzer + 'static) -> std::io::Result<()> {
    let (mut read_half, mut write_half) = stream.split();

    info!(target: LOG_TARGET, "awaiting task");
    let task = match recv_classified(&mut read_half).await? {
        Classification::Message(IpcMessage::Lint { worker_id, config_path, files, .. }) => {
            (worker_id, config_path, files)
        }
        Classification::Message(other) => {
            warn!(target: LOG_TARGET, ?other, "expected a lint message first, got something else");
            return Ok(());
        }
        Classification::Unknown { raw } => {
            warn!(target: LOG_TARGET, %raw, "unrecognized first message");
            return Ok(());
        }
    };
    let (worker_id, config_path, files) = task;

    info!(target: LOG_TARGET, worker_id, file_count = files.len(), "linting");

    let (mem_tx, mut mem_rx) = mpsc::channel(256);
    let mut sampler = MemorySampler::new(worker_id);
    sampler.start(DEFAULT_WORKER_INTERVAL, mem_tx);

    // Forward each sample to the master as it arrives; this task ends when the sampler's sender
    // is dropped (on `stop`), which happens once linting below completes.
    let forward_worker_id = worker_id;
    let started = Instant::now();

    let analyzer = Arc::new(analyzer);
    let task_analyzer = Arc::clone(&analyzer);
    let task_config_path = PathBuf::from(&config_path);
    let task_files = files.clone();
    let mut lint_task = tokio::spawn(async move { task_analyzer.run(&task_config_path, &task_files).await });

    let outcome = loop {
        tokio::select! {
            biased;
            sample = mem_rx.recv() => {
                let Some(sample) = sample else { continue };
                let msg = IpcMessage::Memory {
                    worker_id: forward_worker_id,
                    rss: sample.rss_bytes,
                    heap_used: sample.heap_used_bytes,
                    timestamp: sample.timestamp,
                };
                if let Err(err) = send_message(&mut write_half, &msg).await {
                    warn!(target: LOG_TARGET, %err, "failed to forward memory sample");
                }
            }
            joined = &mut lint_task => break joined,
        }
    };
    let peak_rss = sampler.stop().await.map(|t| t.peak()).unwrap_or(0);

    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(results)) => {
            let msg = IpcMessage::Result { worker_id, results, peak_rss, duration_ms };
            send_message(&mut write_half, &msg).await?;
        }
        Ok(Err(err)) => {
            let (error_type, file) = classify_analyzer_error(&err);
            let msg = IpcMessage::Error { worker_id, error_type, message: err.to_string(), file };
            send_message(&mut write_half, &msg).await?;
        }
        Err(join_err) => {
            // The analyzer task panicked (or was cancelled, which never happens here since we
            // only abort by dropping the whole process). Per spec §4.4 this is the "asynchronous
            // fatal condition" path: report it as `unknown` rather than letting the panic unwind
            // past this function with no terminal message ever sent.
            let message = stringify_join_panic(join_err);
            warn!(target: LOG_TARGET, worker_id, %message, "analyzer task panicked");
            let msg = IpcMessage::Error { worker_id, error_type: FailureKind::Unknown, message, file: None };
            send_message(&mut write_half, &msg).await?;
        }
    }

    Ok(())
}

/// Extracts a human-readable message from a panicking [`tokio::task::JoinError`], mirroring the
/// teacher's `stringify_panic_payload` (adapted from a raw `Box<dyn Any>` payload, which the PVF
/// worker catches itself via `panic::catch_unwind`, to `JoinError`'s own payload accessor, since
/// here the panic is caught by the runtime at the task boundary instead).
fn stringify_join_panic(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            format!("analyzer panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("analyzer panicked: {s}")
        } else {
            "analyzer panicked with an unknown payload".to_string()
        }
    } else {
        "analyzer task was cancelled".to_string()
    }
}

/// Maps an [`AnalyzerError`] to the wire [`FailureKind`] and an optional offending file, per
/// the classification table in spec §7 (mirrored on the host side for defense in depth against
/// a worker that dies before this classification can run).
pub fn classify_analyzer_error(err: &AnalyzerError) -> (FailureKind, Option<String>) {
    match err {
        AnalyzerError::Parse { file, .. } => (FailureKind::ParseError, Some(file.clone())),
        AnalyzerError::RuleCrash { .. } => (FailureKind::RuleCrash, None),
        AnalyzerError::Spawn(_) | AnalyzerError::NonZeroExit { .. } | AnalyzerError::MalformedOutput(_) => {
            (FailureKind::Unknown, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpuslint_common::message::DiagnosticRecord;
    use std::path::Path as StdPath;

    struct OkAnalyzer;
    impl Analyzer for OkAnalyzer {
        async fn run(&self, _c: &StdPath, files: &[String]) -> Result<Vec<DiagnosticRecord>, AnalyzerError> {
            Ok(files
                .iter()
                .map(|f| DiagnosticRecord { file: f.clone(), error_count: 0, warning_count: 0, extra: serde_json::json!({}) })
                .collect())
        }
    }

    #[test]
    fn classify_parse_error_names_the_file() {
        let err = AnalyzerError::Parse { file: "/a.ts".into(), message: "bad token".into() };
        let (kind, file) = classify_analyzer_error(&err);
        assert_eq!(kind, FailureKind::ParseError);
        assert_eq!(file.as_deref(), Some("/a.ts"));
    }

    #[test]
    fn classify_rule_crash_names_no_file() {
        let err = AnalyzerError::RuleCrash { rule_id: "no-unused-vars".into(), message: "boom".into() };
        let (kind, file) = classify_analyzer_error(&err);
        assert_eq!(kind, FailureKind::RuleCrash);
        assert!(file.is_none());
    }

    #[tokio::test]
    async fn run_reports_a_result_message_on_success() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let task = IpcMessage::Lint {
            worker_id: 7,
            config_path: "/cfg.json".into(),
            files: vec!["/a.ts".into(), "/b.ts".into()],
            target_path: None,
        };
        send_message(&mut b, &task).await.unwrap();

        let driver = tokio::spawn(run(a, OkAnalyzer));

        // Drain whatever memory samples and the terminal message arrive on the master side.
        let mut final_msg = None;
        for _ in 0..64 {
            match recv_classified(&mut b).await {
                Ok(Classification::Message(msg @ IpcMessage::Result { .. })) => {
                    final_msg = Some(msg);
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        driver.await.unwrap().unwrap();
        assert!(matches!(final_msg, Some(IpcMessage::Result { .. })));
    }

    struct PanickingAnalyzer;
    impl Analyzer for PanickingAnalyzer {
        async fn run(&self, _c: &StdPath, _files: &[String]) -> Result<Vec<DiagnosticRecord>, AnalyzerError> {
            panic!("simulated analyzer bug");
        }
    }

    #[tokio::test]
    async fn run_reports_an_unknown_error_when_the_analyzer_panics() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let task = IpcMessage::Lint {
            worker_id: 9,
            config_path: "/cfg.json".into(),
            files: vec!["/a.ts".into()],
            target_path: None,
        };
        send_message(&mut b, &task).await.unwrap();

        let driver = tokio::spawn(run(a, PanickingAnalyzer));

        let mut final_msg = None;
        for _ in 0..64 {
            match recv_classified(&mut b).await {
                Ok(Classification::Message(msg @ IpcMessage::Error { .. })) => {
                    final_msg = Some(msg);
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        driver.await.unwrap().unwrap();
        match final_msg {
            Some(IpcMessage::Error { error_type, file, .. }) => {
                assert_eq!(error_type, FailureKind::Unknown);
                assert!(file.is_none());
            }
            other => panic!("expected an Error message, got {other:?}"),
        }
    }
}
