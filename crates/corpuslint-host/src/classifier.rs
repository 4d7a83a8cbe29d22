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

//! Failure classification and recovery policy (C7), grounded on the PVF host's closed
//! `Outcome`-style enum (`OutOfMemory`, `JobDied`, ...) consumed by a single classify+recover
//! step, adapted from its `(worker died, exit status)` input to this system's
//! `(batch, error_type, message, maybe_file)` input (spec §4.7).

use corpuslint_common::batch::Batch;
use corpuslint_common::message::FailureKind;

/// A single file that will never be linted successfully in this run, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub file: String,
    pub reason: FailureKind,
    pub message: String,
}

/// What the scheduler should do in response to a classified worker failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Split the batch and enqueue both halves, one retry deeper.
    Bisect(Batch, Batch),
    /// Every file in the batch is terminally failed with the given reason.
    FailBatch(Vec<FailedFile>),
    /// A single identified file is terminally failed; the rest of the batch is re-queued as a
    /// fresh batch one retry deeper (the resolved open-policy decision, see DESIGN.md).
    FailOneRequeueRest(FailedFile, Batch),
}

/// Classifies a process exit into a [`FailureKind`], per the table in spec §4.6/§4.7: a forced
/// kill signal or exit code 137 means OOM; any other non-zero exit with no prior `result` means
/// `unknown`.
pub fn classify_exit(exit_code: Option<i32>, was_signaled_kill: bool) -> Option<FailureKind> {
    if was_signaled_kill || exit_code == Some(137) {
        return Some(FailureKind::Oom);
    }
    match exit_code {
        Some(0) | None => None,
        Some(_) => Some(FailureKind::Unknown),
    }
}

/// Classifies an error message's text into a [`FailureKind`] when the worker reported `unknown`
/// or didn't classify itself (defense in depth; the worker already classifies via
/// `corpuslint_worker::driver::classify_analyzer_error` in the common case).
pub fn classify_message(message: &str) -> FailureKind {
    if message.contains("Parsing error") || message.contains("parse error") {
        FailureKind::ParseError
    } else if message.contains("rule") && (message.contains("crash") || message.contains("panicked")) {
        FailureKind::RuleCrash
    } else {
        FailureKind::Unknown
    }
}

/// Applies the recovery policy in spec §4.7 to a classified failure.
///
/// `message` is attached verbatim to every [`FailedFile`] this call produces, so the persisted
/// failure list (spec §3 `FailedFile.message`) always carries the worker's own explanation rather
/// than just the reason code. `next_id` allocates ids for any new batches produced (bisection, or
/// the requeued remainder).
pub fn recover(
    batch: &Batch,
    kind: FailureKind,
    maybe_file: Option<&str>,
    message: &str,
    max_retries: u32,
    mut next_id: impl FnMut() -> u64,
) -> RecoveryAction {
    match kind {
        FailureKind::Oom if batch.retries < max_retries && batch.files.len() >= 2 => {
            let (left, right) = batch.bisect(&mut next_id).expect("len >= 2 guarantees a split");
            RecoveryAction::Bisect(left, right)
        }
        FailureKind::Oom => RecoveryAction::FailBatch(
            batch
                .files
                .iter()
                .map(|f| FailedFile { file: f.clone(), reason: FailureKind::Oom, message: message.to_string() })
                .collect(),
        ),
        FailureKind::ParseError if maybe_file.is_some() => {
            let target = maybe_file.expect("checked above");
            let failed =
                FailedFile { file: target.to_string(), reason: FailureKind::ParseError, message: message.to_string() };
            let remainder: Vec<String> = batch.files.iter().filter(|f| f.as_str() != target).cloned().collect();
            if remainder.is_empty() {
                RecoveryAction::FailBatch(vec![failed])
            } else {
                let requeued = Batch::new(next_id(), remainder, batch.retries + 1);
                RecoveryAction::FailOneRequeueRest(failed, requeued)
            }
        }
        FailureKind::ParseError | FailureKind::RuleCrash | FailureKind::Unknown => RecoveryAction::FailBatch(
            batch
                .files
                .iter()
                .map(|f| FailedFile { file: f.clone(), reason: kind, message: message.to_string() })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(start: u64) -> impl FnMut() -> u64 {
        let mut next = start;
        move || {
            let id = next;
            next += 1;
            id
        }
    }

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/src/f{i}.ts")).collect()
    }

    #[test]
    fn classify_exit_forced_kill_is_oom() {
        assert_eq!(classify_exit(None, true), Some(FailureKind::Oom));
    }

    #[test]
    fn classify_exit_code_137_is_oom() {
        assert_eq!(classify_exit(Some(137), false), Some(FailureKind::Oom));
    }

    #[test]
    fn classify_exit_zero_is_not_a_failure() {
        assert_eq!(classify_exit(Some(0), false), None);
    }

    #[test]
    fn classify_exit_other_nonzero_is_unknown() {
        assert_eq!(classify_exit(Some(1), false), Some(FailureKind::Unknown));
    }

    #[test]
    fn oom_within_retry_budget_bisects() {
        let batch = Batch::new(0, files(6), 0);
        let action = recover(&batch, FailureKind::Oom, None, "oom killed", 2, ids(100));
        match action {
            RecoveryAction::Bisect(left, right) => {
                assert_eq!(left.files.len() + right.files.len(), 6);
                assert_eq!(left.retries, 1);
            }
            other => panic!("expected Bisect, got {other:?}"),
        }
    }

    #[test]
    fn oom_on_singleton_fails_immediately_per_s3() {
        let batch = Batch::new(0, files(1), 2);
        let action = recover(&batch, FailureKind::Oom, None, "oom killed", 2, ids(100));
        assert_eq!(
            action,
            RecoveryAction::FailBatch(vec![FailedFile {
                file: "/src/f0.ts".into(),
                reason: FailureKind::Oom,
                message: "oom killed".into(),
            }])
        );
    }

    #[test]
    fn oom_at_retry_ceiling_fails_whole_batch() {
        let batch = Batch::new(0, files(4), 2);
        let action = recover(&batch, FailureKind::Oom, None, "oom killed", 2, ids(100));
        match action {
            RecoveryAction::FailBatch(failed) => assert_eq!(failed.len(), 4),
            other => panic!("expected FailBatch, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_with_file_requeues_the_remainder_per_s4() {
        let batch = Batch::new(0, files(4), 0);
        let target = "/src/f2.ts";
        let action = recover(&batch, FailureKind::ParseError, Some(target), "Parsing error: unexpected token", 2, ids(100));
        match action {
            RecoveryAction::FailOneRequeueRest(failed, requeued) => {
                assert_eq!(failed.file, target);
                assert_eq!(requeued.files.len(), 3);
                assert!(!requeued.files.contains(&target.to_string()));
                assert_eq!(requeued.retries, 1);
            }
            other => panic!("expected FailOneRequeueRest, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_without_file_fails_the_whole_batch() {
        let batch = Batch::new(0, files(3), 0);
        let action = recover(&batch, FailureKind::ParseError, None, "Parsing error: unexpected token", 2, ids(100));
        match action {
            RecoveryAction::FailBatch(failed) => assert_eq!(failed.len(), 3),
            other => panic!("expected FailBatch, got {other:?}"),
        }
    }

    #[test]
    fn rule_crash_fails_the_whole_batch_per_s5() {
        let batch = Batch::new(0, files(5), 0);
        let action = recover(&batch, FailureKind::RuleCrash, None, "rule no-unused-vars panicked", 2, ids(100));
        match action {
            RecoveryAction::FailBatch(failed) => {
                assert_eq!(failed.len(), 5);
                assert!(failed.iter().all(|f| f.reason == FailureKind::RuleCrash));
            }
            other => panic!("expected FailBatch, got {other:?}"),
        }
    }
}
