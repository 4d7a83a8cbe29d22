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

//! The `Analyzer` collaborator (the external, out-of-scope linter) and the decorators the worker
//! wraps around it: [`ProcessAnalyzer`] for the real thing, [`ScenarioAnalyzer`] for
//! failure-injection testing.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use corpuslint_common::message::DiagnosticRecord;
use rand::Rng;
use serde::Deserialize;
use tokio::process::Command;

/// Failures an analyzer invocation can produce. Distinct from [`corpuslint_common::FailureKind`]:
/// this is the analyzer's own typed error before the worker driver classifies it onto the wire
/// (see §7 / `driver::classify_analyzer_error`).
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Parsing error in {file}: {message}")]
    Parse { file: String, message: String },
    #[error("rule crash in rule {rule_id}: {message}")]
    RuleCrash { rule_id: String, message: String },
    #[error("failed to invoke analyzer process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("analyzer exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },
    #[error("could not parse analyzer output as JSON: {0}")]
    MalformedOutput(#[source] serde_json::Error),
}

/// The seam the worker drives; everything downstream of this trait is the "black box" named out
/// of scope in §1, given just enough shape to be swappable between the real process-based
/// implementation and test doubles.
///
/// The return type is spelled out as `impl Future<..> + Send` rather than a plain `async fn` so
/// that generic callers (the driver spawns the in-flight lint future onto the `tokio::select!` in
/// `driver::run`, and tests spawn it onto the runtime directly) can rely on the future being
/// `Send` without boxing it - the implicit associated future of a bare `async fn` in a trait
/// carries no such guarantee.
pub trait Analyzer: Send + Sync {
    fn run(
        &self,
        config_path: &Path,
        files: &[String],
    ) -> impl Future<Output = Result<Vec<DiagnosticRecord>, AnalyzerError>> + Send;
}

#[derive(Deserialize)]
struct ProcessAnalyzerRecord {
    file: String,
    error_count: u32,
    warning_count: u32,
    #[serde(flatten)]
    extra: serde_json::Value,
}

/// Shells out to an external linter binary, passing the config path and file list, and parses
/// its JSON stdout into [`DiagnosticRecord`]s.
pub struct ProcessAnalyzer {
    program: String,
}

impl ProcessAnalyzer {
    /// `program` defaults to `lint` resolved on `PATH` when not overridden by configuration.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for ProcessAnalyzer {
    fn default() -> Self {
        Self::new("lint")
    }
}

impl Analyzer for ProcessAnalyzer {
    async fn run(&self, config_path: &Path, files: &[String]) -> Result<Vec<DiagnosticRecord>, AnalyzerError> {
        let output = Command::new(&self.program)
            .arg("--config")
            .arg(config_path)
            .args(files)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(AnalyzerError::Spawn)?;

        if !output.status.success() {
            return Err(AnalyzerError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let records: Vec<ProcessAnalyzerRecord> =
            serde_json::from_slice(&output.stdout).map_err(AnalyzerError::MalformedOutput)?;
        Ok(records
            .into_iter()
            .map(|r| DiagnosticRecord {
                file: r.file,
                error_count: r.error_count,
                warning_count: r.warning_count,
                extra: r.extra,
            })
            .collect())
    }
}

/// One failure-injection scenario, selected by `--test=<scenario>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    OomSingle,
    OomPersistent,
    ParseError,
    RuleCrash,
    RandomOom,
    SlowWorker,
    All,
}

impl std::str::FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oom-single" => Ok(Scenario::OomSingle),
            "oom-persistent" => Ok(Scenario::OomPersistent),
            "parse-error" => Ok(Scenario::ParseError),
            "rule-crash" => Ok(Scenario::RuleCrash),
            "random-oom" => Ok(Scenario::RandomOom),
            "slow-worker" => Ok(Scenario::SlowWorker),
            "all" => Ok(Scenario::All),
            other => Err(format!("unknown test scenario: {other}")),
        }
    }
}

/// Default bound on how many times `oom-single` will abort the worker before letting the
/// analyzer run for real (spec §4.4: `TEST_OOM_RETRIES`, default 1).
///
/// This process only ever sees the slice of that budget the host hands it: the host owns one
/// shared counter for the whole run (`corpuslint_host::worker_handle::process_spawner`) and
/// decrements it itself before respawning a bisected lineage, since a fresh worker process has no
/// memory of how many times an earlier process in the same lineage already killed itself.
pub const DEFAULT_TEST_OOM_RETRIES: u32 = 1;

/// Wraps a real (or stub) [`Analyzer`], intercepting calls that match the selected scenario
/// instead of delegating to it. Inert when constructed with no scenario - the worker never
/// builds one unless `--test` is set to something other than `none`.
pub struct ScenarioAnalyzer<A: Analyzer> {
    inner: A,
    scenario: Scenario,
    test_file: String,
    worker_id: u64,
    oom_retries_remaining: AtomicU32,
}

impl<A: Analyzer> ScenarioAnalyzer<A> {
    pub fn new(inner: A, scenario: Scenario, test_file: impl Into<String>, worker_id: u64) -> Self {
        Self {
            inner,
            scenario,
            test_file: test_file.into(),
            worker_id,
            oom_retries_remaining: AtomicU32::new(DEFAULT_TEST_OOM_RETRIES),
        }
    }

    /// Overrides the `oom-single` retry budget (spec §6: `TEST_OOM_RETRIES` env var).
    pub fn with_oom_retries(mut self, retries: u32) -> Self {
        self.oom_retries_remaining = AtomicU32::new(retries);
        self
    }

    fn targets(&self, files: &[String]) -> bool {
        files.iter().any(|f| f.contains(&self.test_file))
    }

    /// Terminates the process to simulate the kernel OOM-killing a worker. Tests exercising this
    /// path run it in a spawned child process rather than calling it in-process.
    fn simulate_oom_kill(&self) -> ! {
        #[cfg(unix)]
        unsafe {
            libc::kill(libc::getpid(), libc::SIGKILL);
        }
        std::process::exit(137);
    }

    async fn maybe_oom_single(&self, files: &[String]) -> bool {
        if !self.targets(files) {
            return false;
        }
        let remaining = self.oom_retries_remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        self.oom_retries_remaining.fetch_sub(1, Ordering::SeqCst);
        self.simulate_oom_kill();
    }

    async fn maybe_oom_persistent(&self, files: &[String]) -> bool {
        if self.targets(files) {
            self.simulate_oom_kill();
        }
        false
    }

    async fn maybe_random_oom(&self) -> bool {
        // Seeded from worker_id so a given worker's behavior is deterministic across runs,
        // per spec §4.4.
        let mut rng = seeded_rng(self.worker_id);
        if rng.gen_bool(0.5) {
            self.simulate_oom_kill();
        }
        false
    }

    async fn maybe_slow(&self) {
        if matches!(self.scenario, Scenario::SlowWorker | Scenario::All) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

impl<A: Analyzer> Analyzer for ScenarioAnalyzer<A> {
    async fn run(&self, config_path: &Path, files: &[String]) -> Result<Vec<DiagnosticRecord>, AnalyzerError> {
        match self.scenario {
            Scenario::OomSingle => {
                self.maybe_oom_single(files).await;
            }
            Scenario::OomPersistent => {
                self.maybe_oom_persistent(files).await;
            }
            Scenario::RandomOom => {
                self.maybe_random_oom().await;
            }
            Scenario::ParseError => {
                if self.targets(files) {
                    return Err(AnalyzerError::Parse {
                        file: self.test_file.clone(),
                        message: "Parsing error: unexpected token".into(),
                    });
                }
            }
            Scenario::RuleCrash => {
                return Err(AnalyzerError::RuleCrash {
                    rule_id: "no-unused-vars".into(),
                    message: "rule no-unused-vars panicked".into(),
                });
            }
            Scenario::SlowWorker => {
                self.maybe_slow().await;
            }
            Scenario::All => {
                self.maybe_oom_single(files).await;
                self.maybe_oom_persistent(files).await;
                if self.targets(files) {
                    return Err(AnalyzerError::Parse {
                        file: self.test_file.clone(),
                        message: "Parsing error: unexpected token".into(),
                    });
                }
                self.maybe_slow().await;
            }
        }
        self.inner.run(config_path, files).await
    }
}

/// Seeds a `StdRng` from `worker_id` so `random-oom` is deterministic within a given run.
fn seeded_rng(seed: u64) -> rand::rngs::StdRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAnalyzer;
    impl Analyzer for StubAnalyzer {
        async fn run(&self, _config_path: &Path, files: &[String]) -> Result<Vec<DiagnosticRecord>, AnalyzerError> {
            Ok(files
                .iter()
                .map(|f| DiagnosticRecord {
                    file: f.clone(),
                    error_count: 0,
                    warning_count: 0,
                    extra: serde_json::json!({}),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn parse_error_scenario_only_triggers_on_matching_file() {
        let scenario = ScenarioAnalyzer::new(StubAnalyzer, Scenario::ParseError, "bad.ts", 1);
        let result = scenario.run(Path::new("/cfg.json"), &["/src/good.ts".into()]).await;
        assert!(result.is_ok());

        let result = scenario
            .run(Path::new("/cfg.json"), &["/src/bad.ts".into(), "/src/good.ts".into()])
            .await;
        assert!(matches!(result, Err(AnalyzerError::Parse { .. })));
    }

    #[tokio::test]
    async fn rule_crash_scenario_fails_regardless_of_file_list() {
        let scenario = ScenarioAnalyzer::new(StubAnalyzer, Scenario::RuleCrash, "unused-sentinel", 1);
        let result = scenario.run(Path::new("/cfg.json"), &["/src/any.ts".into()]).await;
        assert!(matches!(result, Err(AnalyzerError::RuleCrash { .. })));
    }

    #[tokio::test]
    async fn oom_single_with_zero_retries_never_kills_and_passes_through() {
        // `simulate_oom_kill` terminates the process, so this only exercises the safe branch
        // (retries already exhausted) rather than the kill itself.
        let scenario =
            ScenarioAnalyzer::new(StubAnalyzer, Scenario::OomSingle, "bad.ts", 1).with_oom_retries(0);
        let result = scenario.run(Path::new("/cfg.json"), &["/src/bad.ts".into()]).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn non_target_files_pass_through_to_the_inner_analyzer() {
        let scenario = ScenarioAnalyzer::new(StubAnalyzer, Scenario::ParseError, "never-matches-xyz", 1);
        let result = scenario
            .run(Path::new("/cfg.json"), &["/src/a.ts".into(), "/src/b.ts".into()])
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
    }
}
