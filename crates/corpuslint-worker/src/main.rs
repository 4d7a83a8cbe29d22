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

//! Worker process entry point: connects to the master's Unix socket, runs one task, exits.
//!
//! Argument parsing here is deliberately hand-rolled rather than `clap`-derived: the worker is
//! spawned by the host with a small, fixed argument shape (mirroring
//! `WorkerHandle::spawn`'s `--socket-path`/`--worker-dir-path` convention in the teacher's worker
//! interface), and pulling in `clap`'s derive machinery for a handful of flags in a process that
//! must start as fast as possible buys nothing a plain scan over `std::env::args()` doesn't.

use std::str::FromStr;

use corpuslint_worker::analyzer::{ProcessAnalyzer, Scenario, ScenarioAnalyzer, DEFAULT_TEST_OOM_RETRIES};
use corpuslint_worker::driver;
use corpuslint_worker::LOG_TARGET;
use tokio::net::UnixStream;
use tracing::error;

struct WorkerArgs {
    socket_path: String,
    test_scenario: Option<Scenario>,
    test_file: String,
    analyzer_program: String,
    /// `oom-single`'s retry budget for this process invocation. Defaults to `TEST_OOM_RETRIES`,
    /// but the host overrides it per spawn with `--test-oom-retries` so that a bisected retry of
    /// the same file lineage sees a budget the host has already been decrementing, rather than a
    /// fresh one re-read from this process's own environment.
    oom_retries: u32,
}

fn parse_args() -> WorkerArgs {
    let mut socket_path = None;
    let mut test_scenario = std::env::var("TEST_SCENARIO").ok().and_then(|s| Scenario::from_str(&s).ok());
    let mut test_file = std::env::var("TEST_TARGET_FILE").unwrap_or_else(|_| "__no_target__".to_string());
    let mut analyzer_program = std::env::var("CORPUSLINT_ANALYZER_PROGRAM").unwrap_or_else(|_| "lint".to_string());
    let mut oom_retries = std::env::var("TEST_OOM_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TEST_OOM_RETRIES);

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--socket-path" => socket_path = args.next(),
            "--test" => {
                if let Some(v) = args.next() {
                    test_scenario = Scenario::from_str(&v).ok();
                }
            }
            "--test-file" => {
                if let Some(v) = args.next() {
                    test_file = v;
                }
            }
            "--analyzer-program" => {
                if let Some(v) = args.next() {
                    analyzer_program = v;
                }
            }
            "--test-oom-retries" => {
                if let Some(v) = args.next() {
                    if let Ok(n) = v.parse() {
                        oom_retries = n;
                    }
                }
            }
            _ => {}
        }
    }

    WorkerArgs {
        socket_path: socket_path.expect("--socket-path is required"),
        test_scenario,
        test_file,
        analyzer_program,
        oom_retries,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args();

    let stream = match UnixStream::connect(&args.socket_path).await {
        Ok(s) => s,
        Err(err) => {
            error!(target: LOG_TARGET, %err, socket_path = %args.socket_path, "failed to connect to master socket");
            std::process::exit(1);
        }
    };

    // worker_id is assigned by the master and arrives in the first `lint` message; a nominal id
    // of 0 seeds the scenario RNG only until that real id is known, which is fine since
    // `random-oom` determinism is a per-run property, not cross-run.
    let base = ProcessAnalyzer::new(args.analyzer_program);
    let result = match args.test_scenario {
        Some(scenario) => {
            let scenario_analyzer =
                ScenarioAnalyzer::new(base, scenario, args.test_file, 0).with_oom_retries(args.oom_retries);
            driver::run(stream, scenario_analyzer).await
        }
        None => driver::run(stream, base).await,
    };

    if let Err(err) = result {
        error!(target: LOG_TARGET, %err, "worker driver failed");
        std::process::exit(1);
    }
}
