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

//! Orchestrator entry point: parses CLI flags, discovers the corpus, spawns the scheduler against
//! real worker processes, and prints/persists the final report.

use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use corpuslint_host::config::Config;
use corpuslint_host::worker_handle::process_spawner;
use corpuslint_host::{aggregator, discovery, legacy_config, scheduler};
use corpuslint_host::scheduler::RunParams;
use tracing::error;

/// The analyzer config file name resolved relative to `--target` (spec §6: "the analyzer config
/// is resolved relative to this path").
const ANALYZER_CONFIG_FILENAME: &str = "corpuslint.config.json";

#[derive(Parser)]
#[command(name = "corpuslint", about = "Memory-aware batch scheduler for an external linter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Root directory to analyze; the analyzer config is resolved relative to this path.
    /// Required unless the `convert-config` subcommand is given.
    #[arg(long)]
    target: Option<PathBuf>,

    /// File-selection pattern relative to `--target`.
    #[arg(long, default_value = "src/**/*.ts")]
    glob: String,

    /// Failure-injection mode.
    #[arg(long, default_value = "none", env = "TEST_SCENARIO")]
    test: String,

    /// Substring match selecting which files trigger the test scenario.
    #[arg(long, env = "TEST_TARGET_FILE")]
    test_file: Option<String>,

    /// How many times `oom-single` (or `all`) kills a targeted worker before letting it run for
    /// real. Shared across every respawn of a bisected lineage, not re-read per process.
    #[arg(long, default_value_t = corpuslint_worker::analyzer::DEFAULT_TEST_OOM_RETRIES, env = "TEST_OOM_RETRIES")]
    test_oom_retries: u32,

    #[arg(long, default_value_t = Config::DEFAULT_MAX_WORKERS)]
    max_workers: usize,

    #[arg(long, default_value_t = Config::DEFAULT_CONTAINER_LIMIT_MB)]
    container_limit_mb: u64,

    #[arg(long, default_value_t = Config::DEFAULT_MEM_THRESHOLD_PERCENT)]
    mem_threshold_percent: u8,

    #[arg(long, default_value_t = Config::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    #[arg(long, default_value_t = corpuslint_common::batch::DEFAULT_INITIAL_DIVISOR)]
    divisor: usize,

    #[arg(long, default_value = Config::DEFAULT_OUTPUT_DIR)]
    output_dir: String,

    /// Path to the `lint` analyzer binary the workers shell out to.
    #[arg(long, default_value = "corpuslint-worker", env = "CORPUSLINT_WORKER_PROGRAM")]
    worker_program: PathBuf,

    /// Linux-only `RLIMIT_AS` applied to each spawned worker, in megabytes.
    #[arg(long, env = "CORPUSLINT_WORKER_MEMORY_LIMIT_MB")]
    worker_memory_limit_mb: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Converts a legacy analyzer config to the modern shape and exits.
    ConvertConfig { legacy_path: PathBuf, output_path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Some(Command::ConvertConfig { legacy_path, output_path }) = cli.command {
        return run_convert_config(&legacy_path, &output_path);
    }

    let Some(target) = cli.target.clone() else {
        bail!("--target is required");
    };
    if !target.is_dir() {
        bail!("--target {:?} is not a directory", target);
    }

    let analyzer_config_path = target.join(ANALYZER_CONFIG_FILENAME);
    if !analyzer_config_path.is_file() {
        bail!(
            "missing analyzer config at {:?} (run `corpuslint convert-config` first if migrating from a legacy config)",
            analyzer_config_path
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;
    runtime.block_on(run(cli, target, analyzer_config_path))
}

fn run_convert_config(legacy_path: &std::path::Path, output_path: &std::path::Path) -> anyhow::Result<()> {
    let legacy_text = std::fs::read_to_string(legacy_path)
        .with_context(|| format!("failed to read legacy config at {legacy_path:?}"))?;
    let modern_text = legacy_config::convert_legacy_config(&legacy_text)
        .with_context(|| format!("failed to convert legacy config at {legacy_path:?}"))?;
    std::fs::write(output_path, modern_text)
        .with_context(|| format!("failed to write converted config to {output_path:?}"))?;
    println!("wrote converted config to {}", output_path.display());
    Ok(())
}

async fn run(cli: Cli, target: PathBuf, analyzer_config_path: PathBuf) -> anyhow::Result<()> {
    let files = discovery::discover_files(&target, &cli.glob)
        .with_context(|| format!("failed to discover files under {target:?} matching {:?}", cli.glob))?;

    let cfg = Config {
        max_workers: cli.max_workers,
        container_limit_mb: cli.container_limit_mb,
        mem_threshold_percent: cli.mem_threshold_percent,
        max_retries: cli.max_retries,
        initial_divisor: cli.divisor,
        output_dir: cli.output_dir.clone(),
        worker_memory_limit_mb: cli.worker_memory_limit_mb,
    };

    let test_scenario = if cli.test == "none" { None } else { Some(cli.test.clone()) };
    // Only `oom-single` and `all` ever call `maybe_oom_single`; other scenarios don't need a
    // shared budget, so skip building one for them.
    let oom_retry_budget = match test_scenario.as_deref() {
        Some("oom-single") | Some("all") => Some(Arc::new(AtomicU32::new(cli.test_oom_retries))),
        _ => None,
    };
    let spawn = process_spawner(
        cli.worker_program,
        analyzer_config_path.to_string_lossy().into_owned(),
        test_scenario,
        cli.test_file,
        cfg.worker_memory_limit_mb,
        oom_retry_budget,
    );

    let outcome = scheduler::run(RunParams { cfg: &cfg, files: &files, spawn }).await;

    let summary = aggregator::finalize(outcome, std::path::Path::new(&cfg.output_dir)).map_err(|err| {
        error!(target: corpuslint_host::LOG_TARGET, %err, "failed to persist the run summary");
        err
    })?;

    std::process::exit(aggregator::exit_code(&summary));
}
