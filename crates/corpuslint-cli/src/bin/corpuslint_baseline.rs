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

//! Single-process baseline runner (supplemented, SPEC_FULL.md §2B): drives the same `Analyzer`
//! the scheduler uses, serially and without batching, admission control, or OOM recovery. Exists
//! purely as a comparison point for the batch scheduler's overhead and behavior.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use corpuslint_host::{discovery, persist};
use corpuslint_worker::analyzer::{Analyzer, ProcessAnalyzer};
use tracing::info;

#[derive(Parser)]
#[command(name = "corpuslint-baseline", about = "Runs the analyzer once, serially, over the whole corpus")]
struct Cli {
    #[arg(long)]
    target: PathBuf,

    #[arg(long, default_value = "src/**/*.ts")]
    glob: String,

    #[arg(long, default_value = "corpuslint.config.json")]
    config: PathBuf,

    #[arg(long, default_value = "corpuslint-worker", env = "CORPUSLINT_WORKER_PROGRAM")]
    worker_program: String,

    #[arg(long, default_value = "./lint-results")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = if cli.config.is_absolute() { cli.config.clone() } else { cli.target.join(&cli.config) };
    if !config_path.is_file() {
        anyhow::bail!("missing analyzer config at {config_path:?}");
    }

    let files = discovery::discover_files(&cli.target, &cli.glob)
        .with_context(|| format!("failed to discover files under {:?}", cli.target))?;
    info!(target: corpuslint_host::LOG_TARGET, count = files.len(), "baseline run starting");

    let analyzer = ProcessAnalyzer::new(cli.worker_program);
    let results = analyzer.run(&config_path, &files).await.context("baseline analyzer run failed")?;

    persist::ensure_output_dir(&cli.output_dir).context("failed to create output directory")?;
    persist::write_worker_results(&cli.output_dir, 0, &results).context("failed to persist baseline results")?;

    // A single `ProcessAnalyzer::run` call either reports on every file or fails outright (see
    // the `?` above) - there is no per-file recovery to tally here, unlike the scheduler's summary.
    println!("corpuslint-baseline: {} files processed", results.len());
    Ok(())
}
