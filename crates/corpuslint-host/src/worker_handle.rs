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

//! Spawns a worker process and connects it to a freshly bound Unix socket, mirroring
//! `spawn_with_program_path`/`WorkerHandle` in the teacher's worker-interface reference file,
//! adapted from a socket-path-as-extra-CLI-arg handshake to the same shape plus a first `lint`
//! message instead of a separate handshake message.

#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corpuslint_common::batch::Batch;
use corpuslint_common::message::{send_message, IpcMessage};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tracing::warn;

use crate::LOG_TARGET;

#[derive(Debug, thiserror::Error)]
pub enum SpawnErr {
    #[error("cannot obtain a temporary socket path")]
    TmpPath,
    #[error("cannot bind the socket at {socket_path:?}: {err}")]
    Bind { socket_path: PathBuf, err: String },
    #[error("failed to spawn worker process at {program_path:?}: {err}")]
    ProcessSpawn { program_path: PathBuf, err: String },
    #[error("worker did not connect within {spawn_timeout:?}")]
    AcceptTimeout { spawn_timeout: Duration },
    #[error("failed to accept worker connection: {err}")]
    Accept { err: String },
    #[error("failed to send the initial lint message: {err}")]
    SendTask { err: String },
}

/// How long the scheduler waits for a just-spawned worker to connect before giving up on it.
pub const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A still-running (or just-exited) worker process plus the socket connected to it.
///
/// `exit` is boxed rather than a concrete `tokio::process::Child` so that the scheduler's
/// per-worker IO task (`scheduler::spawn_io_tasks`) doesn't need to know whether it's waiting on a
/// real OS process or a test double - see [`Spawner`].
pub struct WorkerHandle {
    pub worker_id: u64,
    pub stream: UnixStream,
    pub exit: Pin<Box<dyn Future<Output = std::io::Result<ExitInfo>> + Send>>,
}

/// Classification of how a worker process ended, independent of anything it managed to report
/// over the socket (spec §4.6's "process exit(code, signal)" event).
#[derive(Debug, Clone, Copy)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub was_signaled_kill: bool,
}

/// Spawns a worker for one `(worker_id, batch)` pair, set up once per run with whatever it needs
/// to invoke the real process (or, in tests, to drive an in-process fake). Boxed as a trait object
/// rather than generic over `RunParams` so `corpuslint-host`'s scheduler tests can substitute a
/// fake spawner without the production code depending on anything test-only.
pub type Spawner = Box<
    dyn Fn(u64, Batch) -> Pin<Box<dyn Future<Output = Result<WorkerHandle, SpawnErr>> + Send>> + Send + Sync,
>;

/// Builds a [`Spawner`] that spawns real `program_path` worker processes, closing over the
/// parameters that stay fixed for the lifetime of one run.
///
/// `oom_retry_budget`, when set, is shared across every worker this spawner spawns for the
/// lifetime of one run - not just one worker's process. This is what makes `oom-single`
/// recoverable: a worker that OOMs gets bisected and re-spawned as a brand-new OS process (§4.4),
/// which would otherwise re-read `TEST_OOM_RETRIES` from its own environment and get the full
/// budget back. Keeping the budget on the host instead means the second spawn of the same file
/// lineage sees it already spent.
pub fn process_spawner(
    program_path: PathBuf,
    config_path: String,
    test_scenario: Option<String>,
    test_file: Option<String>,
    worker_memory_limit_mb: Option<u64>,
    oom_retry_budget: Option<Arc<AtomicU32>>,
) -> Spawner {
    Box::new(move |worker_id, batch| {
        let program_path = program_path.clone();
        let config_path = config_path.clone();
        let test_scenario = test_scenario.clone();
        let test_file = test_file.clone();
        let oom_retry_budget = oom_retry_budget.clone();
        Box::pin(async move {
            spawn_worker(
                &program_path,
                worker_id,
                &batch,
                &config_path,
                test_scenario.as_deref(),
                test_file.as_deref(),
                worker_memory_limit_mb,
                oom_retry_budget.as_deref(),
            )
            .await
        })
    })
}

/// Binds a transient socket, spawns `program_path` with `--socket-path <path>` (plus any test
/// scenario flags), accepts its connection, and sends the batch as the worker's one `lint` task.
pub async fn spawn_worker(
    program_path: impl AsRef<Path>,
    worker_id: u64,
    batch: &Batch,
    config_path: &str,
    test_scenario: Option<&str>,
    test_file: Option<&str>,
    worker_memory_limit_mb: Option<u64>,
    oom_retry_budget: Option<&AtomicU32>,
) -> Result<WorkerHandle, SpawnErr> {
    let program_path = program_path.as_ref().to_path_buf();
    let (_socket_dir, socket_path) = transient_socket_path().await?;

    let listener = UnixListener::bind(&socket_path)
        .map_err(|err| SpawnErr::Bind { socket_path: socket_path.clone(), err: err.to_string() })?;

    let mut command = Command::new(&program_path);
    command.arg("--socket-path").arg(&socket_path);
    if let Some(scenario) = test_scenario {
        command.arg("--test").arg(scenario);
    }
    if let Some(file) = test_file {
        command.arg("--test-file").arg(file);
    }
    if let Some(budget) = oom_retry_budget {
        let targets_this_batch = test_file.is_some_and(|file| batch.files.iter().any(|f| f.contains(file)));
        if targets_this_batch {
            let retries = consume_oom_retry(budget);
            command.arg("--test-oom-retries").arg(retries.to_string());
        }
    }
    command.kill_on_drop(true);

    #[cfg(unix)]
    if let Some(limit_mb) = worker_memory_limit_mb {
        let bytes = limit_mb.saturating_mul(1024 * 1024);
        unsafe {
            command.pre_exec(move || {
                let rlim = libc::rlimit { rlim_cur: bytes, rlim_max: bytes };
                if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = command
        .spawn()
        .map_err(|err| SpawnErr::ProcessSpawn { program_path: program_path.clone(), err: err.to_string() })?;

    let accept = tokio::time::timeout(SPAWN_TIMEOUT, listener.accept());
    let stream = match accept.await {
        Ok(Ok((stream, _addr))) => stream,
        Ok(Err(err)) => {
            let _ = tokio::fs::remove_file(&socket_path).await;
            return Err(SpawnErr::Accept { err: err.to_string() });
        }
        Err(_) => {
            let _ = tokio::fs::remove_file(&socket_path).await;
            return Err(SpawnErr::AcceptTimeout { spawn_timeout: SPAWN_TIMEOUT });
        }
    };
    let _ = tokio::fs::remove_file(&socket_path).await;

    let exit = Box::pin(async move {
        let status = child.wait().await?;
        Ok(ExitInfo {
            code: status.code(),
            was_signaled_kill: status.signal() == Some(libc::SIGKILL),
        })
    });
    let mut handle = WorkerHandle { worker_id, stream, exit };

    let lint = IpcMessage::Lint {
        worker_id,
        config_path: config_path.to_string(),
        files: batch.files.clone(),
        target_path: None,
    };
    if let Err(err) = send_message(&mut handle.stream, &lint).await {
        warn!(target: LOG_TARGET, worker_id, %err, "failed to send lint task to worker");
        return Err(SpawnErr::SendTask { err: err.to_string() });
    }

    Ok(handle)
}

/// Atomically consumes one token from a shared `oom-single` retry budget, returning the retry
/// count to hand the freshly spawned worker via `--test-oom-retries`: `1` if a token was still
/// available (the worker should simulate one OOM kill, then pass through), `0` once the budget is
/// spent (the worker should pass through immediately instead of killing itself again).
fn consume_oom_retry(budget: &AtomicU32) -> u32 {
    let prev = budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1))).unwrap();
    if prev > 0 {
        1
    } else {
        0
    }
}

/// A temporary, unique directory holding exactly one not-yet-existing socket path, following the
/// same bind-then-best-effort-cleanup convention as `with_transient_socket_path` in
/// `worker_interface.rs`, but using `tempfile` for the uniqueness/cleanup guarantee rather than a
/// hand-rolled random suffix. The returned `TempDir` must outlive the bind+accept that uses the
/// path; the caller holds it until the socket file has already been unlinked.
async fn transient_socket_path() -> Result<(TempDir, PathBuf), SpawnErr> {
    let dir = tempfile::Builder::new()
        .prefix("corpuslint-host-")
        .tempdir()
        .map_err(|_| SpawnErr::TmpPath)?;
    let path = dir.path().join("worker.sock");
    Ok((dir, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transient_socket_path_yields_a_fresh_nonexistent_path() {
        let (_dir, path) = transient_socket_path().await.unwrap();
        assert!(!path.exists());
        assert!(path.to_string_lossy().ends_with("worker.sock"));
    }

    #[test]
    fn consume_oom_retry_spends_the_budget_once_then_passes_through() {
        // Models three successive spawns of the same bisected file lineage sharing one budget,
        // rather than each spawn getting its own fresh `TEST_OOM_RETRIES`.
        let budget = AtomicU32::new(1);
        assert_eq!(consume_oom_retry(&budget), 1);
        assert_eq!(consume_oom_retry(&budget), 0);
        assert_eq!(consume_oom_retry(&budget), 0);
    }

    #[test]
    fn consume_oom_retry_with_zero_budget_never_kills() {
        let budget = AtomicU32::new(0);
        assert_eq!(consume_oom_retry(&budget), 0);
    }
}
