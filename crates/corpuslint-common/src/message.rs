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

//! The four IPC message kinds and the length-delimited JSON framing they travel over.
//!
//! Framing is lifted from the `framed_send`/`framed_recv` pair used to talk to PVF workers in the
//! teacher's worker-interface code, with two adaptations: the payload is JSON rather than a SCALE
//! encoding, and the length prefix is a fixed 4-byte little-endian `u32` rather than a
//! platform-width `usize`, since host and worker here always round-trip through the same framing
//! function but should not silently disagree if ever built for different pointer widths.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One opaque analyzer diagnostic. The core only ever reads `error_count`/`warning_count`; every
/// other field the analyzer emits is preserved verbatim in `extra` for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub file: String,
    pub error_count: u32,
    pub warning_count: u32,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// The classification of a worker failure, shared between the wire protocol (`error.error_type`)
/// and the host's failure classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Oom,
    ParseError,
    RuleCrash,
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Oom => "oom",
            FailureKind::ParseError => "parse_error",
            FailureKind::RuleCrash => "rule_crash",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The four message kinds, tagged on the wire by `"kind"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpcMessage {
    /// master -> worker: assign a batch.
    Lint {
        worker_id: u64,
        config_path: String,
        files: Vec<String>,
        #[serde(default)]
        target_path: Option<String>,
    },
    /// worker -> master: the batch succeeded.
    Result {
        worker_id: u64,
        results: Vec<DiagnosticRecord>,
        peak_rss: u64,
        duration_ms: u64,
    },
    /// worker -> master: the batch failed in a way the worker itself could observe.
    Error {
        worker_id: u64,
        error_type: FailureKind,
        message: String,
        #[serde(default)]
        file: Option<String>,
    },
    /// worker -> master: a periodic memory sample, high-frequency and not rate-limited.
    Memory {
        worker_id: u64,
        rss: u64,
        heap_used: u64,
        timestamp: i64,
    },
}

/// The codec's outcome for a single inbound frame: either a recognized message, or a deliberate
/// `Unknown` classification for a discriminator the codec does not recognize (spec §4.2 requires
/// this to be swallowed into a classification rather than propagated as a hard error).
#[derive(Debug)]
pub enum Classification {
    Message(IpcMessage),
    Unknown { raw: String },
}

/// Writes `payload` prefixed by its length as a little-endian `u32`.
pub async fn framed_send(w: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "ipc payload exceeds u32::MAX bytes")
    })?;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await
}

/// Reads one length-prefixed frame, returning the raw bytes without attempting to decode them.
pub async fn framed_recv_raw(r: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Serializes `msg` to JSON and writes it as one frame.
pub async fn send_message(w: &mut (impl AsyncWrite + Unpin), msg: &IpcMessage) -> std::io::Result<()> {
    let payload = serde_json::to_vec(msg)?;
    framed_send(w, &payload).await
}

/// Reads one frame and classifies it: a known `kind` decodes to [`Classification::Message`]; an
/// unrecognized `kind` (or any other shape mismatch) decodes to [`Classification::Unknown`]
/// carrying the raw text for logging, per spec §4.2.
pub async fn recv_classified(r: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Classification> {
    let raw = framed_recv_raw(r).await?;
    let text = String::from_utf8_lossy(&raw).into_owned();
    match serde_json::from_slice::<IpcMessage>(&raw) {
        Ok(msg) => Ok(Classification::Message(msg)),
        Err(_) => Ok(Classification::Unknown { raw: text }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_lint_message() {
        let mut buf = Vec::new();
        let msg = IpcMessage::Lint {
            worker_id: 1,
            config_path: "/cfg.json".into(),
            files: vec!["/a.ts".into()],
            target_path: None,
        };
        send_message(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match recv_classified(&mut cursor).await.unwrap() {
            Classification::Message(IpcMessage::Lint { worker_id, files, .. }) => {
                assert_eq!(worker_id, 1);
                assert_eq!(files, vec!["/a.ts".to_string()]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_discriminator_classifies_as_unknown_not_an_error() {
        let mut buf = Vec::new();
        let payload = br#"{"kind":"teleport","worker_id":1}"#;
        framed_send(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match recv_classified(&mut cursor).await.unwrap() {
            Classification::Unknown { raw } => assert!(raw.contains("teleport")),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_message_preserves_opaque_extra_fields() {
        let mut buf = Vec::new();
        let payload = br#"{
            "kind":"result","worker_id":2,"peak_rss":100,"duration_ms":50,
            "results":[{"file":"/a.ts","error_count":1,"warning_count":2,"rule_id":"no-unused-vars"}]
        }"#;
        framed_send(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match recv_classified(&mut cursor).await.unwrap() {
            Classification::Message(IpcMessage::Result { results, .. }) => {
                assert_eq!(results[0].error_count, 1);
                assert_eq!(results[0].extra["rule_id"], "no-unused-vars");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn failure_kind_display_matches_wire_discriminator() {
        assert_eq!(FailureKind::ParseError.to_string(), "parse_error");
        assert_eq!(FailureKind::Oom.to_string(), "oom");
    }
}
