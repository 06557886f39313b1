// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-oriented persistence for conversation history.
//!
//! Everything lives under `<projectDir>/.git/ai/`: one JSONL file per
//! session under `history/`, plus the `MODEL` and `PARAMETERS` metadata
//! files.  Writes are whole-file rewrites — the logs are small and the
//! format favors robustness over append speed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use bard_model::Message;

use crate::validate::{validate, ProtocolViolation};

#[derive(Debug, Error)]
pub enum HistoryError {
    /// The sequence handed to [`write_session`] violates the tool-call
    /// pairing rule.  Nothing is written.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A session recovered from disk.
#[derive(Debug, Clone)]
pub struct RestoredSession {
    pub messages: Vec<Message>,
    pub session_name: String,
}

fn ai_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".git").join("ai")
}

fn history_dir(project_dir: &Path) -> PathBuf {
    ai_dir(project_dir).join("history")
}

fn session_path(project_dir: &Path, session_name: &str) -> PathBuf {
    history_dir(project_dir).join(format!("{session_name}.jsonl"))
}

// ─── Session naming ───────────────────────────────────────────────────────────

static LAST_NAME: Mutex<Option<String>> = Mutex::new(None);

/// Generate a collision-resistant session name:
/// `<UTC instant>-<3 random [a-z0-9] chars>`, e.g.
/// `2026-08-01T14-03-22Z-9f1`.
///
/// Consecutive calls never return the same name, even within one second —
/// the suffix is regenerated until it differs from the previous result.
pub fn generate_session_name() -> String {
    let mut last = LAST_NAME.lock().unwrap();
    loop {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
        let uuid = Uuid::new_v4().simple().to_string();
        let name = format!("{stamp}-{}", &uuid[..3]);
        if last.as_deref() != Some(name.as_str()) {
            *last = Some(name.clone());
            return name;
        }
    }
}

// ─── Session logs ─────────────────────────────────────────────────────────────

/// Restore the most recent persisted session for a project.
///
/// Lists `*.jsonl` files in the history directory, sorts lexicographically
/// (session names order chronologically) and takes the last.  Malformed
/// lines are skipped with a warning, never fatal — a partially corrupted
/// log still yields the recoverable prefix of the conversation.
pub async fn read_last_session(project_dir: &Path) -> Option<RestoredSession> {
    let dir = history_dir(project_dir);
    let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
    let mut names: Vec<String> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stem) = file_name.strip_suffix(".jsonl") {
            names.push(stem.to_string());
        }
    }
    names.sort();
    let session_name = names.pop()?;

    let raw = tokio::fs::read_to_string(session_path(project_dir, &session_name))
        .await
        .ok()?;
    let mut messages = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(m) => messages.push(m),
            Err(e) => {
                warn!(session = %session_name, line = line_no + 1, error = %e,
                    "skipping malformed history line");
            }
        }
    }
    Some(RestoredSession { messages, session_name })
}

/// Persist a message log, one JSON record per line.
///
/// The validator runs first: a pairing violation aborts the write and
/// surfaces as an error, because it indicates a bug upstream rather than an
/// environmental failure.
pub async fn write_session(
    project_dir: &Path,
    session_name: &str,
    messages: &[Message],
) -> Result<(), HistoryError> {
    validate(messages)?;

    let dir = history_dir(project_dir);
    tokio::fs::create_dir_all(&dir).await?;

    let mut out = String::new();
    for m in messages {
        out.push_str(&serde_json::to_string(m).expect("messages serialize infallibly"));
        out.push('\n');
    }
    tokio::fs::write(session_path(project_dir, session_name), out).await?;
    Ok(())
}

// ─── Metadata files ───────────────────────────────────────────────────────────

/// Read the persisted `"<provider>/<model>"` selection, if any.
pub async fn read_model(project_dir: &Path) -> Option<String> {
    let raw = tokio::fs::read_to_string(ai_dir(project_dir).join("MODEL"))
        .await
        .ok()?;
    let line = raw.lines().next()?.trim();
    (!line.is_empty()).then(|| line.to_string())
}

pub async fn write_model(project_dir: &Path, provider_model: &str) -> Result<(), HistoryError> {
    let dir = ai_dir(project_dir);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join("MODEL"), format!("{provider_model}\n")).await?;
    Ok(())
}

/// Read `KEY=VALUE` parameters.  `#` introduces comments, blank lines are
/// ignored, whitespace is trimmed around both sides of `=`.
pub async fn read_parameters(project_dir: &Path) -> BTreeMap<String, String> {
    let raw = match tokio::fs::read_to_string(ai_dir(project_dir).join("PARAMETERS")).await {
        Ok(r) => r,
        Err(_) => return BTreeMap::new(),
    };
    let mut params = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            params.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    params
}

pub async fn write_parameters(
    project_dir: &Path,
    params: &BTreeMap<String, String>,
) -> Result<(), HistoryError> {
    let dir = ai_dir(project_dir);
    tokio::fs::create_dir_all(&dir).await?;
    let mut out = String::new();
    for (key, value) in params {
        out.push_str(&format!("{key}={value}\n"));
    }
    tokio::fs::write(dir.join("PARAMETERS"), out).await?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
