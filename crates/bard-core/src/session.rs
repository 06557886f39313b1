// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use bard_model::Message;
use bard_tools::ToolRegistry;

use crate::aggregate::StreamingSnapshot;

pub type ProjectId = String;

pub const DEFAULT_MAX_STEPS: u32 = 50;

/// Mutable per-session state, guarded by the handle's lock.
#[derive(Debug)]
pub struct SessionState {
    pub messages: Vec<Message>,
    pub session_name: String,
    /// In-progress assistant draft; present only while a generation streams.
    pub streaming: Option<StreamingSnapshot>,
    pub last_activity: DateTime<Utc>,
    /// Running monetary cost in USD.
    pub total_cost: Decimal,
    pub last_input_tokens: u32,
    /// Greatest user-message index, captured when a generation starts.
    pub last_user_message_index: Option<usize>,
    /// Sticky: set on an upstream image refusal; image parts are stripped
    /// from every subsequent request while the saved log keeps them.
    pub images_not_supported: bool,
}

/// Shared handle to one project's session.
///
/// The latches are atomics so other tasks can short-circuit (single-flight)
/// or observe progress without taking the state lock.  Tool wiring sits
/// behind its own lock because `load_session` rebinds it in place on a live
/// session — the change takes effect at the next loop iteration.
pub struct SessionHandle {
    project_id: ProjectId,
    state: Mutex<SessionState>,
    tools: StdMutex<Arc<ToolRegistry>>,
    max_steps: AtomicU32,
    pub(crate) is_loading: AtomicBool,
    pub(crate) is_compressing: AtomicBool,
    pub(crate) cancel: StdMutex<Option<CancellationToken>>,
}

impl SessionHandle {
    pub(crate) fn new(
        project_id: impl Into<ProjectId>,
        messages: Vec<Message>,
        session_name: String,
        tools: Arc<ToolRegistry>,
        max_steps: Option<u32>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(SessionState {
                messages,
                session_name,
                streaming: None,
                last_activity: Utc::now(),
                total_cost: Decimal::ZERO,
                last_input_tokens: 0,
                last_user_message_index: None,
                images_not_supported: false,
            }),
            tools: StdMutex::new(tools),
            max_steps: AtomicU32::new(max_steps.unwrap_or(DEFAULT_MAX_STEPS)),
            is_loading: AtomicBool::new(false),
            is_compressing: AtomicBool::new(false),
            cancel: StdMutex::new(None),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading.load(Ordering::SeqCst)
    }

    pub fn is_compressing(&self) -> bool {
        self.is_compressing.load(Ordering::SeqCst)
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps.load(Ordering::SeqCst)
    }

    pub fn tools(&self) -> Arc<ToolRegistry> {
        self.tools.lock().unwrap().clone()
    }

    pub(crate) fn rebind(&self, tools: Arc<ToolRegistry>, max_steps: Option<u32>) {
        *self.tools.lock().unwrap() = tools;
        self.max_steps
            .store(max_steps.unwrap_or(DEFAULT_MAX_STEPS), Ordering::SeqCst);
    }

    pub(crate) async fn state(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    // ── Snapshot accessors for observers and tests ────────────────────────────

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn session_name(&self) -> String {
        self.state.lock().await.session_name.clone()
    }

    pub async fn streaming(&self) -> Option<StreamingSnapshot> {
        self.state.lock().await.streaming.clone()
    }

    pub async fn total_cost(&self) -> Decimal {
        self.state.lock().await.total_cost
    }

    pub async fn last_input_tokens(&self) -> u32 {
        self.state.lock().await.last_input_tokens
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        SessionHandle::new(
            "proj",
            vec![],
            "2026-01-01T00-00-00Z-abc".into(),
            Arc::new(ToolRegistry::new()),
            None,
        )
    }

    #[test]
    fn new_session_defaults() {
        let h = handle();
        assert_eq!(h.project_id(), "proj");
        assert!(!h.is_loading());
        assert!(!h.is_compressing());
        assert_eq!(h.max_steps(), DEFAULT_MAX_STEPS);
    }

    #[tokio::test]
    async fn new_session_starts_with_zero_accounting() {
        let h = handle();
        assert_eq!(h.total_cost().await, Decimal::ZERO);
        assert_eq!(h.last_input_tokens().await, 0);
        assert!(h.streaming().await.is_none());
        assert!(h.messages().await.is_empty());
    }

    #[test]
    fn rebind_replaces_tools_and_max_steps() {
        let h = handle();
        let mut reg = ToolRegistry::new();
        struct Noop;
        #[async_trait::async_trait]
        impl bard_tools::Tool for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            fn description(&self) -> &str {
                "does nothing"
            }
            async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<String> {
                Ok(String::new())
            }
        }
        reg.register(Noop);
        h.rebind(Arc::new(reg), Some(7));
        assert_eq!(h.max_steps(), 7);
        assert_eq!(h.tools().names(), vec!["noop"]);
    }
}
