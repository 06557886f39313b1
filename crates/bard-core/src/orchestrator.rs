// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use bard_history::{generate_session_name, read_last_session, HistoryError};
use bard_model::{
    has_image_parts, parse_provider_model, strip_image_parts, CompletionRequest, Message,
    ModelCatalog, ProviderFactory, Usage, UserContent,
};
use bard_tools::{ToolCall, ToolRegistry};

use crate::{
    aggregate::{StreamingDraft, StreamingSnapshot},
    compress::run_compression,
    cost::usage_cost,
    events::{ObserverBus, SessionEvent},
    prompts::SystemPromptBuilder,
    session::{ProjectId, SessionHandle},
};

/// The assistant emitted a tool call without a function name.
///
/// A diagnostic tool message has already been committed so the persisted
/// log stays well-formed; this error carries what a UI needs to show a
/// tailored banner and offer a retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model {provider_model} emitted tool call {tool_call_id} without a function name")]
pub struct MalformedToolCall {
    pub tool_call_id: String,
    pub provider_model: String,
}

type ProjectDirFn = dyn Fn(&str) -> PathBuf + Send + Sync;

/// Owns every session and drives the generation loop.
///
/// All collaborators are constructor-injected: the provider factory, the
/// pricing catalog, the system-prompt builder and the project-directory
/// resolver.  No component holds a back-reference to another.
pub struct SessionOrchestrator {
    sessions: StdMutex<HashMap<ProjectId, Arc<SessionHandle>>>,
    providers: Arc<dyn ProviderFactory>,
    catalog: ModelCatalog,
    prompt_builder: Arc<dyn SystemPromptBuilder>,
    project_dir: Box<ProjectDirFn>,
    bus: ObserverBus,
}

impl SessionOrchestrator {
    pub fn new(
        providers: Arc<dyn ProviderFactory>,
        catalog: ModelCatalog,
        prompt_builder: Arc<dyn SystemPromptBuilder>,
        project_dir: impl Fn(&str) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            providers,
            catalog,
            prompt_builder,
            project_dir: Box::new(project_dir),
            bus: ObserverBus::new(),
        }
    }

    /// Subscribe to the observer bus.  Events arrive in program order; a
    /// receiver that falls behind misses events instead of blocking the loop.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Load or create the session for a project.
    ///
    /// An existing session gets its tool wiring and step cap rebound in
    /// place (message state preserved) — a mid-generation rebind takes
    /// effect at the next loop iteration.  Otherwise the most recent
    /// persisted log is restored, or a fresh session is created.
    pub async fn load_session(
        &self,
        project_id: &str,
        tools: Arc<ToolRegistry>,
        max_steps: Option<u32>,
    ) -> Arc<SessionHandle> {
        if let Some(handle) = self.get_session(project_id) {
            handle.rebind(tools, max_steps);
            return handle;
        }

        let dir = (self.project_dir)(project_id);
        let (messages, session_name) = match read_last_session(&dir).await {
            Some(restored) => (restored.messages, restored.session_name),
            None => (Vec::new(), generate_session_name()),
        };
        let handle = Arc::new(SessionHandle::new(
            project_id,
            messages,
            session_name,
            tools,
            max_steps,
        ));

        let (handle, created) = {
            let mut map = self.sessions.lock().unwrap();
            match map.get(project_id) {
                // Another caller created the session while we were restoring.
                Some(existing) => (existing.clone(), false),
                None => {
                    map.insert(project_id.to_string(), handle.clone());
                    (handle, true)
                }
            }
        };
        if created {
            self.bus
                .emit(SessionEvent::SessionCreated { project_id: project_id.to_string() });
        }
        handle
    }

    pub fn get_session(&self, project_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().get(project_id).cloned()
    }

    pub fn get_all_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Cancel any in-flight generation and drop the session.
    pub async fn delete_session(&self, project_id: &str) {
        let removed = self.sessions.lock().unwrap().remove(project_id);
        if let Some(handle) = removed {
            self.halt(&handle).await;
            self.bus
                .emit(SessionEvent::SessionDeleted { project_id: project_id.to_string() });
        }
    }

    /// Keep configuration, reset everything else under a fresh session name.
    pub async fn start_new_session(&self, project_id: &str) {
        let Some(handle) = self.get_session(project_id) else {
            return;
        };
        self.halt(&handle).await;
        {
            let mut state = handle.state().await;
            state.messages.clear();
            state.streaming = None;
            state.total_cost = Decimal::ZERO;
            state.last_input_tokens = 0;
            state.last_user_message_index = None;
            state.session_name = generate_session_name();
            state.last_activity = Utc::now();
        }
        self.bus.emit(SessionEvent::CostUpdated {
            project_id: project_id.to_string(),
            total_cost: Decimal::ZERO,
        });
        self.bus.emit(SessionEvent::ContextUsageUpdated {
            project_id: project_id.to_string(),
            input_tokens: 0,
        });
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Append a message, persist the log and notify observers.
    pub async fn add_message(&self, project_id: &str, message: Message) -> anyhow::Result<()> {
        let handle = self
            .get_session(project_id)
            .with_context(|| format!("no session loaded for project {project_id:?}"))?;
        self.commit_message(&handle, message).await
    }

    async fn commit_message(
        &self,
        handle: &Arc<SessionHandle>,
        message: Message,
    ) -> anyhow::Result<()> {
        let (messages, session_name) = {
            let mut state = handle.state().await;
            state.messages.push(message.clone());
            state.last_activity = Utc::now();
            (state.messages.clone(), state.session_name.clone())
        };
        self.persist(handle.project_id(), &session_name, &messages).await?;
        self.bus.emit(SessionEvent::MessageAdded {
            project_id: handle.project_id().to_string(),
            message,
        });
        Ok(())
    }

    /// Persist a session log.  I/O failures are best-effort (logged and
    /// swallowed); a validation failure indicates a bug in our own state
    /// construction and is returned.
    async fn persist(
        &self,
        project_id: &str,
        session_name: &str,
        messages: &[Message],
    ) -> anyhow::Result<()> {
        let dir = (self.project_dir)(project_id);
        match bard_history::write_session(&dir, session_name, messages).await {
            Ok(()) => Ok(()),
            Err(HistoryError::Protocol(violation)) => Err(violation.into()),
            Err(HistoryError::Io(e)) => {
                warn!(project = %project_id, session = %session_name, error = %e,
                    "failed to persist session history");
                Ok(())
            }
        }
    }

    // ── Generation ────────────────────────────────────────────────────────────

    /// Append a user message and start generating.  No-op while loading.
    pub async fn send_message(
        &self,
        project_id: &str,
        content: impl Into<UserContent>,
        provider_model: &str,
    ) -> anyhow::Result<()> {
        let handle = self
            .get_session(project_id)
            .with_context(|| format!("no session loaded for project {project_id:?}"))?;
        if handle.is_loading() {
            return Ok(());
        }
        self.commit_message(&handle, Message::user(content.into())).await?;
        self.start_generation(project_id, provider_model).await
    }

    /// Drive the bounded completion/tool loop until a stop condition.
    ///
    /// Single-flight per project: a call while a generation is in flight is
    /// a no-op.  Cancellation is swallowed; provider failures and
    /// [`MalformedToolCall`] are re-raised to the caller after terminal
    /// cleanup, and are never recorded as messages.
    pub async fn start_generation(
        &self,
        project_id: &str,
        provider_model: &str,
    ) -> anyhow::Result<()> {
        let handle = self
            .get_session(project_id)
            .with_context(|| format!("no session loaded for project {project_id:?}"))?;
        if handle.is_loading.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        {
            let mut state = handle.state().await;
            if state.messages.is_empty() {
                handle.is_loading.store(false, Ordering::SeqCst);
                anyhow::bail!("cannot generate on an empty conversation");
            }
            state.last_user_message_index = state.messages.iter().rposition(Message::is_user);
        }
        *handle.cancel.lock().unwrap() = Some(cancel.clone());
        self.bus.emit(SessionEvent::LoadingChanged {
            project_id: project_id.to_string(),
            is_loading: true,
        });

        let result = self.generation_loop(&handle, provider_model, &cancel).await;

        // Terminal cleanup — runs on success, failure and cancellation alike.
        handle.state().await.streaming = None;
        *handle.cancel.lock().unwrap() = None;
        if handle.is_loading.swap(false, Ordering::SeqCst) {
            self.bus.emit(SessionEvent::LoadingChanged {
                project_id: project_id.to_string(),
                is_loading: false,
            });
        }

        result
    }

    /// Cancel the in-flight generation, if any.  Safe to call repeatedly.
    pub async fn stop_generation(&self, project_id: &str) {
        if let Some(handle) = self.get_session(project_id) {
            self.halt(&handle).await;
        }
    }

    async fn halt(&self, handle: &Arc<SessionHandle>) {
        if let Some(token) = handle.cancel.lock().unwrap().take() {
            token.cancel();
        }
        let was_loading = handle.is_loading.swap(false, Ordering::SeqCst);
        handle.state().await.streaming = None;
        if was_loading {
            self.bus.emit(SessionEvent::LoadingChanged {
                project_id: handle.project_id().to_string(),
                is_loading: false,
            });
        }
    }

    async fn generation_loop(
        &self,
        handle: &Arc<SessionHandle>,
        provider_model: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let (provider, model) = parse_provider_model(provider_model)?;
        let client = self.providers.client(&provider)?;
        let project_id = handle.project_id().to_string();
        let project_dir = (self.project_dir)(&project_id);

        let mut step_count: u32 = 0;
        let mut is_first_response = true;

        while step_count < handle.max_steps() && handle.is_loading() {
            step_count += 1;

            let (mut outgoing, images_unsupported) = {
                let mut state = handle.state().await;
                state.streaming = Some(StreamingSnapshot::default());
                (state.messages.clone(), state.images_not_supported)
            };
            let system = self.prompt_builder.build(&project_dir);
            if !system.is_empty() {
                outgoing.insert(0, Message::system(system));
            }
            if images_unsupported {
                outgoing = strip_image_parts(outgoing);
            }
            let request_has_images = has_image_parts(&outgoing);

            let tools = handle.tools();
            let req = CompletionRequest {
                model: model.clone(),
                messages: outgoing,
                tools: tools.schemas(),
                temperature: None,
            };

            let mut stream = match client.open_stream(req).await {
                Ok(s) => s,
                Err(e) => {
                    self.note_image_refusal(handle, request_has_images, &e).await;
                    return Err(e.context("model completion failed"));
                }
            };

            let mut draft = StreamingDraft::default();
            let mut cancelled = false;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    next = stream.next() => next,
                };
                if !handle.is_loading() {
                    cancelled = true;
                    break;
                }
                let chunk = match next {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        self.note_image_refusal(handle, request_has_images, &e).await;
                        return Err(e.context("model stream failed"));
                    }
                };
                if draft.apply(&chunk) {
                    let snapshot = draft.snapshot();
                    handle.state().await.streaming = Some(snapshot.clone());
                    self.bus.emit(SessionEvent::StreamingUpdate {
                        project_id: project_id.clone(),
                        snapshot,
                    });
                }
            }
            if cancelled {
                return Ok(());
            }

            let finished = draft.finish();
            for id in finished.malformed_ids() {
                warn!(project = %project_id, tool_call_id = %id,
                    "model emitted a tool call without a function name");
            }

            let assistant = finished.to_message();
            let tool_calls = assistant.tool_calls().map(<[_]>::to_vec).unwrap_or_default();
            self.commit_message(handle, assistant).await?;

            if let Some(usage) = &finished.usage {
                self.apply_usage(handle, usage, &provider, &model).await;
            }

            // Compression trigger: once per generation, on the first response
            // that requested tools, when there is history before the last
            // user message and no compression is already running.
            if is_first_response && !tool_calls.is_empty() {
                let (split, snapshot) = {
                    let state = handle.state().await;
                    (state.last_user_message_index, state.messages.clone())
                };
                if let Some(split) = split.filter(|&i| i != 0) {
                    if !handle.is_compressing.swap(true, Ordering::SeqCst) {
                        tokio::spawn(run_compression(
                            handle.clone(),
                            client.clone(),
                            model.clone(),
                            project_dir.clone(),
                            snapshot,
                            split,
                        ));
                    }
                }
            }
            is_first_response = false;

            for tc in &tool_calls {
                if tc.is_malformed() {
                    let diagnostic = format!(
                        "Tool call {} from model {} is missing a function name and was not executed",
                        tc.id, provider_model
                    );
                    self.commit_message(handle, Message::tool_result(&tc.id, diagnostic))
                        .await?;
                    return Err(MalformedToolCall {
                        tool_call_id: tc.id.clone(),
                        provider_model: provider_model.to_string(),
                    }
                    .into());
                }
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                };
                let body = tools.dispatch(&call).await;
                self.commit_message(handle, Message::tool_result(&tc.id, body)).await?;
            }

            if finished.finish_reason.as_deref() == Some("stop") {
                break;
            }
        }

        Ok(())
    }

    async fn apply_usage(
        &self,
        handle: &Arc<SessionHandle>,
        usage: &Usage,
        provider: &str,
        model: &str,
    ) {
        let total = {
            let mut state = handle.state().await;
            state.total_cost += usage_cost(usage, provider, model, &self.catalog);
            state.last_input_tokens = usage.prompt_tokens;
            state.total_cost
        };
        self.bus.emit(SessionEvent::CostUpdated {
            project_id: handle.project_id().to_string(),
            total_cost: total,
        });
        self.bus.emit(SessionEvent::ContextUsageUpdated {
            project_id: handle.project_id().to_string(),
            input_tokens: usage.prompt_tokens,
        });
    }

    /// Mark the session image-incapable when a provider error reads like an
    /// image refusal.  Subsequent requests strip image parts; the saved log
    /// keeps the original content.
    async fn note_image_refusal(
        &self,
        handle: &Arc<SessionHandle>,
        request_has_images: bool,
        err: &anyhow::Error,
    ) {
        if request_has_images && error_rejects_images(err) {
            warn!(project = %handle.project_id(),
                "provider refused image input; stripping images from future requests");
            handle.state().await.images_not_supported = true;
        }
    }
}

/// Return `true` when a provider error reads like an image-capability
/// refusal rather than a transport failure.
///
/// Providers phrase the refusal differently ("image input not supported",
/// "invalid content type: image_url", "model does not support vision"), so
/// the check looks for an image/vision mention next to a refusal word.  A
/// false negative only means the error surfaces unchanged.
fn error_rejects_images(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}").to_lowercase();
    if !msg.contains("image") && !msg.contains("vision") {
        return false;
    }
    ["not support", "unsupported", "invalid", "unable", "cannot"]
        .iter()
        .any(|needle| msg.contains(needle))
}
