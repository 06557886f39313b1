// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared implementation for OpenAI-compatible chat completion APIs.
//!
//! Every HTTP provider in the registry speaks the same `/chat/completions`
//! SSE streaming wire format; this module provides a single client that each
//! provider configures with its own URL, auth style and headers.
//!
//! # Auth styles
//! - `Bearer` — `Authorization: Bearer <key>` (most providers)
//! - `VendorHeader` — key in a provider-named header (Anthropic `x-api-key`)
//! - `Nip98` — `Authorization` carries a pre-signed Nostr NIP-98 token
//! - `None` — no authentication (local servers)

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::{ChatProvider, ChunkStream, ProviderFactory},
    registry::{get_provider, known_provider_ids, AuthStyle, ProviderMeta},
    CompletionRequest, ContentPart, Message, StreamChunk, ToolCallDelta, Usage, UserContent,
};

/// OpenAI-compatible chat completion client.
pub struct OpenAICompatClient {
    provider_id: &'static str,
    /// Full chat completions URL.
    chat_url: String,
    /// Pre-resolved API key or NIP-98 token (may be `None` for local servers).
    api_key: Option<String>,
    auth: AuthStyle,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl OpenAICompatClient {
    /// Construct a client from registry metadata.
    ///
    /// `base_url` overrides the registry default when set; `api_key` is the
    /// pre-resolved credential (key or signed token, depending on auth style).
    pub fn from_meta(
        meta: &'static ProviderMeta,
        base_url: Option<&str>,
        api_key: Option<String>,
    ) -> Self {
        let base = base_url.unwrap_or(meta.base_url).trim_end_matches('/');
        Self {
            provider_id: meta.id,
            chat_url: format!("{base}/chat/completions"),
            api_key,
            auth: meta.auth,
            extra_headers: meta
                .extra_headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": build_wire_messages(&req.messages),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters.clone()
                                .unwrap_or_else(|| json!({ "type": "object" })),
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    fn apply_auth(&self, mut req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        req = match self.auth {
            AuthStyle::Bearer => {
                let key = self
                    .api_key
                    .as_deref()
                    .with_context(|| format!("no API key configured for {}", self.provider_id))?;
                req.bearer_auth(key)
            }
            AuthStyle::VendorHeader(header) => {
                let key = self
                    .api_key
                    .as_deref()
                    .with_context(|| format!("no API key configured for {}", self.provider_id))?;
                req.header(header, key)
            }
            AuthStyle::Nip98 => {
                let token = self.api_key.as_deref().with_context(|| {
                    format!("no NIP-98 token supplied for {}", self.provider_id)
                })?;
                req.header("Authorization", format!("Nostr {token}"))
            }
            AuthStyle::None => req,
        };
        for (name, val) in &self.extra_headers {
            req = req.header(name.as_str(), val.as_str());
        }
        Ok(req)
    }
}

#[async_trait]
impl ChatProvider for OpenAICompatClient {
    fn provider_id(&self) -> &str {
        self.provider_id
    }

    async fn open_stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let body = self.build_body(&req, true);
        debug!(
            provider = %self.provider_id,
            model = %req.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending streaming completion request"
        );

        let http_req = self.apply_auth(self.client.post(&self.chat_url).json(&body))?;
        let resp = http_req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider_id))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.provider_id);
        }

        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across byte chunks; emit deltas only for complete lines.
        let chunk_stream = resp
            .bytes_stream()
            .scan(String::new(), |buf, chunk| {
                let out: Vec<anyhow::Result<StreamChunk>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }

    async fn complete_once(&self, req: CompletionRequest) -> anyhow::Result<String> {
        let body = self.build_body(&req, false);
        let http_req = self.apply_auth(self.client.post(&self.chat_url).json(&body))?;
        let resp = http_req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider_id))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.provider_id);
        }

        let v: Value = resp
            .json()
            .await
            .with_context(|| format!("{} returned a non-JSON body", self.provider_id))?;
        Ok(v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

// ─── SSE parsing ──────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// A trailing incomplete line stays in `buf` so the next TCP chunk can
/// extend it.  The `data: [DONE]` sentinel produces no delta; the stream
/// simply ends with the HTTP body.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<StreamChunk>> {
    let mut out = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(chunk) = parse_sse_data_line(&line) {
            out.push(Ok(chunk));
        }
    }
    out
}

/// Parse a single complete SSE `data:` line into a [`StreamChunk`].
///
/// Returns `None` for empty lines, comments, the `[DONE]` sentinel, and
/// unparseable payloads.
fn parse_sse_data_line(line: &str) -> Option<StreamChunk> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(parse_sse_chunk(&v))
}

/// Normalize one wire chunk into a [`StreamChunk`].
///
/// Tolerates every known dialect quirk: usage-only final chunks, reasoning
/// under either field name, tool-call deltas with or without an `index`, and
/// a provider-echoed numeric `cost` inside the usage object.
pub(crate) fn parse_sse_chunk(v: &Value) -> StreamChunk {
    let mut chunk = StreamChunk::default();

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        chunk.usage = Some(Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cost: usage.get("cost").and_then(Value::as_f64).and_then(Decimal::from_f64),
        });
    }

    let choice = &v["choices"][0];
    if let Some(reason) = choice["finish_reason"].as_str() {
        if !reason.is_empty() {
            chunk.finish_reason = Some(reason.to_string());
        }
    }

    let delta = &choice["delta"];
    chunk.content = delta.get("content").and_then(Value::as_str).map(str::to_string);
    chunk.reasoning_content = delta
        .get("reasoning_content")
        .and_then(Value::as_str)
        .map(str::to_string);
    chunk.reasoning = delta.get("reasoning").and_then(Value::as_str).map(str::to_string);

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        chunk.tool_calls = tool_calls
            .iter()
            .map(|tc| ToolCallDelta {
                index: tc.get("index").and_then(Value::as_u64).map(|i| i as u32),
                id: tc.get("id").and_then(Value::as_str).map(str::to_string),
                name: tc["function"]["name"].as_str().map(str::to_string),
                arguments: tc["function"]["arguments"].as_str().map(str::to_string),
            })
            .collect();
    }

    chunk
}

// ─── Wire message format ──────────────────────────────────────────────────────

/// Convert messages into the OpenAI wire-format JSON array.
///
/// Assistant `reasoning_content` is never sent back to the provider; the
/// chain of thought is private session state.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } => json!({ "role": "system", "content": content }),
            Message::User { content } => match content {
                UserContent::Text(t) => json!({ "role": "user", "content": t }),
                UserContent::Parts(parts) => {
                    let wire: Vec<Value> = parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                            ContentPart::Image { image_url } => json!({
                                "type": "image_url",
                                "image_url": { "url": image_url },
                            }),
                        })
                        .collect();
                    json!({ "role": "user", "content": wire })
                }
            },
            Message::Assistant { content, tool_calls, .. } => {
                let mut v = json!({ "role": "assistant", "content": content });
                if let Some(tcs) = tool_calls {
                    v["tool_calls"] = serde_json::to_value(tcs).unwrap_or(Value::Null);
                }
                v
            }
            Message::Tool { content, tool_call_id } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        })
        .collect()
}

// ─── Factory ──────────────────────────────────────────────────────────────────

/// [`ProviderFactory`] that builds [`OpenAICompatClient`]s from the registry.
///
/// Credentials come from an explicit per-provider map first, then from the
/// provider's registered environment variable.  Base URLs can be overridden
/// per provider (local gateways, test servers).
#[derive(Default)]
pub struct HttpProviderFactory {
    api_keys: std::collections::HashMap<String, String>,
    base_urls: std::collections::HashMap<String, String>,
}

impl HttpProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, provider_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys.insert(provider_id.into(), key.into());
        self
    }

    pub fn with_base_url(mut self, provider_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.base_urls.insert(provider_id.into(), url.into());
        self
    }

    fn resolve_key(&self, meta: &ProviderMeta) -> Option<String> {
        if let Some(k) = self.api_keys.get(meta.id) {
            return Some(k.clone());
        }
        meta.api_key_env.and_then(|env| std::env::var(env).ok())
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn client(&self, provider_id: &str) -> anyhow::Result<Arc<dyn ChatProvider>> {
        let meta = get_provider(provider_id).with_context(|| {
            let known: Vec<&str> = known_provider_ids().collect();
            format!(
                "unknown provider {provider_id:?}; known providers: {}",
                known.join(", ")
            )
        })?;
        if meta.base_url.is_empty() && !self.base_urls.contains_key(provider_id) {
            bail!("provider {provider_id:?} has no HTTP endpoint; inject a client for it");
        }
        Ok(Arc::new(OpenAICompatClient::from_meta(
            meta,
            self.base_urls.get(provider_id).map(String::as_str),
            self.resolve_key(meta),
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
