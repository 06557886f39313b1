// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use crate::{provider::ChunkStream, ChatProvider, CompletionRequest, StreamChunk};

/// One scripted response for a single `open_stream` call.
struct Script {
    chunks: Vec<StreamChunk>,
    /// When set the stream never terminates after its chunks — it stays
    /// pending so tests can exercise mid-stream cancellation.
    stall: bool,
}

/// A pre-scripted provider.  Each `open_stream` call pops the next script
/// from the front of the queue, so tests can specify exact chunk sequences
/// — including tool calls and usage payloads — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    /// When set, every `open_stream` call fails with this message.
    fail: Option<String>,
    once_replies: Mutex<Vec<String>>,
    /// Artificial latency for `complete_once`, so tests can order a
    /// background summarization after the foreground loop deterministically.
    once_delay: Option<std::time::Duration>,
    /// The last request seen by `open_stream`, for test inspection.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// The last request seen by `complete_once`.
    pub last_once_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of chunk scripts.
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(|chunks| Script { chunks, stall: false }).collect()),
            fail: None,
            once_replies: Mutex::new(Vec::new()),
            once_delay: None,
            last_request: Arc::new(Mutex::new(None)),
            last_once_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Single script whose stream emits `chunks` then stays pending forever.
    pub fn stalling(chunks: Vec<StreamChunk>) -> Self {
        let p = Self::new(vec![]);
        p.scripts.lock().unwrap().push(Script { chunks, stall: true });
        p
    }

    /// Provider whose `open_stream` always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut p = Self::new(vec![]);
        p.fail = Some(message.into());
        p
    }

    /// Queue a reply for the next `complete_once` call.
    pub fn with_once_reply(self, reply: impl Into<String>) -> Self {
        self.once_replies.lock().unwrap().push(reply.into());
        self
    }

    /// Delay every `complete_once` reply by `delay`.
    pub fn with_once_delay(mut self, delay: std::time::Duration) -> Self {
        self.once_delay = Some(delay);
        self
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        if let Some(msg) = &self.fail {
            anyhow::bail!("{msg}");
        }
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                Script {
                    chunks: vec![
                        StreamChunk::text("[no more scripts]"),
                        StreamChunk::finish("stop"),
                    ],
                    stall: false,
                }
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<StreamChunk>> =
            script.chunks.into_iter().map(Ok).collect();
        let head = stream::iter(wrapped);
        if script.stall {
            Ok(Box::pin(head.chain(stream::pending())))
        } else {
            Ok(Box::pin(head))
        }
    }

    async fn complete_once(&self, req: CompletionRequest) -> anyhow::Result<String> {
        if let Some(delay) = self.once_delay {
            tokio::time::sleep(delay).await;
        }
        *self.last_once_request.lock().unwrap() = Some(req);
        let mut replies = self.once_replies.lock().unwrap();
        if replies.is_empty() {
            Ok("[no scripted reply]".into())
        } else {
            Ok(replies.remove(0))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::Message;

    fn req() -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scripted_chunks_replay_in_order() {
        let p = ScriptedProvider::new(vec![vec![
            StreamChunk::text("He"),
            StreamChunk::text("llo"),
            StreamChunk::finish("stop"),
        ]]);
        let mut stream = p.open_stream(req()).await.unwrap();
        let mut texts = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let Some(t) = chunk.unwrap().content {
                texts.push(t);
            }
        }
        assert_eq!(texts, vec!["He", "llo"]);
    }

    #[tokio::test]
    async fn fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let mut stream = p.open_stream(req()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.content.unwrap().contains("no more scripts"));
    }

    #[tokio::test]
    async fn failing_provider_errors_on_open() {
        let p = ScriptedProvider::failing("rate limited");
        assert!(p.open_stream(req()).await.is_err());
    }

    #[tokio::test]
    async fn once_reply_is_consumed() {
        let p = ScriptedProvider::new(vec![]).with_once_reply("summary text");
        assert_eq!(p.complete_once(req()).await.unwrap(), "summary text");
        assert_eq!(p.complete_once(req()).await.unwrap(), "[no scripted reply]");
    }

    #[tokio::test]
    async fn last_request_is_recorded() {
        let p = ScriptedProvider::new(vec![]);
        let _ = p.open_stream(req()).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().model, "mock-model");
    }
}
