// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The provider adapter seam.
///
/// The orchestrator depends only on this contract; concrete adapters own
/// transport, authentication and dialect normalization.  The dialect quirks
/// an adapter must absorb: reasoning may arrive as `reasoning_content` or
/// `reasoning`, tool-call deltas may omit their `index`, usage may arrive in
/// the final chunk only, and some providers echo an explicit `cost`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider id (e.g. `"openrouter"`).
    fn provider_id(&self) -> &str;

    /// Open a streaming completion.  Cancellation is the caller's concern:
    /// dropping the stream aborts the request.
    async fn open_stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream>;

    /// One-shot, non-streaming completion returning the full response text.
    /// Used for background summarization.
    async fn complete_once(&self, req: CompletionRequest) -> anyhow::Result<String>;
}

/// Constructor-injected factory producing a client for a resolved provider id.
pub trait ProviderFactory: Send + Sync {
    fn client(&self, provider_id: &str) -> anyhow::Result<Arc<dyn ChatProvider>>;
}
