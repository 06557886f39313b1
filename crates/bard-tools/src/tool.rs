// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A resolved tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// JSON-encoded argument text as emitted by the model.
    pub arguments: String,
}

/// A named side-effectful operation exposed to the model.
///
/// Tools own their own timeouts; the dispatcher never imposes one.  The
/// executor's textual result becomes the body of the tool-result message.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object.  `None` skips up-front validation
    /// and hands the parsed arguments to [`Tool::execute`] as-is.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}
