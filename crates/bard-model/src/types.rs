use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part user message.
///
/// Images are always represented as data URLs (`data:<mime>;base64,<b64>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        /// Data URL (`data:image/png;base64,...`).
        image_url: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into() }
    }
}

/// Content of a user message – either a plain string or ordered parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    /// Return `true` if any part is an image.
    pub fn has_images(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(|p| matches!(p, ContentPart::Image { .. })),
        }
    }

    /// Drop image parts, preserving text parts in order.
    ///
    /// A parts list that collapses to a single text part becomes `Text` for
    /// cleaner serialization; an all-image list becomes empty text.
    pub fn without_images(&self) -> Self {
        match self {
            Self::Text(t) => Self::Text(t.clone()),
            Self::Parts(parts) => {
                let kept: Vec<ContentPart> = parts
                    .iter()
                    .filter(|p| matches!(p, ContentPart::Text { .. }))
                    .cloned()
                    .collect();
                match kept.as_slice() {
                    [] => Self::Text(String::new()),
                    [ContentPart::Text { text }] => Self::Text(text.clone()),
                    _ => Self::Parts(kept),
                }
            }
        }
    }
}

impl From<String> for UserContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for UserContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
///
/// Closed sum over the four roles; the serialized form carries the role as a
/// `"role"` tag so one JSON object per line round-trips through the history
/// files unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCallIntent>>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { content: text.into() }
    }

    pub fn user(content: impl Into<UserContent>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: text.into(),
            reasoning_content: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: id.into(),
        }
    }

    /// The wire-format role string.
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Plain text of this message, when it has a single text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::System { content } => Some(content),
            Self::User { content: UserContent::Text(t) } => Some(t),
            Self::User { .. } => None,
            Self::Assistant { content, .. } => Some(content),
            Self::Tool { content, .. } => Some(content),
        }
    }

    /// Tool-call intents carried by an assistant message, if any.
    pub fn tool_calls(&self) -> Option<&[ToolCallIntent]> {
        match self {
            Self::Assistant { tool_calls: Some(tcs), .. } => Some(tcs),
            _ => None,
        }
    }
}

/// A structured request by the assistant to invoke a named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallIntent {
    /// Opaque identifier assigned by the model (forwarded verbatim).
    pub id: String,
    /// Always `"function"` on the wire.
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallIntent {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".into(),
            function: FunctionCall { name: name.into(), arguments: arguments.into() },
        }
    }

    /// A call whose function name is missing or blank cannot be dispatched.
    pub fn is_malformed(&self) -> bool {
        self.function.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.  `None` means the tool accepts
    /// arbitrary JSON and validates nothing up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Request sent through the provider seam.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub temperature: Option<f32>,
}

// ─── Streaming delta types ────────────────────────────────────────────────────

/// One streamed delta from a model completion.
///
/// Every field is optional: a chunk may carry any combination of text,
/// reasoning, tool-call fragments, a finish reason, and usage.  Reasoning
/// arrives under `reasoning_content` on most providers and `reasoning` on
/// some aggregators; both are surfaced so the aggregator can accept either.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self { content: Some(delta.into()), ..Default::default() }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self { finish_reason: Some(reason.into()), ..Default::default() }
    }
}

/// A fragment of a tool-call intent inside one chunk.
///
/// `index` routes accumulation when a provider interleaves parallel calls;
/// providers that omit it rely on positional order within the chunk.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Token usage reported by a completion, usually in the final chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Direct monetary cost echoed by some providers.  When present it takes
    /// precedence over catalog-priced accounting.
    pub cost: Option<Decimal>,
}

// ─── Sanitizers ───────────────────────────────────────────────────────────────

/// Return `true` if any user message carries an image part.
pub fn has_image_parts(messages: &[Message]) -> bool {
    messages.iter().any(|m| match m {
        Message::User { content } => content.has_images(),
        _ => false,
    })
}

/// Strip image parts from user messages, preserving text.
///
/// Used when the upstream model has refused image input: the request is
/// retried text-only while the persisted log keeps the original content.
pub fn strip_image_parts(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .map(|m| match m {
            Message::User { content } if content.has_images() => {
                Message::User { content: content.without_images() }
            }
            other => other,
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
