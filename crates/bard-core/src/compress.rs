// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::warn;

use bard_model::{ChatProvider, CompletionRequest, ContentPart, Message, UserContent};

use crate::session::SessionHandle;

const SUMMARIZE_PROMPT: &str = "\
You are summarizing an AI coding assistant conversation so it can be \
compressed without losing working context. Write a comprehensive, factual \
summary of the conversation below. Preserve exactly: every file path that \
was read, created or modified; every package or dependency name mentioned; \
every configuration change; and what the user still wants done. Do not \
editorialize and do not omit unfinished work.";

const SUMMARIZATION_TEMPERATURE: f32 = 0.3;

/// Build the one-shot summarization request for the older message prefix.
pub(crate) fn summarization_request(messages: &[Message], model: String) -> CompletionRequest {
    let transcript = serialize_turns(messages);
    CompletionRequest {
        model,
        messages: vec![Message::user(format!("{SUMMARIZE_PROMPT}\n\n---\n\n{transcript}"))],
        tools: vec![],
        temperature: Some(SUMMARIZATION_TEMPERATURE),
    }
}

/// Serialize messages into a plain-text transcript of USER/ASSISTANT/TOOL
/// turns for the summarization prompt.  System messages are skipped; images
/// collapse to a marker.
fn serialize_turns(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        match m {
            Message::System { .. } => continue,
            Message::User { content } => {
                let text = match content {
                    UserContent::Text(t) => t.clone(),
                    UserContent::Parts(parts) => parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text.as_str(),
                            ContentPart::Image { .. } => "[image]",
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                };
                out.push_str(&format!("USER: {text}\n\n"));
            }
            Message::Assistant { content, tool_calls, .. } => {
                out.push_str(&format!("ASSISTANT: {content}\n"));
                for tc in tool_calls.as_deref().unwrap_or_default() {
                    out.push_str(&format!(
                        "[tool call: {}({})]\n",
                        tc.function.name, tc.function.arguments
                    ));
                }
                out.push('\n');
            }
            Message::Tool { content, tool_call_id } => {
                out.push_str(&format!("TOOL ({tool_call_id}): {content}\n\n"));
            }
        }
    }
    out
}

/// Background compression of one session's persisted log.
///
/// Runs detached from the generation loop on a snapshot of the messages
/// taken when the trigger fired.  The persisted log is rewritten to
/// `[summary, ...recent]`; the live `session.messages` is left untouched, so
/// compression becomes visible on the next restore.  The foreground may
/// persist concurrently — whole-file rewrites make that a tolerated
/// last-writer-wins race.  The latch is cleared on every path.
pub(crate) async fn run_compression(
    handle: Arc<SessionHandle>,
    client: Arc<dyn ChatProvider>,
    model: String,
    project_dir: PathBuf,
    snapshot: Vec<Message>,
    split: usize,
) {
    if let Err(e) = compress(&handle, client, model, &project_dir, snapshot, split).await {
        warn!(project = %handle.project_id(), error = %e, "context compression failed");
    }
    handle.is_compressing.store(false, Ordering::SeqCst);
}

async fn compress(
    handle: &SessionHandle,
    client: Arc<dyn ChatProvider>,
    model: String,
    project_dir: &PathBuf,
    snapshot: Vec<Message>,
    split: usize,
) -> anyhow::Result<()> {
    let split = split.min(snapshot.len());
    let to_summarize = &snapshot[..split];
    if to_summarize.is_empty() {
        return Ok(());
    }

    let summary = client
        .complete_once(summarization_request(to_summarize, model))
        .await?;

    let mut compacted = Vec::with_capacity(snapshot.len() - split + 1);
    compacted.push(Message::system(format!("Previous conversation summary:\n\n{summary}")));
    compacted.extend_from_slice(&snapshot[split..]);

    let session_name = handle.session_name().await;
    bard_history::write_session(project_dir, &session_name, &compacted).await?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bard_model::ToolCallIntent;

    use super::*;

    #[test]
    fn request_uses_low_temperature_and_no_tools() {
        let req = summarization_request(&[Message::user("hi")], "m".into());
        assert_eq!(req.temperature, Some(0.3));
        assert!(req.tools.is_empty());
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn transcript_enumerates_roles() {
        let msgs = vec![
            Message::user("add a button"),
            Message::Assistant {
                content: "on it".into(),
                reasoning_content: None,
                tool_calls: Some(vec![ToolCallIntent::function(
                    "c1",
                    "edit_file",
                    r#"{"path":"src/App.tsx"}"#,
                )]),
            },
            Message::tool_result("c1", "edited"),
        ];
        let transcript = serialize_turns(&msgs);
        assert!(transcript.contains("USER: add a button"));
        assert!(transcript.contains("ASSISTANT: on it"));
        assert!(transcript.contains("edit_file"));
        assert!(transcript.contains("TOOL (c1): edited"));
    }

    #[test]
    fn transcript_skips_system_and_marks_images() {
        let msgs = vec![
            Message::system("secret prompt"),
            Message::user(UserContent::Parts(vec![
                ContentPart::text("look at this"),
                ContentPart::image("data:image/png;base64,AA=="),
            ])),
        ];
        let transcript = serialize_turns(&msgs);
        assert!(!transcript.contains("secret prompt"));
        assert!(transcript.contains("[image]"));
        assert!(!transcript.contains("base64"));
    }

    #[test]
    fn prompt_demands_paths_and_packages() {
        let req = summarization_request(&[Message::user("x")], "m".into());
        let text = req.messages[0].as_text().unwrap();
        assert!(text.contains("file path"));
        assert!(text.contains("package"));
    }
}
