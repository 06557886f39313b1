// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use bard_model::{Message, StreamChunk, ToolCallIntent, Usage};

/// The observable portion of an in-progress assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingSnapshot {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCallIntent>,
}

/// A tool-call intent under accumulation, keyed by provider index.
#[derive(Debug)]
struct PendingCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

/// Incremental reducer folding streamed chunks into an assistant draft.
///
/// One draft lives for exactly one model turn; nothing carries over between
/// drafts.  `apply` reports whether user-observable state changed so the
/// orchestrator knows when to broadcast a streaming update.
#[derive(Debug, Default)]
pub struct StreamingDraft {
    content: String,
    reasoning_content: String,
    calls: Vec<PendingCall>,
    by_index: HashMap<u32, usize>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamingDraft {
    /// Fold one chunk into the draft.
    ///
    /// Reasoning is accepted under either wire name, `reasoning_content`
    /// preferred.  Tool-call deltas without an `index` fall back to their
    /// position within the chunk.  The finish reason retains the last
    /// non-empty value observed; usage retains the last payload.
    pub fn apply(&mut self, chunk: &StreamChunk) -> bool {
        let mut changed = false;

        if let Some(text) = &chunk.content {
            if !text.is_empty() {
                self.content.push_str(text);
                changed = true;
            }
        }

        let reasoning = chunk
            .reasoning_content
            .as_deref()
            .or(chunk.reasoning.as_deref());
        if let Some(r) = reasoning {
            if !r.is_empty() {
                self.reasoning_content.push_str(r);
                changed = true;
            }
        }

        for (pos, delta) in chunk.tool_calls.iter().enumerate() {
            let index = delta.index.unwrap_or(pos as u32);
            let slot = match self.by_index.get(&index) {
                Some(&i) => i,
                None => {
                    self.calls.push(PendingCall {
                        index,
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    let i = self.calls.len() - 1;
                    self.by_index.insert(index, i);
                    i
                }
            };
            let call = &mut self.calls[slot];
            if let Some(id) = delta.id.as_deref().filter(|s| !s.is_empty()) {
                call.id = id.to_string();
            }
            if let Some(name) = delta.name.as_deref().filter(|s| !s.is_empty()) {
                call.name = name.to_string();
            }
            if let Some(args) = &delta.arguments {
                call.arguments.push_str(args);
            }
            changed = true;
        }

        if let Some(reason) = chunk.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        changed
    }

    /// The current observable state, tool calls ordered by index.
    pub fn snapshot(&self) -> StreamingSnapshot {
        StreamingSnapshot {
            content: self.content.clone(),
            reasoning_content: self.reasoning_content.clone(),
            tool_calls: self.sorted_intents(),
        }
    }

    fn sorted_intents(&self) -> Vec<ToolCallIntent> {
        let mut order: Vec<&PendingCall> = self.calls.iter().collect();
        order.sort_by_key(|c| c.index);
        order
            .into_iter()
            .map(|c| ToolCallIntent::function(&c.id, &c.name, &c.arguments))
            .collect()
    }

    /// Finalize the draft at stream close.
    ///
    /// Empty accumulated arguments become `"{}"`.  Calls with a blank
    /// function name are retained and surface as malformed intents — the
    /// orchestrator commits them and raises a dedicated error afterwards.
    pub fn finish(self) -> FinishedDraft {
        let mut tool_calls = self.sorted_intents();
        for tc in &mut tool_calls {
            if tc.function.arguments.is_empty() {
                tc.function.arguments = "{}".to_string();
            }
        }
        FinishedDraft {
            content: self.content,
            reasoning_content: self.reasoning_content,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// The finalized result of one streamed model turn.
#[derive(Debug, Clone)]
pub struct FinishedDraft {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCallIntent>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl FinishedDraft {
    /// Build the assistant message to commit, omitting empty optional fields.
    pub fn to_message(&self) -> Message {
        Message::Assistant {
            content: self.content.clone(),
            reasoning_content: (!self.reasoning_content.is_empty())
                .then(|| self.reasoning_content.clone()),
            tool_calls: (!self.tool_calls.is_empty()).then(|| self.tool_calls.clone()),
        }
    }

    pub fn malformed_ids(&self) -> Vec<&str> {
        self.tool_calls
            .iter()
            .filter(|tc| tc.is_malformed())
            .map(|tc| tc.id.as_str())
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bard_model::ToolCallDelta;

    use super::*;

    fn tool_delta(
        index: Option<u32>,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> StreamChunk {
        StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index,
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: args.map(str::to_string),
            }],
            ..Default::default()
        }
    }

    // ── Text and reasoning ────────────────────────────────────────────────────

    #[test]
    fn text_deltas_concatenate() {
        let mut draft = StreamingDraft::default();
        assert!(draft.apply(&StreamChunk::text("He")));
        assert!(draft.apply(&StreamChunk::text("llo")));
        assert_eq!(draft.snapshot().content, "Hello");
    }

    #[test]
    fn empty_text_delta_is_not_a_change() {
        let mut draft = StreamingDraft::default();
        assert!(!draft.apply(&StreamChunk::text("")));
        assert!(!draft.apply(&StreamChunk::default()));
    }

    #[test]
    fn reasoning_accepted_under_either_field_name() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk {
            reasoning_content: Some("step one. ".into()),
            ..Default::default()
        });
        draft.apply(&StreamChunk { reasoning: Some("step two.".into()), ..Default::default() });
        assert_eq!(draft.snapshot().reasoning_content, "step one. step two.");
    }

    #[test]
    fn reasoning_content_preferred_when_both_present() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk {
            reasoning_content: Some("preferred".into()),
            reasoning: Some("fallback".into()),
            ..Default::default()
        });
        assert_eq!(draft.snapshot().reasoning_content, "preferred");
    }

    // ── Tool-call accumulation ────────────────────────────────────────────────

    #[test]
    fn tool_call_fragments_assemble_by_index() {
        let mut draft = StreamingDraft::default();
        draft.apply(&tool_delta(Some(0), Some("c1"), Some("echo"), Some("")));
        draft.apply(&tool_delta(Some(0), None, None, Some("{\"text\":")));
        draft.apply(&tool_delta(Some(0), None, None, Some("\"hi\"}")));
        let finished = draft.finish();
        assert_eq!(finished.tool_calls.len(), 1);
        let tc = &finished.tool_calls[0];
        assert_eq!(tc.id, "c1");
        assert_eq!(tc.function.name, "echo");
        assert_eq!(tc.function.arguments, "{\"text\":\"hi\"}");
    }

    #[test]
    fn parallel_calls_interleaved_by_index_stay_separate() {
        let mut draft = StreamingDraft::default();
        draft.apply(&tool_delta(Some(0), Some("c0"), Some("glob"), Some("{\"a\"")));
        draft.apply(&tool_delta(Some(1), Some("c1"), Some("grep"), Some("{\"b\"")));
        draft.apply(&tool_delta(Some(0), None, None, Some(":1}")));
        draft.apply(&tool_delta(Some(1), None, None, Some(":2}")));
        let finished = draft.finish();
        assert_eq!(finished.tool_calls[0].function.arguments, "{\"a\":1}");
        assert_eq!(finished.tool_calls[1].function.arguments, "{\"b\":2}");
    }

    #[test]
    fn missing_index_falls_back_to_position_within_chunk() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk {
            tool_calls: vec![
                ToolCallDelta {
                    index: None,
                    id: Some("c0".into()),
                    name: Some("a".into()),
                    arguments: None,
                },
                ToolCallDelta {
                    index: None,
                    id: Some("c1".into()),
                    name: Some("b".into()),
                    arguments: None,
                },
            ],
            ..Default::default()
        });
        let finished = draft.finish();
        assert_eq!(finished.tool_calls.len(), 2);
        assert_eq!(finished.tool_calls[0].id, "c0");
        assert_eq!(finished.tool_calls[1].id, "c1");
    }

    #[test]
    fn finish_orders_calls_by_index_not_arrival() {
        let mut draft = StreamingDraft::default();
        draft.apply(&tool_delta(Some(1), Some("second"), Some("b"), None));
        draft.apply(&tool_delta(Some(0), Some("first"), Some("a"), None));
        let finished = draft.finish();
        assert_eq!(finished.tool_calls[0].id, "first");
        assert_eq!(finished.tool_calls[1].id, "second");
    }

    #[test]
    fn empty_arguments_default_to_empty_object() {
        let mut draft = StreamingDraft::default();
        draft.apply(&tool_delta(Some(0), Some("c1"), Some("echo"), None));
        let finished = draft.finish();
        assert_eq!(finished.tool_calls[0].function.arguments, "{}");
    }

    #[test]
    fn blank_name_is_retained_and_reported_malformed() {
        let mut draft = StreamingDraft::default();
        draft.apply(&tool_delta(Some(0), Some("c1"), None, Some("{}")));
        let finished = draft.finish();
        assert_eq!(finished.tool_calls.len(), 1, "malformed call is kept");
        assert_eq!(finished.malformed_ids(), vec!["c1"]);
    }

    // ── Finish reason and usage ───────────────────────────────────────────────

    #[test]
    fn last_non_empty_finish_reason_wins() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk::finish("tool_calls"));
        draft.apply(&StreamChunk { finish_reason: Some(String::new()), ..Default::default() });
        draft.apply(&StreamChunk::finish("stop"));
        assert_eq!(draft.finish().finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn usage_is_captured() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk {
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 2, cost: None }),
            ..Default::default()
        });
        assert_eq!(draft.finish().usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn usage_and_finish_reason_are_not_observable_changes() {
        let mut draft = StreamingDraft::default();
        let changed = draft.apply(&StreamChunk {
            finish_reason: Some("stop".into()),
            usage: Some(Usage::default()),
            ..Default::default()
        });
        assert!(!changed);
    }

    // ── Draft isolation ───────────────────────────────────────────────────────

    #[test]
    fn fresh_draft_carries_no_state_from_a_finished_one() {
        let mut first = StreamingDraft::default();
        first.apply(&StreamChunk::text("old"));
        first.apply(&tool_delta(Some(0), Some("c1"), Some("echo"), Some("{}")));
        let _ = first.finish();

        let mut second = StreamingDraft::default();
        assert!(!second.apply(&StreamChunk::default()));
        let finished = second.finish();
        assert!(finished.content.is_empty());
        assert!(finished.tool_calls.is_empty());
    }

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn to_message_omits_empty_optionals() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk::text("Hello"));
        let msg = draft.finish().to_message();
        match msg {
            Message::Assistant { content, reasoning_content, tool_calls } => {
                assert_eq!(content, "Hello");
                assert!(reasoning_content.is_none());
                assert!(tool_calls.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn to_message_carries_reasoning_and_calls_when_present() {
        let mut draft = StreamingDraft::default();
        draft.apply(&StreamChunk { reasoning_content: Some("hmm".into()), ..Default::default() });
        draft.apply(&tool_delta(Some(0), Some("c1"), Some("echo"), Some("{}")));
        let msg = draft.finish().to_message();
        match msg {
            Message::Assistant { reasoning_content, tool_calls, .. } => {
                assert_eq!(reasoning_content.as_deref(), Some("hmm"));
                assert_eq!(tool_calls.unwrap().len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
