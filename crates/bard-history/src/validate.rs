// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use bard_model::Message;

/// A message log that violates the tool-call pairing rule.
///
/// Raised before a write ever happens; it indicates a bug in whoever
/// assembled the sequence, so it is fatal to the operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "tool message at index {index} has no matching call {tool_call_id:?} \
     on the preceding assistant message"
)]
pub struct ProtocolViolation {
    pub index: usize,
    pub tool_call_id: String,
}

/// Verify the well-formedness of a message sequence.
///
/// Every `tool` message must be preceded — possibly across intervening tool
/// messages — by an assistant message whose `tool_calls` contains a call with
/// the same id.  The backwards scan stops at the first assistant message
/// encountered; any other role ends the search unmatched.
pub fn validate(messages: &[Message]) -> Result<(), ProtocolViolation> {
    for (index, message) in messages.iter().enumerate() {
        let Message::Tool { tool_call_id, .. } = message else {
            continue;
        };
        let mut matched = false;
        for earlier in messages[..index].iter().rev() {
            match earlier {
                Message::Tool { .. } => continue,
                Message::Assistant { tool_calls, .. } => {
                    matched = tool_calls
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .any(|tc| tc.id == *tool_call_id);
                    break;
                }
                _ => break,
            }
        }
        if !matched {
            return Err(ProtocolViolation { index, tool_call_id: tool_call_id.clone() });
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bard_model::ToolCallIntent;

    use super::*;

    fn assistant_calling(ids: &[&str]) -> Message {
        Message::Assistant {
            content: String::new(),
            reasoning_content: None,
            tool_calls: Some(
                ids.iter().map(|id| ToolCallIntent::function(*id, "echo", "{}")).collect(),
            ),
        }
    }

    #[test]
    fn empty_log_is_valid() {
        assert_eq!(validate(&[]), Ok(()));
    }

    #[test]
    fn log_without_tool_messages_is_valid() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        assert_eq!(validate(&msgs), Ok(()));
    }

    #[test]
    fn paired_tool_message_is_valid() {
        let msgs = vec![
            Message::user("run it"),
            assistant_calling(&["c1"]),
            Message::tool_result("c1", "ok"),
        ];
        assert_eq!(validate(&msgs), Ok(()));
    }

    #[test]
    fn parallel_tool_results_all_match_one_assistant() {
        let msgs = vec![
            Message::user("run both"),
            assistant_calling(&["c1", "c2"]),
            Message::tool_result("c1", "a"),
            Message::tool_result("c2", "b"),
        ];
        assert_eq!(validate(&msgs), Ok(()));
    }

    #[test]
    fn orphan_tool_message_is_rejected_with_index_and_id() {
        let msgs = vec![Message::user("hi"), Message::tool_result("c9", "boom")];
        let err = validate(&msgs).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.tool_call_id, "c9");
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let msgs = vec![
            assistant_calling(&["c1"]),
            Message::tool_result("c2", "wrong"),
        ];
        let err = validate(&msgs).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.tool_call_id, "c2");
    }

    #[test]
    fn search_stops_at_first_assistant() {
        // The matching call sits on an assistant *behind* a newer assistant
        // that does not declare it — the scan must stop at the newer one.
        let msgs = vec![
            assistant_calling(&["c1"]),
            Message::assistant("done"),
            Message::tool_result("c1", "late"),
        ];
        assert!(validate(&msgs).is_err());
    }

    #[test]
    fn user_message_between_call_and_result_breaks_pairing() {
        let msgs = vec![
            assistant_calling(&["c1"]),
            Message::user("interruption"),
            Message::tool_result("c1", "late"),
        ];
        assert!(validate(&msgs).is_err());
    }

    #[test]
    fn tool_message_first_in_log_is_rejected() {
        let msgs = vec![Message::tool_result("c1", "orphan")];
        let err = validate(&msgs).unwrap_err();
        assert_eq!(err.index, 0);
    }
}
