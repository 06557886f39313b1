// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

/// Injected builder producing the system prompt for each model turn.
///
/// Treated as an opaque pure function over the project's working directory;
/// richer builders read skills, user identity and project context.  An empty
/// result means no system message is prepended to the request.
pub trait SystemPromptBuilder: Send + Sync {
    fn build(&self, project_dir: &Path) -> String;
}

/// The stock coding-assistant prompt.
pub struct DefaultSystemPrompt;

impl SystemPromptBuilder for DefaultSystemPrompt {
    fn build(&self, project_dir: &Path) -> String {
        format!(
            "You are bard, an AI coding assistant working inside the project at {}.\n\
             Use the available tools to read and modify the project. Prefer small, \
             verifiable changes and report what you did when you finish.",
            project_dir.display()
        )
    }
}

/// Builder that suppresses the system message entirely.
pub struct NoSystemPrompt;

impl SystemPromptBuilder for NoSystemPrompt {
    fn build(&self, _project_dir: &Path) -> String {
        String::new()
    }
}
