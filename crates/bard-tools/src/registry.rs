// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use tracing::debug;

use bard_model::ToolSchema;

use crate::{Tool, ToolCall};

/// Central registry holding the declared tool catalogue and executor table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for the whole catalogue, sorted by name for a stable request
    /// shape across turns.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a resolved tool-call intent and return the tool-result body.
    ///
    /// Failures are contained: an unknown tool, bad arguments, a schema
    /// violation, or an executor error all become a textual result so the
    /// generation loop continues.  The dispatcher imposes no timeout.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.get(&call.name) else {
            return format!("Tool \"{}\" not found", call.name);
        };
        debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        match run_tool(tool.as_ref(), call).await {
            Ok(output) => output,
            Err(e) => format!("Error with tool {}: {e}", call.name),
        }
    }
}

async fn run_tool(tool: &dyn Tool, call: &ToolCall) -> anyhow::Result<String> {
    let args: Value = if call.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.arguments).context("invalid JSON arguments")?
    };

    if let Some(schema) = tool.input_schema() {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| anyhow::anyhow!("invalid input schema: {e}"))?;
        let validation_result = compiled.validate(&args);
        if let Err(errors) = validation_result {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            bail!("invalid arguments: {}", details.join("; "));
        }
    }

    tool.execute(args).await
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Echoes the `text` argument back.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Option<Value> {
            Some(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }))
        }
        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    /// Accepts anything, declares no schema.
    struct LooseTool;

    #[async_trait]
    impl Tool for LooseTool {
        fn name(&self) -> &str {
            "loose"
        }
        fn description(&self) -> &str {
            "no schema"
        }
        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            Ok(args.to_string())
        }
    }

    /// Always fails.
    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<String> {
            anyhow::bail!("disk on fire")
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(LooseTool);
        reg.register(BrokenTool);
        reg
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), arguments: args.into() }
    }

    #[tokio::test]
    async fn dispatch_valid_call_returns_executor_output() {
        let out = registry().dispatch(&call("echo", r#"{"text":"hi"}"#)).await;
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_reports_not_found() {
        let out = registry().dispatch(&call("nonesuch", "{}")).await;
        assert_eq!(out, "Tool \"nonesuch\" not found");
    }

    #[tokio::test]
    async fn dispatch_schema_violation_is_contained() {
        let out = registry().dispatch(&call("echo", r#"{"text":42}"#)).await;
        assert!(out.starts_with("Error with tool echo:"), "got: {out}");
    }

    #[tokio::test]
    async fn dispatch_missing_required_field_is_contained() {
        let out = registry().dispatch(&call("echo", "{}")).await;
        assert!(out.starts_with("Error with tool echo:"), "got: {out}");
    }

    #[tokio::test]
    async fn dispatch_invalid_json_is_contained() {
        let out = registry().dispatch(&call("loose", "{not json")).await;
        assert!(out.starts_with("Error with tool loose:"), "got: {out}");
    }

    #[tokio::test]
    async fn dispatch_empty_arguments_become_empty_object() {
        let out = registry().dispatch(&call("loose", "")).await;
        assert_eq!(out, "{}");
    }

    #[tokio::test]
    async fn dispatch_executor_error_is_contained() {
        let out = registry().dispatch(&call("broken", "{}")).await;
        assert_eq!(out, "Error with tool broken: disk on fire");
    }

    #[test]
    fn schemas_are_sorted_and_carry_parameters() {
        let schemas = registry().schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "echo", "loose"]);
        assert!(schemas[1].parameters.is_some(), "echo declares a schema");
        assert!(schemas[2].parameters.is_none(), "loose declares none");
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(EchoTool);
        assert_eq!(reg.names().len(), 1);
    }
}
