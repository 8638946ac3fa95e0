//! Tool domain: calls parsed from model text, their results, and the trait
//! implemented by in-process tool functions.
//!
//! Plugins and remote tool servers are *not* `Tool` impls; the registry wraps
//! all three behind one execution handle.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool invocation parsed out of model-generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// The raw text fragment this call was parsed from
    pub source_text: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        let parameters = match parameters {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let name = name.into();
        let source_text = serde_json::json!({
            "tool_name": name,
            "parameters": parameters,
        })
        .to_string();
        Self {
            name,
            parameters,
            source_text,
        }
    }

    /// Parameters as a JSON value, ready to hand to a backend.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::Value::Object(self.parameters.clone())
    }
}

/// The outcome of dispatching exactly one [`ToolCall`]. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,

    pub parameters: serde_json::Map<String, serde_json::Value>,

    pub success: bool,

    /// The value produced on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    /// The error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Closest registered names, for unresolved calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,

    pub execution_time_ms: u64,

    /// Which agent dispatched the call
    pub agent_label: String,
}

impl ToolResult {
    /// Render this result as the content of a tool-role message.
    pub fn to_prompt_content(&self) -> String {
        if self.success {
            let value = match &self.value {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => "null".into(),
            };
            format!("Tool '{}' succeeded: {}", self.tool_name, value)
        } else {
            let mut out = format!(
                "Tool '{}' failed: {}",
                self.tool_name,
                self.error.as_deref().unwrap_or("unknown error")
            );
            if !self.suggestions.is_empty() {
                out.push_str(&format!("\nDid you mean: {}?", self.suggestions.join(", ")));
            }
            out
        }
    }

    /// Short one-line summary, used by the audit log.
    pub fn summary(&self, max_chars: usize) -> String {
        let full = if self.success {
            match &self.value {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            }
        } else {
            format!("error: {}", self.error.as_deref().unwrap_or_default())
        };
        truncate_chars(&full, max_chars)
    }
}

/// Truncate on a char boundary, appending an ellipsis when anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// A tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's parameters
    #[serde(default = "empty_schema")]
    pub parameters: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// What a backend hands back on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub value: serde_json::Value,
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::String(s.into()),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self { value }
    }
}

/// The core Tool trait for in-process functions.
///
/// Host functions (navigate the browser, read the current view, …) implement
/// this trait and are registered as local tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_current_state").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for the prompt.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool) -> ToolResult {
        ToolResult {
            tool_name: "navigate".into(),
            parameters: serde_json::Map::new(),
            success,
            value: success.then(|| serde_json::json!("moved to chr1:100-200")),
            error: (!success).then(|| "Tool not found: navigat".to_string()),
            suggestions: if success { vec![] } else { vec!["navigate".into()] },
            execution_time_ms: 3,
            agent_label: "seqpilot".into(),
        }
    }

    #[test]
    fn tool_call_new_normalises_parameters() {
        let call = ToolCall::new("get_current_state", serde_json::json!(null));
        assert!(call.parameters.is_empty());
        assert!(call.source_text.contains("get_current_state"));
        assert_eq!(call.arguments(), serde_json::json!({}));
    }

    #[test]
    fn success_prompt_content() {
        let content = result(true).to_prompt_content();
        assert_eq!(content, "Tool 'navigate' succeeded: moved to chr1:100-200");
    }

    #[test]
    fn failure_prompt_content_lists_suggestions() {
        let content = result(false).to_prompt_content();
        assert!(content.contains("failed"));
        assert!(content.contains("Did you mean: navigate?"));
    }

    #[test]
    fn summary_truncates() {
        let summary = result(true).summary(8);
        assert_eq!(summary, "moved to…");
    }

    #[test]
    fn definition_defaults_schema() {
        let def: ToolDefinition =
            serde_json::from_str(r#"{"name":"zoom","description":"Zoom in"}"#).unwrap();
        assert_eq!(def.parameters, serde_json::json!({"type": "object"}));
    }
}
