//! System prompt assembly.
//!
//! Rebuilt every round from the live registry so the model is only ever told
//! about tools that can actually be dispatched right now.

use seqpilot_config::AgentSettings;
use seqpilot_tools::registry::ToolCatalog;

/// Built-in instructions, replaced wholesale by `system_prompt_override`.
pub const BASE_INSTRUCTIONS: &str = "You are seqpilot, an assistant embedded in a genome browser. \
You help the user inspect sequences, navigate regions and run analyses by calling tools. \
Work step by step, use tool results to decide what to do next, and do not invent results.";

const CALL_FORMAT: &str = r#"## Calling tools

To call a tool, write a JSON object of exactly this shape anywhere in your reply:

{"tool_name": "<name>", "parameters": {<arguments>}}

- You may include several calls in one reply; they run in the order written.
- Tool results arrive in the next message. Wait for them before drawing conclusions.
- Only call tools listed below.
- When the task is finished, reply without any tool call and say "Task completed"."#;

/// Assemble the system prompt for one round.
pub fn build_system_prompt(
    settings: &AgentSettings,
    catalog: &ToolCatalog,
    plugin_docs: &[(String, String)],
) -> String {
    let mut prompt = settings
        .system_prompt_override
        .clone()
        .unwrap_or_else(|| BASE_INSTRUCTIONS.to_string());

    prompt.push_str("\n\n");
    prompt.push_str(CALL_FORMAT);
    prompt.push_str("\n\n");

    if catalog.is_empty() {
        prompt.push_str("## Available tools\n\nNo tools are currently available.\n");
    } else {
        let counts = catalog.counts;
        prompt.push_str(&format!(
            "## Available tools ({} total: {} local, {} plugin, {} remote)\n\n",
            counts.total(),
            counts.local,
            counts.plugin,
            counts.remote
        ));
        for entry in &catalog.entries {
            let def = &entry.definition;
            let description = if def.description.is_empty() {
                "(no description)"
            } else {
                def.description.as_str()
            };
            prompt.push_str(&format!("- {} [{}]: {}\n", def.name, entry.source, description));
            prompt.push_str(&format!("  parameters: {}\n", def.parameters));
        }
    }

    if !plugin_docs.is_empty() {
        prompt.push_str("\n## Plugin notes\n");
        for (name, docs) in plugin_docs {
            prompt.push_str(&format!("\n### {name}\n\n{}\n", docs.trim()));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqpilot_core::tool::ToolDefinition;
    use seqpilot_tools::registry::{CatalogEntry, SourceCounts, ToolSource};
    use serde_json::json;

    fn catalog() -> ToolCatalog {
        ToolCatalog {
            entries: vec![
                CatalogEntry {
                    definition: ToolDefinition {
                        name: "navigate".into(),
                        description: "Jump to a region".into(),
                        parameters: json!({"type": "object", "properties": {"region": {"type": "string"}}}),
                    },
                    source: ToolSource::Local,
                    origin: "local".into(),
                },
                CatalogEntry {
                    definition: ToolDefinition {
                        name: "blast_search".into(),
                        description: String::new(),
                        parameters: json!({"type": "object"}),
                    },
                    source: ToolSource::Remote,
                    origin: "genome-tools".into(),
                },
            ],
            counts: SourceCounts {
                local: 1,
                plugin: 0,
                remote: 1,
            },
        }
    }

    #[test]
    fn lists_live_catalog() {
        let prompt = build_system_prompt(&AgentSettings::default(), &catalog(), &[]);
        assert!(prompt.starts_with(BASE_INSTRUCTIONS));
        assert!(prompt.contains("(2 total: 1 local, 0 plugin, 1 remote)"));
        assert!(prompt.contains("- navigate [local]: Jump to a region"));
        assert!(prompt.contains("- blast_search [remote]: (no description)"));
        assert!(prompt.contains(r#""tool_name": "<name>""#));
        assert!(!prompt.contains("Plugin notes"));
    }

    #[test]
    fn empty_catalog_says_so() {
        let prompt = build_system_prompt(&AgentSettings::default(), &ToolCatalog::default(), &[]);
        assert!(prompt.contains("No tools are currently available."));
    }

    #[test]
    fn override_and_plugin_docs() {
        let settings = AgentSettings {
            system_prompt_override: Some("Custom instructions.".into()),
            ..AgentSettings::default()
        };
        let docs = vec![(
            "sequence-tools".to_string(),
            "Example: {\"tool_name\":\"translate_sequence\",\"parameters\":{\"sequence\":\"ATG\"}}\n".to_string(),
        )];
        let prompt = build_system_prompt(&settings, &catalog(), &docs);
        assert!(prompt.starts_with("Custom instructions."));
        assert!(!prompt.contains(BASE_INSTRUCTIONS));
        assert!(prompt.contains("### sequence-tools"));
        assert!(prompt.contains("translate_sequence"));
    }
}
