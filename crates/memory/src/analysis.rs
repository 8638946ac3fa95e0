//! Audit log analysis: per-tool call statistics.

use seqpilot_core::memory::MemoryRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregated figures for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub calls: usize,
    pub successes: usize,
    pub mean_latency_ms: f64,
}

impl ToolStats {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }
}

/// Whole-log summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    pub total_calls: usize,
    pub failed_calls: usize,
    /// Sorted by call count, busiest first
    pub tools: Vec<ToolStats>,
}

/// Summarize a slice of records.
pub fn summarize(records: &[MemoryRecord]) -> AuditSummary {
    let mut by_tool: BTreeMap<&str, (usize, usize, u64)> = BTreeMap::new();
    for r in records {
        let entry = by_tool.entry(r.tool_name.as_str()).or_default();
        entry.0 += 1;
        if r.success {
            entry.1 += 1;
        }
        entry.2 += r.execution_time_ms;
    }

    let mut tools: Vec<ToolStats> = by_tool
        .into_iter()
        .map(|(name, (calls, successes, total_ms))| ToolStats {
            tool_name: name.to_string(),
            calls,
            successes,
            mean_latency_ms: total_ms as f64 / calls as f64,
        })
        .collect();
    tools.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.tool_name.cmp(&b.tool_name)));

    AuditSummary {
        total_calls: records.len(),
        failed_calls: records.iter().filter(|r| !r.success).count(),
        tools,
    }
}
