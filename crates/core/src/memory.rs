//! Memory trait: the append-only audit log of tool invocations.
//!
//! Every dispatch (successful, failed, or unresolved) produces exactly one
//! [`MemoryRecord`]. Records are never mutated after creation; recorders only
//! append, read back, and evict the oldest entries under a retention cap.

use crate::error::MemoryError;
use crate::tool::ToolResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters kept in [`MemoryRecord::result_summary`].
pub const RESULT_SUMMARY_CHARS: usize = 240;

/// A single audited tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub tool_name: String,

    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Truncated rendering of the value or error
    pub result_summary: String,

    pub success: bool,

    pub execution_time_ms: u64,

    pub agent_label: String,

    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build the audit record for a finished dispatch.
    pub fn from_result(result: &ToolResult) -> Self {
        Self {
            tool_name: result.tool_name.clone(),
            parameters: result.parameters.clone(),
            result_summary: result.summary(RESULT_SUMMARY_CHARS),
            success: result.success,
            execution_time_ms: result.execution_time_ms,
            agent_label: result.agent_label.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// The core MemoryRecorder trait.
///
/// Implementations: in-memory ring (testing, ephemeral sessions), JSONL file,
/// none (no-op). Safe for concurrent writers across conversations: each
/// `append` is a single atomic push.
#[async_trait]
pub trait MemoryRecorder: Send + Sync {
    /// The backend name (e.g., "file", "memory", "none").
    fn name(&self) -> &str;

    /// Append one record, evicting the oldest if the retention cap is hit.
    async fn append(&self, record: MemoryRecord) -> std::result::Result<(), MemoryError>;

    /// The most recent `limit` records, oldest first.
    async fn recent(&self, limit: usize) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Number of retained records.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;

    /// Drop all records.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}
