//! Audit recorders for seqpilot tool invocations.

pub mod analysis;
pub mod file_backend;
pub mod in_memory;
pub mod noop;

pub use analysis::{AuditSummary, ToolStats, summarize};
pub use file_backend::FileRecorder;
pub use in_memory::InMemoryRecorder;
pub use noop::NoopRecorder;

use seqpilot_config::AppConfig;
use seqpilot_core::memory::MemoryRecorder;
use std::sync::Arc;

/// Build the recorder selected by `[memory] backend`.
pub fn recorder_from_config(config: &AppConfig) -> Arc<dyn MemoryRecorder> {
    match config.memory.backend.as_str() {
        "memory" => Arc::new(InMemoryRecorder::new(config.memory.retention)),
        "none" => Arc::new(NoopRecorder),
        "file" => Arc::new(FileRecorder::new(
            config.audit_log_path(),
            config.memory.retention,
        )),
        other => {
            tracing::warn!(backend = %other, "Unknown memory backend, falling back to in-memory");
            Arc::new(InMemoryRecorder::new(config.memory.retention))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection() {
        let mut config = AppConfig::default();
        config.memory.backend = "none".into();
        assert_eq!(recorder_from_config(&config).name(), "none");

        config.memory.backend = "memory".into();
        assert_eq!(recorder_from_config(&config).name(), "memory");

        config.memory.backend = "sqlite".into();
        assert_eq!(recorder_from_config(&config).name(), "memory");
    }
}
