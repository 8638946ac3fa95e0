//! No-op recorder: disables the audit log entirely.

use async_trait::async_trait;
use seqpilot_core::error::MemoryError;
use seqpilot_core::memory::{MemoryRecord, MemoryRecorder};

/// A recorder that keeps nothing.
pub struct NoopRecorder;

#[async_trait]
impl MemoryRecorder for NoopRecorder {
    fn name(&self) -> &str {
        "none"
    }

    async fn append(&self, _record: MemoryRecord) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
