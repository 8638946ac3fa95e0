//! In-memory recorder: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use seqpilot_core::error::MemoryError;
use seqpilot_core::memory::{MemoryRecord, MemoryRecorder};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// A bounded ring of records. The oldest record is evicted once
/// `retention` is reached.
pub struct InMemoryRecorder {
    records: RwLock<VecDeque<MemoryRecord>>,
    retention: usize,
}

impl InMemoryRecorder {
    pub fn new(retention: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[async_trait]
impl MemoryRecorder for InMemoryRecorder {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        while records.len() >= self.retention {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        let skip = records.len().saturating_sub(limit);
        Ok(records.iter().skip(skip).cloned().collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.records.read().await.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.records.write().await.clear();
        Ok(())
    }
}
