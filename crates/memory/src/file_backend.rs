//! File-based recorder: persistent JSON-lines audit log.
//!
//! Each line is one JSON-encoded `MemoryRecord`. Appends write a single line;
//! the file is rewritten only to compact it once it has grown to twice the
//! retention cap.
//!
//! Storage location: `~/.seqpilot/audit/tool_calls.jsonl`

use async_trait::async_trait;
use seqpilot_core::error::MemoryError;
use seqpilot_core::memory::{MemoryRecord, MemoryRecorder};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct State {
    /// Retained records, oldest first
    records: VecDeque<MemoryRecord>,
    /// Lines currently in the file, including evicted ones
    file_lines: usize,
}

/// A file-backed recorder using JSONL (one JSON object per line).
///
/// Records are loaded into memory on creation. Writers are serialised by a
/// mutex so concurrent conversations never interleave partial lines.
pub struct FileRecorder {
    path: PathBuf,
    retention: usize,
    state: Mutex<State>,
}

impl FileRecorder {
    /// Open (or lazily create) the log at `path`.
    pub fn new(path: PathBuf, retention: usize) -> Self {
        let retention = retention.max(1);
        let loaded = Self::load_from_disk(&path);
        let file_lines = loaded.len();
        let skip = loaded.len().saturating_sub(retention);
        let records: VecDeque<MemoryRecord> = loaded.into_iter().skip(skip).collect();
        debug!(path = %path.display(), count = records.len(), "Audit log loaded");
        Self {
            path,
            retention,
            state: Mutex::new(State {
                records,
                file_lines,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records from a JSONL file, skipping corrupted lines.
    fn load_from_disk(path: &Path) -> Vec<MemoryRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // File doesn't exist yet
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted audit record");
                    None
                }
            })
            .collect()
    }

    fn ensure_parent(&self) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create audit directory: {e}"))
            })?;
        }
        Ok(())
    }

    fn append_line(&self, line: &str) -> Result<(), MemoryError> {
        self.ensure_parent()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open audit log: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| MemoryError::Storage(format!("Failed to write audit log: {e}")))
    }

    /// Rewrite the file with exactly the retained records.
    fn rewrite(&self, records: &VecDeque<MemoryRecord>) -> Result<(), MemoryError> {
        self.ensure_parent()?;
        let mut content = String::new();
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| {
                MemoryError::Storage(format!("Failed to serialize audit record: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write audit log: {e}")))
    }
}

#[async_trait]
impl MemoryRecorder for FileRecorder {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize audit record: {e}")))?;

        let mut state = self.state.lock().await;
        self.append_line(&line)?;
        state.file_lines += 1;

        while state.records.len() >= self.retention {
            state.records.pop_front();
        }
        state.records.push_back(record);

        if state.file_lines >= self.retention * 2 {
            debug!(path = %self.path.display(), kept = state.records.len(), "Compacting audit log");
            self.rewrite(&state.records)?;
            state.file_lines = state.records.len();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let state = self.state.lock().await;
        let skip = state.records.len().saturating_sub(limit);
        Ok(state.records.iter().skip(skip).cloned().collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.state.lock().await.records.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        let mut state = self.state.lock().await;
        state.records.clear();
        self.rewrite(&state.records)?;
        state.file_lines = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record(tool: &str) -> MemoryRecord {
        let mut params = serde_json::Map::new();
        params.insert("region".into(), serde_json::json!("chr1:1-1000"));
        MemoryRecord {
            tool_name: tool.into(),
            parameters: params,
            result_summary: "ok".into(),
            success: true,
            execution_time_ms: 7,
            agent_label: "seqpilot".into(),
            timestamp: Utc::now(),
        }
    }

    fn temp_path() -> PathBuf {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp); // Close file so the recorder can use it
        path
    }

    #[tokio::test]
    async fn append_persists_across_reload() {
        let path = temp_path();
        let mem = FileRecorder::new(path.clone(), 100);
        mem.append(record("navigate")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("chr1:1-1000"));
        assert_eq!(content.lines().count(), 1);

        let mem2 = FileRecorder::new(path, 100);
        let recent = mem2.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tool_name, "navigate");
    }

    #[tokio::test]
    async fn compaction_keeps_newest() {
        let path = temp_path();
        let mem = FileRecorder::new(path.clone(), 3);
        for i in 0..6 {
            mem.append(record(&format!("tool_{i}"))).await.unwrap();
        }
        assert_eq!(mem.count().await.unwrap(), 3);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);

        let reloaded = FileRecorder::new(path, 3);
        let names: Vec<String> = reloaded
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.tool_name)
            .collect();
        assert_eq!(names, vec!["tool_3", "tool_4", "tool_5"]);
    }

    #[tokio::test]
    async fn clear_persists() {
        let path = temp_path();
        let mem = FileRecorder::new(path.clone(), 10);
        mem.append(record("a")).await.unwrap();
        mem.append(record("b")).await.unwrap();
        mem.clear().await.unwrap();

        let mem2 = FileRecorder::new(path, 10);
        assert_eq!(mem2.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("tool_calls.jsonl");
        let mem = FileRecorder::new(path.clone(), 10);
        mem.append(record("a")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "{}", serde_json::to_string(&record("valid")).unwrap()).unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(tmp, "{}", serde_json::to_string(&record("also_valid")).unwrap()).unwrap();
        let path = tmp.path().to_path_buf();

        let mem = FileRecorder::new(path, 10);
        assert_eq!(mem.count().await.unwrap(), 2);
    }
}
