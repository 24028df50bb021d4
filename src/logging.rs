//! Usage ledger: one record per finished request, kept in a ring buffer and
//! optionally appended to a JSONL file so it survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::translate::openai_types::ChatUsage;
use crate::vendors::Vendor;

const MAX_LEDGER_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub vendor: Vendor,
    pub model_id: String,
    pub stream: bool,
    pub outcome: Outcome,
    pub usage: ChatUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageRecord {
    pub fn completed(
        model: impl Into<String>,
        vendor: Vendor,
        model_id: impl Into<String>,
        stream: bool,
        usage: ChatUsage,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.into(),
            vendor,
            model_id: model_id.into(),
            stream,
            outcome: Outcome::Completed,
            usage,
            error: None,
        }
    }

    /// A failed call. `usage` is whatever was counted before the failure.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = Outcome::Failed;
        self.error = Some(error.into());
        self
    }
}

/// Ring buffer of usage records, mirrored to JSONL when a file is given.
pub struct Logger {
    entries: VecDeque<UsageRecord>,
    file_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl Logger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_LEDGER_ENTRIES);
        // Lines on disk that will not survive in memory: unreadable or pushed out of the ring.
        let mut stale = 0usize;

        if file_path.exists() {
            let reader = BufReader::new(File::open(&file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                match serde_json::from_str::<UsageRecord>(&line) {
                    Ok(entry) => {
                        if entries.len() >= MAX_LEDGER_ENTRIES {
                            entries.pop_front();
                            stale += 1;
                        }
                        entries.push_back(entry);
                    }
                    Err(_) => stale += 1,
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        let mut logger = Self {
            entries,
            file_path: Some(file_path),
            writer: Some(BufWriter::new(file)),
        };

        if stale > 0 {
            tracing::info!(stale, kept = logger.entries.len(), "Compacting usage ledger");
            logger.compact()?;
        }

        Ok(logger)
    }

    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            file_path: None,
            writer: None,
        }
    }

    pub fn record(&mut self, entry: UsageRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                if let Err(e) = writeln!(writer, "{}", json).and_then(|()| writer.flush()) {
                    tracing::warn!(error = %e, "Failed to append usage record");
                }
            }
        }
        if self.entries.len() >= MAX_LEDGER_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file with only the entries still in memory.
    fn compact(&mut self) -> std::io::Result<()> {
        let Some(ref file_path) = self.file_path else {
            return Ok(());
        };

        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            writeln!(writer, "{}", serde_json::to_string(entry)?)?;
        }
        writer.flush()?;

        let file = OpenOptions::new().append(true).open(file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::from_logger(Logger::new(file_path)?))
    }

    pub fn in_memory() -> Self {
        Self::from_logger(Logger::in_memory())
    }

    fn from_logger(logger: Logger) -> Self {
        Self(Arc::new(Mutex::new(logger)))
    }

    pub fn record(&self, entry: UsageRecord) {
        if let Ok(mut logger) = self.0.lock() {
            logger.record(entry);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(model: &str, prompt: u64) -> UsageRecord {
        UsageRecord::completed(
            model,
            Vendor::Nova,
            "us.amazon.nova-lite-v1:0",
            false,
            ChatUsage::new(prompt, 1),
        )
    }

    #[test]
    fn test_recent_is_newest_first() {
        let ledger = SharedLogger::in_memory();
        ledger.record(record("a", 1));
        ledger.record(record("b", 2));
        ledger.record(record("c", 3));

        let recent = ledger.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model, "c");
        assert_eq!(recent[1].model, "b");
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage").join("ledger.jsonl");

        {
            let ledger = SharedLogger::new(&path).unwrap();
            ledger.record(record("amazon.nova-lite", 10));
            ledger.record(record("amazon.nova-lite", 20).failed("throttled"));
        }

        let reopened = SharedLogger::new(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome, Outcome::Failed);
        assert_eq!(recent[0].error.as_deref(), Some("throttled"));
        assert_eq!(recent[1].usage.total_tokens, 11);
    }

    #[test]
    fn test_reopen_drops_unreadable_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let good = serde_json::to_string(&record("m", 1)).unwrap();
        std::fs::write(&path, format!("not json\n{good}\n{{\"half\":\n")).unwrap();

        let ledger = SharedLogger::new(&path).unwrap();
        assert_eq!(ledger.recent(10).len(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(!content.contains("not json"));

        ledger.record(record("m", 2));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_reopen_trims_file_to_ring_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let line = serde_json::to_string(&record("m", 1)).unwrap();
        let mut content = String::new();
        for _ in 0..MAX_LEDGER_ENTRIES + 3 {
            content.push_str(&line);
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();

        let ledger = SharedLogger::new(&path).unwrap();
        assert_eq!(ledger.recent(usize::MAX).len(), MAX_LEDGER_ENTRIES);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), MAX_LEDGER_ENTRIES);
    }

    #[test]
    fn test_clean_file_is_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let line = serde_json::to_string(&record("m", 1)).unwrap();
        std::fs::write(&path, format!("{line}\n")).unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let ledger = SharedLogger::new(&path).unwrap();
        assert_eq!(ledger.recent(10).len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
    }
}
