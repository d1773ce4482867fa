use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type AlertResult<T> = std::result::Result<T, AlertError>;

/// Side channel for operational failures. Callers log and swallow sink
/// errors; an unreachable sink must never fail a handler.
#[async_trait]
pub trait AlertingSink: Send + Sync {
    async fn ingest_failure(&self, content_id: &str, error: &str) -> AlertResult<()>;
}

/// Appends one JSON object per line, matching the shape the on-call
/// tooling tails.
pub struct FileAlertingSink {
    path: PathBuf,
}

impl FileAlertingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AlertingSink for FileAlertingSink {
    async fn ingest_failure(&self, content_id: &str, error: &str) -> AlertResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let record = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "contentId": content_id,
            "error": error,
        });
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_json_line_per_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = FileAlertingSink::new(&path);
        sink.ingest_failure("c1", "engine unavailable").await.unwrap();
        sink.ingest_failure("unknown", "bad payload").await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["contentId"], "c1");
        assert_eq!(first["error"], "engine unavailable");
    }
}
