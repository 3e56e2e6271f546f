//! Append-only NDJSON record store, one file per client namespace.
//!
//! Each record becomes a single JSON line appended with an explicit flush.
//! The file is never truncated, rotated or compacted; retention belongs to
//! an external collaborator. Readers may observe one incomplete trailing
//! line mid-append and must tolerate it.

use crate::extract::ExtractionRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Name of the per-namespace history file.
pub const STORE_FILE: &str = "dashboard-history.ndjson";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open store {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to append to store {path}: {source}")]
    Append {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable append-only writer for extraction records.
pub struct RecordSink {
    data_dir: PathBuf,
}

impl RecordSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Path of a namespace's history file.
    pub fn store_path(&self, namespace: &str) -> PathBuf {
        self.data_dir.join(namespace).join(STORE_FILE)
    }

    /// Append one record as one JSON line, creating the file (and parent
    /// directories) on first use. The handle is held only for this write.
    pub fn append(&self, namespace: &str, record: &ExtractionRecord) -> Result<(), SinkError> {
        let path = self.store_path(namespace);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}").map_err(|source| SinkError::Append {
            path: path.clone(),
            source,
        })?;
        file.flush().map_err(|source| SinkError::Append {
            path: path.clone(),
            source,
        })?;

        debug!("appended record to {}", path.display());
        Ok(())
    }
}

/// Read every complete, parseable line of a store file.
///
/// Unparseable lines (including a possibly incomplete trailing line) are
/// skipped, matching what concurrent readers of an append-only store must
/// tolerate.
pub fn read_store(path: &Path) -> std::io::Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(name: &str) -> ExtractionRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert("Temperature".to_string(), "-18.4 °C".to_string());
        ExtractionRecord {
            timestamp: Utc::now().to_rfc3339(),
            asset_name: Some(name.to_string()),
            cartridge_location: None,
            serial_number: None,
            metrics,
        }
    }

    #[test]
    fn test_append_creates_namespace_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(dir.path());

        sink.append("client1", &record("Freezer 7")).unwrap();
        assert!(sink.store_path("client1").exists());
    }

    #[test]
    fn test_append_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(dir.path());

        sink.append("client1", &record("a")).unwrap();
        sink.append("client1", &record("b")).unwrap();
        sink.append("client1", &record("c")).unwrap();

        let lines = read_store(&sink.store_path("client1")).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[2].get("assetName").and_then(|v| v.as_str()),
            Some("c")
        );
    }

    #[test]
    fn test_lines_are_independent_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(dir.path());
        sink.append("client1", &record("a")).unwrap();
        sink.append("client1", &record("b")).unwrap();

        let raw = std::fs::read_to_string(sink.store_path("client1")).unwrap();
        for line in raw.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            let ts = value.get("timestamp").and_then(|v| v.as_str()).unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
            assert_eq!(
                value.get("Temperature").and_then(|v| v.as_str()),
                Some("-18.4 °C")
            );
        }
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(dir.path());
        sink.append("client1", &record("a")).unwrap();
        sink.append("client2", &record("b")).unwrap();

        assert_eq!(read_store(&sink.store_path("client1")).unwrap().len(), 1);
        assert_eq!(read_store(&sink.store_path("client2")).unwrap().len(), 1);
    }

    #[test]
    fn test_read_store_tolerates_incomplete_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(dir.path());
        sink.append("client1", &record("a")).unwrap();

        // Simulate a reader racing a writer mid-line.
        let path = sink.store_path("client1");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"timestamp\":\"2026-").unwrap();

        let lines = read_store(&path).unwrap();
        assert_eq!(lines.len(), 1);
    }
}
