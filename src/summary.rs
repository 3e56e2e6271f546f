//! Chart-ready digest of the history store.
//!
//! Runs after every completed cycle. Reads the namespace's NDJSON history,
//! groups records by asset, and writes a per-asset digest (latest values
//! plus record counts) next to the store. The digest is rewritten whole on
//! each run, atomically via tmp + rename, so readers never see a partial
//! file. A missing or empty store is not an error.

use crate::sink::{read_store, STORE_FILE};
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

/// Digest file name, written next to the history store.
pub const SUMMARY_FILE: &str = "chart-summary.json";

/// Record keys that are identity rather than metrics.
const META_KEYS: [&str; 4] = ["timestamp", "assetName", "cartridgeLocation", "serialNumber"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub records: usize,
    pub assets: usize,
}

/// Regenerates the chart digest for one client namespace.
pub struct Summarizer {
    namespace_dir: PathBuf,
}

impl Summarizer {
    pub fn new(data_dir: impl Into<PathBuf>, client: &str) -> Self {
        Self {
            namespace_dir: data_dir.into().join(client),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.namespace_dir.join(SUMMARY_FILE)
    }

    /// Rebuild the digest from the store. Tolerates a store that does not
    /// exist yet or holds no parseable lines.
    pub fn regenerate(&self) -> Result<SummaryStats> {
        let store = self.namespace_dir.join(STORE_FILE);
        if !store.exists() {
            info!("no history yet at {}; skipping digest", store.display());
            return Ok(SummaryStats::default());
        }

        let records = read_store(&store)
            .with_context(|| format!("failed to read store {}", store.display()))?;
        if records.is_empty() {
            info!("history at {} is empty; skipping digest", store.display());
            return Ok(SummaryStats::default());
        }

        let mut by_asset: Vec<(String, Vec<&Value>)> = Vec::new();
        for record in &records {
            let name = record
                .get("assetName")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown Asset")
                .to_string();
            match by_asset.iter_mut().find(|(n, _)| *n == name) {
                Some((_, list)) => list.push(record),
                None => by_asset.push((name, vec![record])),
            }
        }

        let mut digest = Map::new();
        for (name, asset_records) in &by_asset {
            // Lines are appended in time order; the last one is current.
            let latest = asset_records[asset_records.len() - 1];

            let mut metrics = Map::new();
            if let Some(obj) = latest.as_object() {
                for (key, value) in obj {
                    if !META_KEYS.contains(&key.as_str()) {
                        metrics.insert(key.clone(), value.clone());
                    }
                }
            }

            digest.insert(
                name.clone(),
                json!({
                    "totalRecords": asset_records.len(),
                    "latestTimestamp": latest.get("timestamp").cloned().unwrap_or(Value::Null),
                    "location": field_or_na(latest, "cartridgeLocation"),
                    "serial": field_or_na(latest, "serialNumber"),
                    "metrics": Value::Object(metrics),
                }),
            );
        }

        self.write_atomic(&Value::Object(digest))?;

        let stats = SummaryStats {
            records: records.len(),
            assets: by_asset.len(),
        };
        info!(
            "digest rebuilt: {} asset(s) from {} record(s)",
            stats.assets, stats.records
        );
        Ok(stats)
    }

    fn write_atomic(&self, digest: &Value) -> Result<()> {
        let path = self.summary_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(digest)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move digest into place at {}", path.display()))?;
        Ok(())
    }
}

fn field_or_na(record: &Value, key: &str) -> Value {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Value::String(s.clone()),
        _ => {
            // Keep the N/A convention downstream chart code expects.
            Value::String("N/A".to_string())
        }
    }
}

/// Convenience used at the cycle boundary: failures are logged, never
/// propagated into the loop's control flow.
pub fn regenerate_logged(summarizer: &Summarizer) {
    if let Err(e) = summarizer.regenerate() {
        warn!("digest regeneration failed: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use std::io::Write;

    fn write_store(dir: &std::path::Path, client: &str, lines: &[&str]) {
        let ns = dir.join(client);
        std::fs::create_dir_all(&ns).unwrap();
        let mut f = std::fs::File::create(ns.join(STORE_FILE)).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[test]
    fn test_missing_store_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = Summarizer::new(dir.path(), "client1");
        let stats = summarizer.regenerate().unwrap();
        assert_eq!(stats, SummaryStats::default());
        assert!(!summarizer.summary_path().exists());
    }

    #[test]
    fn test_digest_groups_by_asset_and_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            "client1",
            &[
                r#"{"timestamp":"2026-08-04T10:00:00Z","assetName":"Freezer 7","cartridgeLocation":"Cold room B","serialNumber":"SN-1138","Temperature":"-17.9 °C"}"#,
                r#"{"timestamp":"2026-08-04T11:00:00Z","assetName":"Freezer 7","cartridgeLocation":"Cold room B","serialNumber":"SN-1138","Temperature":"-18.4 °C"}"#,
                r#"{"timestamp":"2026-08-04T11:00:05Z","assetName":"Incubator 2","Humidity":"41%"}"#,
            ],
        );

        let summarizer = Summarizer::new(dir.path(), "client1");
        let stats = summarizer.regenerate().unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.assets, 2);

        let digest: Value =
            serde_json::from_str(&std::fs::read_to_string(summarizer.summary_path()).unwrap())
                .unwrap();

        assert_json_eq!(
            digest.get("Freezer 7").unwrap().clone(),
            serde_json::json!({
                "totalRecords": 2,
                "latestTimestamp": "2026-08-04T11:00:00Z",
                "location": "Cold room B",
                "serial": "SN-1138",
                "metrics": { "Temperature": "-18.4 °C" }
            })
        );
        assert_json_eq!(
            digest.get("Incubator 2").unwrap().clone(),
            serde_json::json!({
                "totalRecords": 1,
                "latestTimestamp": "2026-08-04T11:00:05Z",
                "location": "N/A",
                "serial": "N/A",
                "metrics": { "Humidity": "41%" }
            })
        );
    }

    #[test]
    fn test_unparseable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            "client1",
            &[
                r#"{"timestamp":"2026-08-04T10:00:00Z","assetName":"Freezer 7"}"#,
                r#"{"timestamp":"2026-"#,
            ],
        );

        let stats = Summarizer::new(dir.path(), "client1").regenerate().unwrap();
        assert_eq!(stats.records, 1);
    }

    #[test]
    fn test_records_without_name_group_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            "client1",
            &[r#"{"timestamp":"2026-08-04T10:00:00Z","Voltage":"3.3 V"}"#],
        );

        let summarizer = Summarizer::new(dir.path(), "client1");
        summarizer.regenerate().unwrap();
        let digest: Value =
            serde_json::from_str(&std::fs::read_to_string(summarizer.summary_path()).unwrap())
                .unwrap();
        assert!(digest.get("Unknown Asset").is_some());
    }
}
