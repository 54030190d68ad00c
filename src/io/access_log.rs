//! Access log persistence
//!
//! Entries are written in JSONL format (one JSON object per line). The file
//! store keeps a per-vehicle index of the most recent entry so the entry/exit
//! decision never rescans the file.

use crate::domain::types::{new_uuid_v7, AccessLogEntry, StoredAccessLog, VehicleId};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[async_trait]
pub trait AccessLogStore: Send + Sync {
    /// Persist an entry and return its assigned ID
    async fn append(&self, entry: &AccessLogEntry) -> anyhow::Result<String>;

    /// Most recent entry for the vehicle, by timestamp
    async fn find_latest(&self, vehicle_id: &VehicleId) -> anyhow::Result<Option<StoredAccessLog>>;
}

/// Keep the newer of two entries for the per-vehicle index
fn index_latest(index: &mut FxHashMap<VehicleId, StoredAccessLog>, stored: &StoredAccessLog) {
    let Some(vehicle_id) = &stored.entry.vehicle_id else {
        return;
    };
    match index.get(vehicle_id) {
        Some(existing) if existing.entry.timestamp > stored.entry.timestamp => {}
        _ => {
            index.insert(vehicle_id.clone(), stored.clone());
        }
    }
}

/// In-memory access log
#[derive(Default)]
pub struct MemoryAccessLog {
    entries: Mutex<Vec<StoredAccessLog>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<StoredAccessLog> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AccessLogStore for MemoryAccessLog {
    async fn append(&self, entry: &AccessLogEntry) -> anyhow::Result<String> {
        let id = new_uuid_v7();
        self.entries.lock().push(StoredAccessLog { id: id.clone(), entry: entry.clone() });
        Ok(id)
    }

    async fn find_latest(&self, vehicle_id: &VehicleId) -> anyhow::Result<Option<StoredAccessLog>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|s| s.entry.vehicle_id.as_ref() == Some(vehicle_id))
            .max_by_key(|s| s.entry.timestamp)
            .cloned())
    }
}

/// JSONL-file access log
pub struct JsonlAccessLog {
    path: PathBuf,
    latest: Mutex<FxHashMap<VehicleId, StoredAccessLog>>,
    /// Serializes appends so lines never interleave
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAccessLog {
    /// Open the log, rebuilding the per-vehicle index from existing lines
    pub async fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut latest = FxHashMap::default();
        let mut lines = 0usize;

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (lineno, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoredAccessLog>(line) {
                        Ok(stored) => {
                            index_latest(&mut latest, &stored);
                            lines += 1;
                        }
                        Err(e) => {
                            warn!(line = %(lineno + 1), error = %e, "access_log_line_skipped");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read access log {}", path.display()))
            }
        }

        info!(
            path = %path.display(),
            entries = %lines,
            vehicles = %latest.len(),
            "access_log_opened"
        );

        Ok(Self { path, latest: Mutex::new(latest), write_lock: tokio::sync::Mutex::new(()) })
    }

    async fn append_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open access log {}", self.path.display()))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await.context("Failed to write access log line")?;
        file.flush().await.context("Failed to flush access log")?;
        Ok(())
    }
}

#[async_trait]
impl AccessLogStore for JsonlAccessLog {
    async fn append(&self, entry: &AccessLogEntry) -> anyhow::Result<String> {
        let stored = StoredAccessLog { id: new_uuid_v7(), entry: entry.clone() };
        let line = serde_json::to_string(&stored).context("Failed to serialize access log entry")?;

        let _guard = self.write_lock.lock().await;
        self.append_line(&line).await?;
        index_latest(&mut self.latest.lock(), &stored);

        debug!(id = %stored.id, bytes = %line.len(), "access_log_written");
        Ok(stored.id)
    }

    async fn find_latest(&self, vehicle_id: &VehicleId) -> anyhow::Result<Option<StoredAccessLog>> {
        Ok(self.latest.lock().get(vehicle_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AccessAction;
    use chrono::{DateTime, Duration, Utc};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn entry(vehicle: Option<&str>, action: AccessAction, at: DateTime<Utc>) -> AccessLogEntry {
        AccessLogEntry {
            plate_detected: "XYZ999".to_string(),
            vehicle_id: vehicle.map(VehicleId::from),
            action,
            status: "GRANTED".to_string(),
            denial_reason: None,
            gate: "Main Gate".to_string(),
            timestamp: at,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_memory_find_latest_by_timestamp() {
        let log = MemoryAccessLog::new();
        let v1 = VehicleId::from("v1");

        log.append(&entry(Some("v1"), AccessAction::Entry, t0() + Duration::seconds(60)))
            .await
            .unwrap();
        log.append(&entry(Some("v1"), AccessAction::Exit, t0())).await.unwrap();
        log.append(&entry(None, AccessAction::Entry, t0() + Duration::seconds(120)))
            .await
            .unwrap();

        let latest = log.find_latest(&v1).await.unwrap().unwrap();
        assert_eq!(latest.entry.action, AccessAction::Entry);
        assert_eq!(log.len(), 3);
        assert!(log.find_latest(&VehicleId::from("v9")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_jsonl_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("access.jsonl");
        let v1 = VehicleId::from("v1");

        let log = JsonlAccessLog::open(&path).await.unwrap();
        let first = log.append(&entry(Some("v1"), AccessAction::Entry, t0())).await.unwrap();
        let second = log
            .append(&entry(Some("v1"), AccessAction::Exit, t0() + Duration::seconds(90)))
            .await
            .unwrap();
        assert_ne!(first, second);

        let latest = log.find_latest(&v1).await.unwrap().unwrap();
        assert_eq!(latest.id, second);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["id"], first.as_str());
        assert_eq!(parsed["action"], "Entry");

        drop(log);
        let reopened = JsonlAccessLog::open(&path).await.unwrap();
        let latest = reopened.find_latest(&v1).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.entry.action, AccessAction::Exit);
    }

    #[tokio::test]
    async fn test_jsonl_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.jsonl");
        let good = StoredAccessLog { id: "a".to_string(), entry: entry(Some("v1"), AccessAction::Entry, t0()) };
        let content = format!("not json\n\n{}\n", serde_json::to_string(&good).unwrap());
        std::fs::write(&path, content).unwrap();

        let log = JsonlAccessLog::open(&path).await.unwrap();
        let latest = log.find_latest(&VehicleId::from("v1")).await.unwrap().unwrap();
        assert_eq!(latest.id, "a");
    }

    #[tokio::test]
    async fn test_jsonl_open_fails_on_directory_path() {
        let dir = tempdir().unwrap();
        assert!(JsonlAccessLog::open(dir.path()).await.is_err());
    }
}
