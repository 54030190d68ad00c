//! In-app notification records
//!
//! Records are appended in JSONL format for the notification CRUD service to
//! pick up. `MemoryNotificationSink` keeps them in a vector instead.

use crate::domain::types::new_uuid_v7;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(user_id: &str, title: &str, message: &str, kind: &str) -> Self {
        Self {
            id: new_uuid_v7(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user_id: &str, title: &str, message: &str, kind: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryNotificationSink {
    records: Mutex<Vec<NotificationRecord>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn send(&self, user_id: &str, title: &str, message: &str, kind: &str) -> anyhow::Result<()> {
        self.records.lock().push(NotificationRecord::new(user_id, title, message, kind));
        Ok(())
    }
}

pub struct JsonlNotificationSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlNotificationSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: tokio::sync::Mutex::new(()) }
    }
}

#[async_trait]
impl NotificationSink for JsonlNotificationSink {
    async fn send(&self, user_id: &str, title: &str, message: &str, kind: &str) -> anyhow::Result<()> {
        let record = NotificationRecord::new(user_id, title, message, kind);
        let mut line = serde_json::to_string(&record).context("Failed to serialize notification")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open notifications file {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await.context("Failed to write notification")?;
        file.flush().await?;

        debug!(id = %record.id, user_id = %user_id, "notification_written");
        Ok(())
    }
}
