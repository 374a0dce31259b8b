//! One-file-per-task persistence
//!
//! Records survive a control-plane restart; the age-based sweep is the only
//! thing that ever deletes them.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;
use crate::task::TaskRecord;

/// Disk-backed task record store
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the store directory if it is missing
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    /// Persist one record, overwriting any previous version
    pub async fn save(&self, record: &TaskRecord) -> Result<()> {
        let content = serde_json::to_vec_pretty(record)?;
        fs::write(self.record_path(&record.task_id), content).await?;
        Ok(())
    }

    /// Load one record; absence is `None`, not an error
    pub async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let path = self.record_path(task_id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Load every readable record; unreadable files are skipped with a
    /// warning so one corrupt record cannot break listings
    pub async fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(records);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<TaskRecord>(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable task record {}: {}", path.display(), e),
                },
                Err(e) => warn!("Skipping unreadable task record {}: {}", path.display(), e),
            }
        }

        Ok(records)
    }

    /// Remove one record; removing a missing record is a no-op
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let path = self.record_path(task_id);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Delete records created more than `days` days ago. Returns the ids
    /// of the removed records.
    pub async fn sweep_older_than(&self, days: u32) -> Result<Vec<String>> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut removed = Vec::new();

        for record in self.load_all().await? {
            if record.created_at < cutoff {
                self.remove(&record.task_id).await?;
                debug!("Swept task record {}", record.task_id);
                removed.push(record.task_id);
            }
        }

        Ok(removed)
    }
}
