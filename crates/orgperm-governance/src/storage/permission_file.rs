//! Permission records persisted as one JSON document per department.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use orgperm_core::DepartmentId;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::services::permission_store::{
    check_remove, prepare_save, PermissionRecord, PermissionStore,
};
use crate::storage::{write_atomic, RetryPolicy};

/// Permission store writing `<dir>/<department-id>.json`.
#[derive(Debug)]
pub struct FilePermissionStore {
    dir: PathBuf,
    retry: RetryPolicy,
    records: RwLock<BTreeMap<DepartmentId, PermissionRecord>>,
}

impl FilePermissionStore {
    /// Loads every `*.json` document under `dir`, creating it if missing.
    pub async fn open(dir: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut records = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            let record: PermissionRecord = serde_json::from_slice(&raw)?;
            records.insert(record.department_id.clone(), record);
        }
        debug!(target: "orgperm", dir = %dir.display(), records = records.len(), "Permission records loaded");

        Ok(Self {
            dir,
            retry,
            records: RwLock::new(records),
        })
    }

    fn document_path(&self, department: &DepartmentId) -> PathBuf {
        self.dir.join(format!("{department}.json"))
    }
}

#[async_trait::async_trait]
impl PermissionStore for FilePermissionStore {
    async fn get(&self, department: &DepartmentId) -> Result<Option<PermissionRecord>> {
        Ok(self.records.read().await.get(department).cloned())
    }

    async fn list(&self) -> Result<Vec<PermissionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, record: PermissionRecord, expected_version: u64) -> Result<PermissionRecord> {
        let mut records = self.records.write().await;
        let saved = prepare_save(records.get(&record.department_id), record, expected_version)?;

        let path = self.document_path(&saved.department_id);
        let bytes = serde_json::to_vec_pretty(&saved)?;
        self.retry
            .run("write permission record", || write_atomic(&path, &bytes))
            .await?;

        records.insert(saved.department_id.clone(), saved.clone());
        Ok(saved)
    }

    async fn remove(&self, department: &DepartmentId, expected_version: u64) -> Result<()> {
        let mut records = self.records.write().await;
        check_remove(records.get(department), department, expected_version)?;
        if records.get(department).is_none() {
            return Ok(());
        }

        let path = self.document_path(department);
        self.retry
            .run("remove permission record", || tokio::fs::remove_file(&path))
            .await?;

        records.remove(department);
        Ok(())
    }
}
