//! Append-only audit log as JSON lines.

use std::path::{Path, PathBuf};

use orgperm_core::AuditEntryId;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::audit::{log_appended, AuditEntry, AuditEntryInput, AuditFilter, AuditStore};
use crate::error::Result;
use crate::storage::RetryPolicy;

/// Audit store appending one JSON object per line.
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    retry: RetryPolicy,
    entries: RwLock<Vec<AuditEntry>>,
}

impl FileAuditStore {
    /// Loads existing entries from `path`.
    ///
    /// A torn trailing line (from a crash mid-append) is skipped.
    pub async fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if index + 1 == lines.len() => {
                    warn!(target: "orgperm", path = %path.display(), error = %e, "Skipping torn audit line");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            path,
            retry,
            entries: RwLock::new(entries),
        })
    }

    async fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line).await?;
        file.sync_data().await
    }
}

#[async_trait::async_trait]
impl AuditStore for FileAuditStore {
    async fn append(&self, input: AuditEntryInput) -> Result<AuditEntry> {
        let entry = input.into_entry();
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut entries = self.entries.write().await;
        self.retry
            .run("append audit entry", || Self::append_line(&self.path, &line))
            .await?;
        entries.push(entry.clone());
        log_appended(&entry);
        Ok(entry)
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(filter.apply(entries.iter()))
    }

    async fn get(&self, id: AuditEntryId) -> Result<Option<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }
}
