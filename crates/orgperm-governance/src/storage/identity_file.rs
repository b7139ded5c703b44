//! Identity catalogue persisted as a single JSON document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use orgperm_core::normalize_email;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::services::identity::{IdentityRecord, IdentityStore};
use crate::storage::{write_atomic, RetryPolicy};
use crate::types::IdentitySource;

type RecordKey = (IdentitySource, String);

/// Identity store rewriting `identities.json` on every mutation.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    retry: RetryPolicy,
    records: RwLock<BTreeMap<RecordKey, IdentityRecord>>,
    revision: AtomicU64,
}

impl FileIdentityStore {
    /// Opens the document at `path`, starting empty when it does not exist.
    pub async fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<IdentityRecord> = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(target: "orgperm", path = %path.display(), records = records.len(), "Identity catalogue loaded");

        Ok(Self {
            path,
            retry,
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| ((r.source, r.external_id.clone()), r))
                    .collect(),
            ),
            revision: AtomicU64::new(1),
        })
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<RecordKey, IdentityRecord>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&records.values().collect::<Vec<_>>())?;
        self.retry
            .run("write identity catalogue", || write_atomic(&self.path, &bytes))
            .await
    }
}

#[async_trait::async_trait]
impl IdentityStore for FileIdentityStore {
    async fn upsert(&self, record: IdentityRecord) -> Result<Option<IdentityRecord>> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let previous = next.insert((record.source, record.external_id.clone()), record);

        self.persist(&next).await?;
        *records = next;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(previous)
    }

    async fn get(
        &self,
        source: IdentitySource,
        external_id: &str,
    ) -> Result<Option<IdentityRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(source, external_id.to_string())).cloned())
    }

    async fn list_all(&self) -> Result<Vec<IdentityRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove_for_email_except(
        &self,
        email: &str,
        keep: IdentitySource,
    ) -> Result<Vec<IdentityRecord>> {
        let email = normalize_email(email);
        let mut records = self.records.write().await;

        let (removed, kept): (Vec<_>, Vec<_>) = records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .partition(|(_, r)| r.source != keep && r.normalized_email() == email);
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let next: BTreeMap<_, _> = kept.into_iter().collect();
        self.persist(&next).await?;
        *records = next;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(removed.into_iter().map(|(_, r)| r).collect())
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
