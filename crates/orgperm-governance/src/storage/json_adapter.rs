//! Identity source adapter reading a JSON export.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::services::identity::{IdentityRecord, IdentitySourceAdapter};
use crate::types::IdentitySource;

/// One entry of an export file. Everything but `email` is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedRecord {
    #[serde(default)]
    source: Option<IdentitySource>,
    #[serde(default)]
    external_id: Option<String>,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
}

/// Reads a JSON array of records exported from one identity source.
///
/// Entries without a `source` are attributed to the adapter's source;
/// entries without an `externalId` use their email.
#[derive(Debug, Clone)]
pub struct JsonFileAdapter {
    source: IdentitySource,
    path: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(source: IdentitySource, path: impl AsRef<Path>) -> Self {
        Self {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl IdentitySourceAdapter for JsonFileAdapter {
    fn source(&self) -> IdentitySource {
        self.source
    }

    async fn fetch_records(&self) -> Result<Vec<IdentityRecord>> {
        let raw = tokio::fs::read(&self.path).await?;
        let exported: Vec<ExportedRecord> = serde_json::from_slice(&raw)?;
        let now = Utc::now();

        Ok(exported
            .into_iter()
            .map(|r| IdentityRecord {
                source: r.source.unwrap_or(self.source),
                external_id: r.external_id.unwrap_or_else(|| r.email.trim().to_string()),
                display_name: r.display_name.unwrap_or_default(),
                department: r.department,
                job_title: r.job_title,
                is_active: r.is_active.unwrap_or(true),
                last_seen: r.last_seen.unwrap_or(now),
                email: r.email,
            })
            .collect())
    }
}
