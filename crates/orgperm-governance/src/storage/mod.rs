//! File-backed storage.
//!
//! All documents are JSON and written temp-then-rename, so a crash never
//! leaves a half-written document behind. In-memory views are updated only
//! after the write is durable.

pub mod audit_file;
pub mod identity_file;
pub mod json_adapter;
pub mod permission_file;
pub mod retry;

use std::path::{Path, PathBuf};

pub use audit_file::FileAuditStore;
pub use identity_file::FileIdentityStore;
pub use json_adapter::JsonFileAdapter;
pub use permission_file::FilePermissionStore;
pub use retry::RetryPolicy;

/// Writes `bytes` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
