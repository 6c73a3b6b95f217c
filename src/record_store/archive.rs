//! JSON file archive for violators and reports
//!
//! Layout: `<dir>/violators/<record_id>.json`, `<dir>/reports/<report_id>.json`.
//! Files are created exclusively; an existing file is left untouched.

use crate::risk_engine::{Report, ViolatorRecord};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// File archive rooted at one directory
#[derive(Debug, Clone)]
pub struct FileArchive {
    dir: PathBuf,
}

impl FileArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive a violator record with its image evidence
    pub async fn store_violator(&self, violator: &ViolatorRecord) {
        self.store("violators", &violator.record_id, violator).await;
    }

    pub async fn store_report(&self, report: &Report) {
        self.store("reports", &report.report_id, report).await;
    }

    async fn store<T: Serialize>(&self, kind: &str, id: &str, value: &T) {
        if let Err(e) = self.write_exclusive(kind, id, value).await {
            tracing::error!(kind = %kind, id = %id, error = %e, "Failed to archive record");
        }
    }

    async fn write_exclusive<T: Serialize>(
        &self,
        kind: &str,
        id: &str,
        value: &T,
    ) -> crate::error::Result<()> {
        let folder = self.dir.join(kind);
        fs::create_dir_all(&folder).await?;

        let body = serde_json::to_vec(value)?;
        let path = folder.join(format!("{}.json", id));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), "Record archived");
        Ok(())
    }
}
