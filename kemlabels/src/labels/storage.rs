//! On-disk label files, one directory per user under a shared root.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::archive::sanitize_component;
use crate::types::abbrev_uuid;

/// Result of a storage sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: u64,
    pub dirs_removed: u64,
}

#[derive(Debug, Clone)]
pub struct LabelStorage {
    root: PathBuf,
}

impl LabelStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one user's labels: the sanitized email plus a digest of the
    /// exact address, so emails that sanitize alike still get separate directories.
    pub fn user_dir(&self, email: &str) -> PathBuf {
        let email = email.to_ascii_lowercase();
        let digest = hex::encode(Sha256::digest(email.as_bytes()));
        self.root.join(format!("{}_{}", sanitize_component(&email), &digest[..12]))
    }

    /// Store a single label as `<timestamp>_label_<tracking>.pdf`.
    #[instrument(skip(self, email, pdf), fields(bytes = pdf.len()), err)]
    pub async fn store_label(&self, email: &str, tracking_number: &str, pdf: &[u8]) -> io::Result<PathBuf> {
        let name = format!("{}_label_{}.pdf", timestamp(), sanitize_component(tracking_number));
        self.write(email, &name, pdf).await
    }

    /// Store a bulk order archive as `<timestamp>_bulk_labels_<id>.zip`.
    #[instrument(skip(self, email, archive), fields(bytes = archive.len()), err)]
    pub async fn store_bulk_archive(&self, email: &str, archive: &[u8]) -> io::Result<PathBuf> {
        let name = format!("{}_bulk_labels_{}.zip", timestamp(), abbrev_uuid(&Uuid::new_v4()));
        self.write(email, &name, archive).await
    }

    async fn write(&self, email: &str, name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let dir = self.user_dir(email);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        fs::write(&path, contents).await?;
        debug!(path = %path.display(), "Stored label file");
        Ok(path)
    }

    /// Delete every file under the root, then any directories left empty.
    ///
    /// The root itself is kept. A missing root is an empty sweep.
    #[instrument(skip(self), fields(root = %self.root.display()), err)]
    pub async fn sweep(&self) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        if !fs::try_exists(&self.root).await? {
            return Ok(report);
        }

        let mut pending = vec![self.root.clone()];
        let mut dirs = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path.clone());
                    dirs.push(path);
                } else {
                    fs::remove_file(&path).await?;
                    report.files_deleted += 1;
                }
            }
        }

        // Deepest first so parents are empty by the time they are visited
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            if fs::remove_dir(&dir).await.is_ok() {
                report.dirs_removed += 1;
            }
        }

        Ok(report)
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}
