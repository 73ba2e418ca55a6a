pub mod naming;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::storage::KeyedLocks;
use crate::types::{CustomerIdent, DocumentIdent};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ident: {0}")]
    InvalidIdent(String),

    #[error("written file {path} does not match downloaded content ({expected} bytes expected, {actual} on disk)")]
    VerificationFailed {
        path: String,
        expected: u64,
        actual: u64,
    },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// A document saved in the archive directory.
///
/// Serializes with the bare file name in place of the server-side path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedFile {
    pub customer_ident: CustomerIdent,
    pub document_ident: DocumentIdent,
    #[serde(rename = "fileName", serialize_with = "serialize_file_name")]
    pub path: PathBuf,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

impl ArchivedFile {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

fn serialize_file_name<S>(path: &PathBuf, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => serializer.serialize_some(name),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Customers with a current file after the pass.
    pub kept: usize,
    /// Superseded documents deleted.
    pub removed: usize,
    /// Leftovers of interrupted saves deleted.
    pub temp_removed: usize,
}

struct ScannedFile {
    file: ArchivedFile,
    modified: SystemTime,
}

/// Directory holding at most one current document per customer.
#[derive(Debug)]
pub struct DownloadArchive {
    dir: PathBuf,
    extension: String,
    locks: KeyedLocks,
}

impl DownloadArchive {
    pub async fn open(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        Ok(Self {
            dir,
            extension: extension.into(),
            locks: KeyedLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new document and remove every older file of the customer.
    ///
    /// The old file is only removed after the new one is in place and verified,
    /// so a crash leaves one or two files, never zero.
    pub async fn save(
        &self,
        customer_ident: &str,
        document_ident: &str,
        content: &[u8],
    ) -> Result<ArchivedFile> {
        let file = self.write(customer_ident, document_ident, content).await?;
        self.prune(&file).await?;
        Ok(file)
    }

    /// Write and verify a new document without touching existing files.
    pub async fn write(
        &self,
        customer_ident: &str,
        document_ident: &str,
        content: &[u8],
    ) -> Result<ArchivedFile> {
        validate_ident("customer", customer_ident)?;
        validate_ident("document", document_ident)?;

        let _customer = self.locks.lock(customer_ident).await;

        let saved_at = Utc::now();
        let final_name = naming::file_name(customer_ident, document_ident, saved_at, &self.extension);
        let final_path = self.dir.join(&final_name);
        let temp_path = self.dir.join(naming::temp_name(&final_name));

        if let Err(e) = write_synced(&temp_path, content).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(&temp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(&final_path, e));
        }

        if let Err(e) = verify(&final_path, content).await {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(e);
        }
        // The verified file is already in place
        if let Err(e) = sync_dir(&self.dir).await {
            tracing::warn!(path = %self.dir.display(), error = %e, "Could not flush archive directory");
        }

        tracing::debug!(
            customer_ident,
            document_ident,
            path = %final_path.display(),
            bytes = content.len(),
            "Wrote archive file"
        );

        Ok(ArchivedFile {
            customer_ident: customer_ident.to_string(),
            document_ident: document_ident.to_string(),
            path: final_path,
            size_bytes: content.len() as u64,
            saved_at,
        })
    }

    /// Delete every file of `keep`'s customer except `keep` itself.
    pub async fn prune(&self, keep: &ArchivedFile) -> Result<usize> {
        let _customer = self.locks.lock(&keep.customer_ident).await;

        let mut removed = 0;
        for scanned in self.scan().await? {
            if scanned.file.customer_ident == keep.customer_ident && scanned.file.path != keep.path {
                remove_if_present(&scanned.file.path).await?;
                tracing::info!(
                    customer_ident = %keep.customer_ident,
                    path = %scanned.file.path.display(),
                    "Removed superseded document"
                );
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove a file written by [`write`](Self::write) whose save was abandoned.
    pub async fn discard(&self, file: &ArchivedFile) -> Result<()> {
        let _customer = self.locks.lock(&file.customer_ident).await;
        remove_if_present(&file.path).await
    }

    /// The customer's current file, if any.
    pub async fn latest(&self, customer_ident: &str) -> Result<Option<ArchivedFile>> {
        let newest = self
            .scan()
            .await?
            .into_iter()
            .filter(|s| s.file.customer_ident == customer_ident)
            .max_by(|a, b| recency(a).cmp(&recency(b)));
        Ok(newest.map(|s| s.file))
    }

    /// All archive files, newest first.
    pub async fn list(&self) -> Result<Vec<ArchivedFile>> {
        let mut scanned = self.scan().await?;
        scanned.sort_by(|a, b| recency(b).cmp(&recency(a)));
        Ok(scanned.into_iter().map(|s| s.file).collect())
    }

    /// Enforce one file per customer, keeping the most recently modified one,
    /// and delete leftovers of interrupted saves. Running it again changes nothing.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let name = entry.file_name();
            // Only temp files of our own naming; anything else is left alone
            if naming::temp_target(&name.to_string_lossy(), &self.extension).is_some() {
                remove_if_present(&entry.path()).await?;
                tracing::info!(path = %entry.path().display(), "Removed interrupted download");
                report.temp_removed += 1;
            }
        }

        let mut by_customer: HashMap<String, Vec<ScannedFile>> = HashMap::new();
        for scanned in self.scan().await? {
            by_customer
                .entry(scanned.file.customer_ident.clone())
                .or_default()
                .push(scanned);
        }

        for (customer_ident, mut files) in by_customer {
            files.sort_by(|a, b| recency(b).cmp(&recency(a)));
            for old in files.iter().skip(1) {
                remove_if_present(&old.file.path).await?;
                tracing::info!(
                    customer_ident = %customer_ident,
                    path = %old.file.path.display(),
                    "Reconcile: removed superseded document"
                );
                report.removed += 1;
            }
            report.kept += 1;
        }

        tracing::info!(
            kept = report.kept,
            removed = report.removed,
            temp_removed = report.temp_removed,
            "Archive reconciled"
        );
        Ok(report)
    }

    async fn scan(&self) -> Result<Vec<ScannedFile>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let name = entry.file_name();
            let parsed = match naming::parse_file_name(&name.to_string_lossy(), &self.extension) {
                Some(parsed) => parsed,
                None => continue,
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // Removed between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&entry.path(), e)),
            };

            files.push(ScannedFile {
                file: ArchivedFile {
                    customer_ident: parsed.customer_ident,
                    document_ident: parsed.document_ident,
                    path: entry.path(),
                    size_bytes: metadata.len(),
                    saved_at: parsed.saved_at,
                },
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(files)
    }
}

/// Ordering key: modification time, then the timestamp in the name, then the name.
fn recency(scanned: &ScannedFile) -> (SystemTime, DateTime<Utc>, &Path) {
    (scanned.modified, scanned.file.saved_at, scanned.file.path.as_path())
}

fn validate_ident(kind: &str, ident: &str) -> Result<()> {
    if ident.trim().is_empty() {
        return Err(ArchiveError::InvalidIdent(format!("{} ident is empty", kind)));
    }
    if !naming::ident_fits(ident) {
        return Err(ArchiveError::InvalidIdent(format!(
            "{} ident is too long for a file name",
            kind
        )));
    }
    Ok(())
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

async fn verify(path: &Path, content: &[u8]) -> Result<()> {
    let on_disk = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
    if on_disk.len() != content.len() || Sha256::digest(&on_disk) != Sha256::digest(content) {
        return Err(ArchiveError::VerificationFailed {
            path: path.display().to_string(),
            expected: content.len() as u64,
            actual: on_disk.len() as u64,
        });
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn archive(dir: &TempDir) -> DownloadArchive {
        DownloadArchive::open(dir.path(), "pdf").await.unwrap()
    }

    fn dir_listing(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut listing: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().to_string_lossy().to_string(),
                    std::fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        listing.sort();
        listing
    }

    /// Place a file directly, bypassing `save`, with a given modification time.
    fn plant(dir: &Path, customer: &str, document: &str, age_secs: u64) -> PathBuf {
        let saved_at = Utc::now() - chrono::Duration::seconds(age_secs as i64);
        let path = dir.join(naming::file_name(customer, document, saved_at, "pdf"));
        std::fs::write(&path, document.as_bytes()).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_save_supersedes_previous_file() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir).await;

        let first = archive.save("abc", "v1", b"first").await.unwrap();
        let second = archive.save("abc", "v2", b"second").await.unwrap();

        assert!(!first.path.exists());
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
        assert_eq!(second.size_bytes, 6);

        let latest = archive.latest("abc").await.unwrap().unwrap();
        assert_eq!(latest.document_ident, "v2");
        assert_eq!(archive.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_customers_are_independent() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir).await;

        archive.save("abc", "v1", b"a").await.unwrap();
        archive.save("xyz", "d1", b"x").await.unwrap();

        assert_eq!(archive.list().await.unwrap().len(), 2);
        assert_eq!(
            archive.latest("xyz").await.unwrap().unwrap().document_ident,
            "d1"
        );
        assert_eq!(archive.latest("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_discard_keeps_old_file() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir).await;

        let old = archive.save("abc", "v1", b"old").await.unwrap();
        let staged = archive.write("abc", "v2", b"new").await.unwrap();
        assert_eq!(archive.list().await.unwrap().len(), 2);

        archive.discard(&staged).await.unwrap();
        assert_eq!(archive.latest("abc").await.unwrap().unwrap().path, old.path);
    }

    #[tokio::test]
    async fn test_invalid_ident_leaves_prior_file() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir).await;
        let old = archive.save("abc", "v1", b"old").await.unwrap();

        let err = archive.save("abc", "  ", b"new").await.unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidIdent(_)));
        assert!(old.path.exists());
        assert_eq!(archive.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overlong_ident_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir).await;
        let old = archive.save("abc", "v1", b"old").await.unwrap();

        let err = archive
            .save(&"kunde-ä".repeat(30), "v1", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidIdent(_)));

        let err = archive.save("abc", &"d".repeat(200), b"new").await.unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidIdent(_)));
        assert_eq!(dir_listing(dir.path()).len(), 1);
        assert!(old.path.exists());
    }

    #[test]
    fn test_archived_file_serialization() {
        let file = ArchivedFile {
            customer_ident: "abc".to_string(),
            document_ident: "v1".to_string(),
            path: PathBuf::from("/var/lib/docwatch/downloads/abc__v1__20250314T092653589Z.pdf"),
            size_bytes: 3,
            saved_at: Utc::now(),
        };

        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["customerIdent"], "abc");
        assert_eq!(json["documentIdent"], "v1");
        assert_eq!(json["sizeBytes"], 3);
        assert_eq!(json["fileName"], "abc__v1__20250314T092653589Z.pdf");
        assert!(json.get("path").is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_fails_save() {
        let dir = TempDir::new().unwrap();
        let archive = DownloadArchive::open(dir.path().join("downloads"), "pdf")
            .await
            .unwrap();
        std::fs::remove_dir(dir.path().join("downloads")).unwrap();

        let err = archive.save("abc", "v1", b"data").await.unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_newest_per_customer() {
        let dir = TempDir::new().unwrap();
        let oldest = plant(dir.path(), "abc", "v1", 300);
        let middle = plant(dir.path(), "abc", "v2", 200);
        let newest = plant(dir.path(), "abc", "v3", 100);
        let other = plant(dir.path(), "xyz", "d1", 500);
        std::fs::write(dir.path().join("readme.txt"), "not ours").unwrap();
        std::fs::write(dir.path().join(".abc__v4__20250101T000000000Z.pdf.tmp"), "partial").unwrap();
        std::fs::write(dir.path().join(".notes.tmp"), "someone else's").unwrap();

        let archive = archive(&dir).await;
        let report = archive.reconcile().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                kept: 2,
                removed: 2,
                temp_removed: 1
            }
        );
        assert!(!oldest.exists());
        assert!(!middle.exists());
        assert!(newest.exists());
        assert!(other.exists());
        assert!(dir.path().join("readme.txt").exists());
        assert!(dir.path().join(".notes.tmp").exists());
        assert!(!dir.path().join(".abc__v4__20250101T000000000Z.pdf.tmp").exists());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        plant(dir.path(), "abc", "v1", 300);
        plant(dir.path(), "abc", "v2", 100);
        plant(dir.path(), "xyz", "d1", 50);

        let archive = archive(&dir).await;
        archive.reconcile().await.unwrap();
        let after_first = dir_listing(dir.path());

        let report = archive.reconcile().await.unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.temp_removed, 0);
        assert_eq!(dir_listing(dir.path()), after_first);
    }

    #[tokio::test]
    async fn test_reconcile_prefers_mtime_over_name() {
        let dir = TempDir::new().unwrap();
        // Name claims it is newer, but the file was modified earlier
        let saved_at = Utc::now();
        let misleading = dir
            .path()
            .join(naming::file_name("abc", "v9", saved_at, "pdf"));
        std::fs::write(&misleading, "v9").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&misleading)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        let recent = plant(dir.path(), "abc", "v1", 10);

        let archive = archive(&dir).await;
        archive.reconcile().await.unwrap();

        assert!(recent.exists());
        assert!(!misleading.exists());
    }
}
