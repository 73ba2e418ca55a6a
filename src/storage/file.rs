use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::keyed::KeyedLocks;
use super::traits::{IdentStore, LastKnownRecord, StoreError};
use crate::types::DocumentIdent;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    records: BTreeMap<String, StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    document_ident: DocumentIdent,
    observed_at: DateTime<Utc>,
}

/// Ident store backed by a single JSON file.
///
/// The file is rewritten through a temp file and a rename on every mutation,
/// and the in-memory view only changes once the new file is in place.
#[derive(Debug)]
pub struct FileIdentStore {
    path: PathBuf,
    records: RwLock<HashMap<String, LastKnownRecord>>,
    write_lock: Mutex<()>,
    customer_locks: KeyedLocks,
}

impl FileIdentStore {
    /// Open the store at `path`, loading existing records. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_state(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(io_error(&path, e)),
        };

        tracing::info!(path = %path.display(), customers = records.len(), "Loaded ident store");

        Ok(Self {
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
            customer_locks: KeyedLocks::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Write `record` to disk, then publish it in memory.
    async fn persist(&self, record: LastKnownRecord) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;

        let mut snapshot: BTreeMap<String, StoredRecord> = self
            .records
            .read()
            .await
            .iter()
            .map(|(customer, r)| (customer.clone(), stored(r)))
            .collect();
        snapshot.insert(record.customer_ident.clone(), stored(&record));

        let state = StateFile {
            version: CURRENT_VERSION,
            records: snapshot,
        };
        write_atomic(&self.path, &state).await?;

        self.records
            .write()
            .await
            .insert(record.customer_ident.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl IdentStore for FileIdentStore {
    async fn record(&self, customer_ident: &str) -> Result<Option<LastKnownRecord>, StoreError> {
        Ok(self.records.read().await.get(customer_ident).cloned())
    }

    async fn record_if_absent(
        &self,
        customer_ident: &str,
        document_ident: &str,
    ) -> Result<bool, StoreError> {
        let _customer = self.customer_locks.lock(customer_ident).await;

        if self.records.read().await.contains_key(customer_ident) {
            return Ok(false);
        }

        self.persist(LastKnownRecord {
            customer_ident: customer_ident.to_string(),
            document_ident: document_ident.to_string(),
            observed_at: Utc::now(),
        })
        .await?;

        tracing::debug!(customer_ident, document_ident, "Recorded baseline document");
        Ok(true)
    }

    async fn update(&self, customer_ident: &str, document_ident: &str) -> Result<(), StoreError> {
        let _customer = self.customer_locks.lock(customer_ident).await;

        self.persist(LastKnownRecord {
            customer_ident: customer_ident.to_string(),
            document_ident: document_ident.to_string(),
            observed_at: Utc::now(),
        })
        .await?;

        tracing::debug!(customer_ident, document_ident, "Updated last known document");
        Ok(())
    }
}

fn stored(record: &LastKnownRecord) -> StoredRecord {
    StoredRecord {
        document_ident: record.document_ident.clone(),
        observed_at: record.observed_at,
    }
}

fn parse_state(path: &Path, bytes: &[u8]) -> Result<HashMap<String, LastKnownRecord>, StoreError> {
    let state: StateFile = serde_json::from_slice(bytes).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;

    if state.version != CURRENT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: state.version,
            expected: CURRENT_VERSION,
        });
    }

    Ok(state
        .records
        .into_iter()
        .map(|(customer_ident, r)| {
            let record = LastKnownRecord {
                customer_ident: customer_ident.clone(),
                document_ident: r.document_ident,
                observed_at: r.observed_at,
            };
            (customer_ident, record)
        })
        .collect())
}

async fn write_atomic(path: &Path, state: &StateFile) -> Result<(), StoreError> {
    let payload = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let staged: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = staged {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_error(path, e));
    }

    // The rename already committed the new state
    if let Err(e) = sync_parent_dir(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Could not flush state directory");
    }
    Ok(())
}

/// Flush the directory entry so the rename itself survives a crash.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
