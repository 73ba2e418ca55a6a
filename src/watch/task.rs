use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use super::session::{WatchOutcome, WatchParams};
use crate::archive::{naming, ArchiveError, ArchivedFile, DownloadArchive};
use crate::source::{DocumentSource, SourceError};
use crate::storage::{IdentStore, StoreError};
use crate::types::{CustomerIdent, DocumentIdent};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("deadline reached while waiting for the document API")]
    Deadline,
}

impl WatchError {
    fn is_transient(&self) -> bool {
        matches!(self, WatchError::Source(e) if e.is_transient())
    }
}

enum Step {
    /// Nothing new yet; sleep and poll again.
    Unchanged,
    Saved(ArchivedFile),
}

/// Polls the document source for one customer until a new document shows up
/// or the deadline passes.
///
/// The first observation ever made for a customer only records a baseline;
/// a document is downloaded only when the source reports an ident different
/// from the stored one.
pub struct WatchTask {
    customer_ident: CustomerIdent,
    params: WatchParams,
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn IdentStore>,
    archive: Arc<DownloadArchive>,
}

impl WatchTask {
    pub fn new(
        customer_ident: impl Into<CustomerIdent>,
        params: WatchParams,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn IdentStore>,
        archive: Arc<DownloadArchive>,
    ) -> Self {
        Self {
            customer_ident: customer_ident.into(),
            params,
            source,
            store,
            archive,
        }
    }

    pub async fn run(self) -> WatchOutcome {
        let deadline = Instant::now() + self.params.wait;
        self.run_until(deadline).await
    }

    pub async fn run_until(self, deadline: Instant) -> WatchOutcome {
        let customer_ident = self.customer_ident.as_str();
        let mut attempts = 0u32;
        let mut announced: Option<DocumentIdent> = None;

        tracing::info!(
            customer_ident,
            wait_ms = self.params.wait.as_millis() as u64,
            poll_ms = self.params.poll.as_millis() as u64,
            "Watch started"
        );

        if !naming::ident_fits(customer_ident) {
            tracing::error!(customer_ident, "Customer ident too long for an archive file name");
            return WatchOutcome::Failed {
                error: "customer ident is too long for an archive file name".to_string(),
                attempts,
            };
        }

        while Instant::now() < deadline {
            attempts += 1;

            match self.poll_once(deadline, &mut announced).await {
                Ok(Step::Saved(file)) => {
                    tracing::info!(
                        customer_ident,
                        document_ident = %file.document_ident,
                        path = %file.path.display(),
                        attempt = attempts,
                        "Saved new document"
                    );
                    return WatchOutcome::Succeeded { file, attempts };
                }
                Ok(Step::Unchanged) => {}
                Err(WatchError::Deadline) => break,
                Err(e) if e.is_transient() => {
                    tracing::warn!(customer_ident, attempt = attempts, error = %e, "Transient error, retrying on next poll");
                }
                Err(e) => {
                    tracing::error!(customer_ident, attempt = attempts, error = %e, "Watch failed");
                    return WatchOutcome::Failed {
                        error: e.to_string(),
                        attempts,
                    };
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // Never sleep past the deadline
            tokio::time::sleep(self.params.poll.min(deadline - now)).await;
        }

        let last_known = match self.store.get(customer_ident).await {
            Ok(ident) => ident,
            Err(e) => {
                tracing::warn!(customer_ident, error = %e, "Could not read last known document");
                None
            }
        };

        tracing::info!(
            customer_ident,
            attempts,
            last_known = last_known.as_deref().unwrap_or("-"),
            "No new document before deadline"
        );
        WatchOutcome::TimedOut {
            last_known,
            attempts,
        }
    }

    async fn poll_once(
        &self,
        deadline: Instant,
        announced: &mut Option<DocumentIdent>,
    ) -> Result<Step, WatchError> {
        let customer_ident = self.customer_ident.as_str();

        let latest = bounded(deadline, self.source.fetch_latest_ident(customer_ident)).await??;

        if self.store.record_if_absent(customer_ident, &latest).await? {
            // First sighting ever: may be stale, so it becomes the baseline instead of a download
            tracing::info!(customer_ident, document_ident = %latest, "Recorded baseline document, waiting for a newer one");
            return Ok(Step::Unchanged);
        }

        if self.store.get(customer_ident).await?.as_deref() == Some(latest.as_str()) {
            if announced.as_deref() != Some(latest.as_str()) {
                tracing::info!(customer_ident, document_ident = %latest, "Latest document already known, waiting for a new one");
                *announced = Some(latest);
            }
            return Ok(Step::Unchanged);
        }

        let content = bounded(deadline, self.source.fetch_content(&latest)).await??;
        let file = self
            .archive
            .write(customer_ident, &latest, &content.bytes)
            .await?;

        if let Err(e) = self.store.update(customer_ident, &latest).await {
            // Without the ident advanced the new file must not stay current
            if let Err(discard_err) = self.archive.discard(&file).await {
                tracing::error!(customer_ident, path = %file.path.display(), error = %discard_err, "Could not remove unrecorded document");
            }
            return Err(e.into());
        }

        if let Err(e) = self.archive.prune(&file).await {
            tracing::warn!(customer_ident, error = %e, "Could not remove superseded documents; startup reconcile will");
        }

        Ok(Step::Saved(file))
    }
}

/// Run a source call, giving up when the deadline passes.
async fn bounded<T>(deadline: Instant, call: impl Future<Output = T>) -> Result<T, WatchError> {
    tokio::time::timeout_at(deadline, call)
        .await
        .map_err(|_| WatchError::Deadline)
}
