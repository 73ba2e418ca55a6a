use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{DocumentContent, DocumentSource, SourceError};
use crate::types::DocumentIdent;

/// In-memory document source for tests and local runs.
///
/// Each customer has at most one "latest" document. Errors can be queued per
/// customer (for ident lookups) or per document (for content fetches); a queued
/// error is returned once, in FIFO order, before normal answers resume.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<MemoryState>,
    ident_calls: AtomicUsize,
    content_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemoryState {
    latest: HashMap<String, DocumentIdent>,
    contents: HashMap<DocumentIdent, Vec<u8>>,
    ident_errors: HashMap<String, VecDeque<SourceError>>,
    content_errors: HashMap<DocumentIdent, VecDeque<SourceError>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `document_ident` as the newest document of `customer_ident`.
    pub fn publish(&self, customer_ident: &str, document_ident: &str, bytes: &[u8]) {
        let mut state = self.lock();
        state
            .latest
            .insert(customer_ident.to_string(), document_ident.to_string());
        state
            .contents
            .insert(document_ident.to_string(), bytes.to_vec());
    }

    pub fn fail_next_ident(&self, customer_ident: &str, error: SourceError) {
        self.lock()
            .ident_errors
            .entry(customer_ident.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_next_content(&self, document_ident: &str, error: SourceError) {
        self.lock()
            .content_errors
            .entry(document_ident.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn ident_calls(&self) -> usize {
        self.ident_calls.load(Ordering::SeqCst)
    }

    pub fn content_calls(&self) -> usize {
        self.content_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the maps half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn fetch_latest_ident(&self, customer_ident: &str) -> Result<DocumentIdent, SourceError> {
        self.ident_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if let Some(error) = state
            .ident_errors
            .get_mut(customer_ident)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        state
            .latest
            .get(customer_ident)
            .cloned()
            .ok_or_else(|| SourceError::NoDocuments(customer_ident.to_string()))
    }

    async fn fetch_content(&self, document_ident: &str) -> Result<DocumentContent, SourceError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if let Some(error) = state
            .content_errors
            .get_mut(document_ident)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let bytes = state.contents.get(document_ident).cloned().ok_or_else(|| {
            SourceError::Status {
                status: 404,
                message: format!("file {} not found", document_ident),
            }
        })?;

        Ok(DocumentContent { bytes })
    }
}
