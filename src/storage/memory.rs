use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::traits::{IdentStore, LastKnownRecord, StoreError};

/// Non-durable ident store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIdentStore {
    records: Mutex<HashMap<String, LastKnownRecord>>,
    reject_writes: AtomicBool,
}

impl MemoryIdentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following mutation fail, as a full disk would.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LastKnownRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentStore for MemoryIdentStore {
    async fn record(&self, customer_ident: &str) -> Result<Option<LastKnownRecord>, StoreError> {
        Ok(self.lock().get(customer_ident).cloned())
    }

    async fn record_if_absent(
        &self,
        customer_ident: &str,
        document_ident: &str,
    ) -> Result<bool, StoreError> {
        let mut records = self.lock();
        if records.contains_key(customer_ident) {
            return Ok(false);
        }
        self.check_writable()?;
        records.insert(
            customer_ident.to_string(),
            LastKnownRecord {
                customer_ident: customer_ident.to_string(),
                document_ident: document_ident.to_string(),
                observed_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn update(&self, customer_ident: &str, document_ident: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().insert(
            customer_ident.to_string(),
            LastKnownRecord {
                customer_ident: customer_ident.to_string(),
                document_ident: document_ident.to_string(),
                observed_at: Utc::now(),
            },
        );
        Ok(())
    }
}
