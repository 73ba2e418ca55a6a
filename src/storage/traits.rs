use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CustomerIdent, DocumentIdent};

/// Last document observed for one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastKnownRecord {
    pub customer_ident: CustomerIdent,
    pub document_ident: DocumentIdent,
    pub observed_at: DateTime<Utc>,
}

/// Durable mapping from customer to last observed document.
///
/// Every mutation is durable before it returns. Mutations for one customer
/// are serialized; different customers do not wait on each other beyond the
/// write of the backing file.
#[async_trait]
pub trait IdentStore: Send + Sync {
    async fn record(&self, customer_ident: &str) -> Result<Option<LastKnownRecord>, StoreError>;

    async fn get(&self, customer_ident: &str) -> Result<Option<DocumentIdent>, StoreError> {
        Ok(self
            .record(customer_ident)
            .await?
            .map(|record| record.document_ident))
    }

    /// Store `document_ident` only if the customer has no record yet.
    /// Returns true when this call created the record (a baseline observation).
    async fn record_if_absent(
        &self,
        customer_ident: &str,
        document_ident: &str,
    ) -> Result<bool, StoreError>;

    /// Overwrite the customer's record. Only called after a confirmed download.
    async fn update(&self, customer_ident: &str, document_ident: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported state file version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("state store write rejected: {0}")]
    WriteRejected(String),
}
