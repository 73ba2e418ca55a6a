pub mod memory;
pub mod nitrobox;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::DocumentIdent;

pub use memory::MemorySource;
pub use nitrobox::NitroboxSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no documents found for customer '{0}'")]
    NoDocuments(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl SourceError {
    /// Whether the same call may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => !e.is_decode() && !e.is_builder(),
            SourceError::Status { status, .. } => {
                matches!(status, 401 | 403 | 408 | 429) || *status >= 500
            }
            SourceError::Auth(_) | SourceError::Transient(_) => true,
            SourceError::NoDocuments(_)
            | SourceError::Malformed(_)
            | SourceError::InvalidUrl(_)
            | SourceError::Permanent(_) => false,
        }
    }
}

/// Binary content of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContent {
    pub bytes: Vec<u8>,
}

/// The third-party document API as seen by watch tasks.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Identifier of the most recent document for a customer.
    async fn fetch_latest_ident(&self, customer_ident: &str) -> Result<DocumentIdent, SourceError>;

    async fn fetch_content(&self, document_ident: &str) -> Result<DocumentContent, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| SourceError::Status {
            status,
            message: String::new(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(status(401).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_domain_errors_are_permanent() {
        assert!(!SourceError::NoDocuments("abc".into()).is_transient());
        assert!(!SourceError::Malformed("missing ident".into()).is_transient());
        assert!(SourceError::Auth("token".into()).is_transient());
    }
}
