//! Error types for the Custodia lifecycle engine.
//!
//! This module provides a unified error type [`CustodiaError`] for all
//! operations, along with a convenient [`Result`] type alias.
//!
//! Two failure classes deliberately do NOT appear here: integrity mismatches
//! and invalid signatures. Both are legitimate, expected outcomes of
//! verification and are persisted as state on the affected record so they
//! survive across sweeps and stay queryable.
//!
//! # Example
//!
//! ```rust
//! use custodia::error::{CustodiaError, Result};
//!
//! fn check_entity_type(entity_type: &str) -> Result<()> {
//!     if entity_type.trim().is_empty() {
//!         return Err(CustodiaError::Validation("entity type cannot be empty".into()));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for Custodia operations.
#[derive(Error, Debug)]
pub enum CustodiaError {
    // Facade input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Retention already registered for {entity_type}/{entity_id}")]
    DuplicateEntity {
        entity_type: String,
        entity_id: String,
    },

    // Backup and storage errors
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Cryptography errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodiaError {
    /// HTTP status code for facade responses.
    pub fn status_code(&self) -> u16 {
        match self {
            CustodiaError::Validation(_)
            | CustodiaError::DuplicateEntity { .. }
            | CustodiaError::BackupFailed(_)
            | CustodiaError::Crypto(_)
            | CustodiaError::Serialization(_)
            | CustodiaError::Config(_)
            | CustodiaError::InvalidConfig { .. } => 400,
            CustodiaError::NotFound(_) => 404,
            CustodiaError::Storage(_)
            | CustodiaError::Io(_)
            | CustodiaError::Network(_)
            | CustodiaError::Internal(_) => 500,
        }
    }

    /// Check if the operation is worth retrying on a later sweep.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CustodiaError::BackupFailed(_)
                | CustodiaError::Storage(_)
                | CustodiaError::Io(_)
                | CustodiaError::Network(_)
        )
    }
}

impl From<serde_json::Error> for CustodiaError {
    fn from(e: serde_json::Error) -> Self {
        CustodiaError::Serialization(e.to_string())
    }
}

/// Result type alias for Custodia operations.
pub type Result<T> = std::result::Result<T, CustodiaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CustodiaError::Validation("x".into()).status_code(), 400);
        assert_eq!(CustodiaError::NotFound("x".into()).status_code(), 404);
        assert_eq!(CustodiaError::Internal("x".into()).status_code(), 500);
        assert_eq!(
            CustodiaError::DuplicateEntity {
                entity_type: "WoundAssessment".into(),
                entity_id: "1".into()
            }
            .status_code(),
            400
        );
    }

    #[test]
    fn test_retryable() {
        assert!(CustodiaError::BackupFailed("disk full".into()).is_retryable());
        assert!(!CustodiaError::Validation("bad input".into()).is_retryable());
    }
}
