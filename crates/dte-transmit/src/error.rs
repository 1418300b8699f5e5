//! # Transmission Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Transmission Error Categories                        │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Upstream     │  │       Issuance          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Validation             │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Document               │ │
//! │  │  ConfigLoad     │  │  Rejected       │  │  Signing                │ │
//! │  │  ConfigSave     │  │  InvalidResponse│  │  DeadlineExceeded       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                               │
//! │  │    Database     │  │    Internal     │                               │
//! │  │                 │  │                 │                               │
//! │  │  Database(Db)   │  │  ChannelError   │                               │
//! │  │                 │  │  ShuttingDown   │                               │
//! │  └─────────────────┘  └─────────────────┘                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use dte_core::{CoreError, ValidationErrors};
use dte_db::DbError;
use thiserror::Error;

/// Result type alias for transmission operations.
pub type TransmitResult<T> = Result<T, TransmitError>;

/// Errors raised while issuing or transmitting documents.
#[derive(Debug, Error)]
pub enum TransmitError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// The authority could not be reached.
    #[error("Upstream connection failed: {0}")]
    Connection(String),

    /// The authority did not answer in time.
    #[error("Upstream timeout after {0:?}")]
    Timeout(Duration),

    /// The authority answered but refused the document.
    ///
    /// ## When This Occurs
    /// - Signature or schema problems detected upstream
    /// - Duplicate generation code
    ///
    /// Retrying the same payload will not help.
    #[error("Rejected by authority: {observation}")]
    Rejected { observation: String },

    /// The authority answered with something we cannot interpret.
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Issuance Errors
    // =========================================================================
    /// The document failed business validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Assembly or control number errors.
    #[error(transparent)]
    Document(CoreError),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// The whole create call ran out of time before committing.
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    // =========================================================================
    // Database Errors
    // =========================================================================
    #[error(transparent)]
    Database(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Transmission engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for TransmitError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(errors) => TransmitError::Validation(errors),
            other => TransmitError::Document(other),
        }
    }
}

impl From<url::ParseError> for TransmitError {
    fn from(err: url::ParseError) -> Self {
        TransmitError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for TransmitError {
    fn from(err: std::io::Error) -> Self {
        TransmitError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for TransmitError {
    fn from(err: toml::de::Error) -> Self {
        TransmitError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for TransmitError {
    fn from(err: toml::ser::Error) -> Self {
        TransmitError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for TransmitError {
    fn from(err: serde_json::Error) -> Self {
        TransmitError::InvalidResponse(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl TransmitError {
    /// Returns true if the operation can be retried as is.
    ///
    /// ## Retryable Errors
    /// - Upstream connection failures and timeouts
    /// - Busy or exhausted database
    ///
    /// ## Non-Retryable Errors
    /// - Authority rejections
    /// - Validation, configuration and signing errors
    pub fn is_retryable(&self) -> bool {
        match self {
            TransmitError::Connection(_) | TransmitError::Timeout(_) => true,
            TransmitError::Database(db) => db.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the failure says the authority is unavailable, which
    /// is what trips the circuit breaker.
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(
            self,
            TransmitError::Connection(_)
                | TransmitError::Timeout(_)
                | TransmitError::InvalidResponse(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TransmitError::InvalidConfig(_)
                | TransmitError::InvalidUrl(_)
                | TransmitError::ConfigLoadFailed(_)
                | TransmitError::ConfigSaveFailed(_)
        )
    }
}
