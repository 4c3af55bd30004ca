//! Error types for the Numa assistant core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, NumaError>;

#[derive(Error, Debug)]
pub enum NumaError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Audio could not be transcribed to usable text")]
    UnintelligibleAudio,

    #[error("Deadline exceeded during {0}")]
    Timeout(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid concept: {0}")]
    InvalidConcept(String),

    // =============================
    // Ledger Errors
    // =============================

    #[error("Transaction is not in provisional state: {0}")]
    NotProvisional(String),

    /// Covers both a missing row and a cross-owner access attempt,
    /// so existence is never leaked across tenants.
    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Owner not found")]
    UnknownOwner,

    #[error("A merchant is required before a transaction can be verified")]
    MissingMerchant,

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    // =============================
    // Provider / Storage Errors
    // =============================

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NumaError {
    /// Short machine-readable kind carried by error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            NumaError::UnintelligibleAudio => "unintelligible_audio",
            NumaError::Timeout(_) => "timeout",
            NumaError::InvalidAmount(_) => "invalid_amount",
            NumaError::InvalidConcept(_) => "invalid_concept",
            NumaError::NotProvisional(_) => "not_provisional",
            NumaError::TransactionNotFound => "not_found",
            NumaError::UnknownOwner => "not_found",
            NumaError::MissingMerchant => "missing_merchant",
            NumaError::DuplicateEmail(_) => "duplicate_email",
            NumaError::ProviderError(_) => "provider_error",
            NumaError::StorageError(_) => "storage_error",
            NumaError::SerializationError(_) => "serialization_error",
            NumaError::HttpError(_) => "provider_error",
            NumaError::UuidError(_) => "bad_request",
            NumaError::IoError(_) => "io_error",
        }
    }
}
