use std::fmt::Display;

use thiserror::Error;

/// Failure taxonomy shared by every stage of the retrieval pipeline.
///
/// Rerank and single-category failures are not represented here: they are
/// absorbed by their stage and surfaced as flags on the response instead.
/// The type is `Clone` so one in-flight result can be handed to every
/// coalesced caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Index write failed: {0}")]
    IndexWrite(String),

    #[error("Embedding mismatch: index expects {expected}, got {found}")]
    EmbeddingMismatch { expected: String, found: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Request cancelled before completion")]
    Cancelled,
}

impl Error {
    pub fn unavailable(cause: impl Display) -> Self {
        Self::IndexUnavailable(cause.to_string())
    }

    pub fn write(cause: impl Display) -> Self {
        Self::IndexWrite(cause.to_string())
    }

    /// Retryable errors leave the process and the index in a usable state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_) | Self::IndexWrite(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
