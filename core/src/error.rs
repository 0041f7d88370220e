//! Error taxonomy shared by every stage of the retrieval and consensus pipeline.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FuseError>;

#[derive(Debug, Error)]
pub enum FuseError {
    /// No persisted index at the location; callers recover by building one.
    #[error("no index found at {0}")]
    IndexNotFound(String),

    /// A fusion input entry was not a ranked list. Skipped by batch callers.
    #[error("malformed fusion input for query {query_id}: {reason}")]
    MalformedFusionInput { query_id: String, reason: String },

    #[error("query relaxation exhausted for {0:?}")]
    RelaxationExhausted(String),

    /// Judge output could not be mapped onto one of the candidates.
    #[error("consensus extraction failed for query {query_id}: {reason}")]
    ConsensusExtraction { query_id: String, reason: String },

    #[error("external collaborator {service} failed: {message}")]
    ExternalCollaborator { service: String, message: String },

    #[error("{service} call timed out after {elapsed:?}")]
    Timeout { service: String, elapsed: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FuseError {
    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalCollaborator { service: service.into(), message: message.to_string() }
    }

    pub fn extraction(query_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConsensusExtraction { query_id: query_id.into(), reason: reason.into() }
    }

    /// Transient collaborator failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalCollaborator { .. } | Self::Timeout { .. })
    }
}
