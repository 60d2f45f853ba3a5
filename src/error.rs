// src/error.rs
use thiserror::Error;

/// What went wrong while talking to the content provider. `NotConfigured`
/// is raised before any I/O when no credential is present.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("content provider API key not configured")]
    NotConfigured,
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned HTTP status {0}")]
    BadStatus(u16),
    #[error("provider returned an empty response")]
    Empty,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Request(e.to_string())
    }
}

/// Failure taxonomy of one job execution. Everything is caught at the
/// pipeline boundary and turned into a failed attempt log entry; nothing
/// propagates to the scheduler.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No credential; the run no-ops without touching store or cache.
    #[error("content provider not configured")]
    NotConfigured,
    /// External call failed; no records were produced.
    #[error("provider error: {0}")]
    Provider(String),
    /// Store write failed; the whole job execution was rolled back.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl From<ProviderError> for IngestError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotConfigured => IngestError::NotConfigured,
            other => IngestError::Provider(other.to_string()),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
