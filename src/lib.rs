// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod schedule;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::cache::NewsCache;
pub use crate::error::{IngestError, IngestResult, ProviderError};
pub use crate::pipeline::{Pipeline, RunOutcome};
pub use crate::provider::{ContentClient, GeminiClient};
pub use crate::schedule::Scheduler;
pub use crate::store::Store;
