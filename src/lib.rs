// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::bootstrap::IngestRuntime;
pub use crate::error::{IngestError, StoreError};
