//! service-core: shared infrastructure for the civic-chat workspace.
//!
//! Error type, configuration loading, tracing setup and retry with backoff.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
