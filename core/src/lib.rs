//! Shared plumbing for the connector service: error taxonomy, retry policy,
//! layered configuration, and telemetry bootstrap.

pub mod backoff;
pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{Config, SourceConfig};
pub use error::{Error, Result};
