//! # Paged Export
//!
//! Streams a keyset-paginated table into delimited text, optionally gzip
//! compressed, and delivers it to a local file or a multipart object upload
//! without ever holding more than one page in memory.
//!
//! The crate follows the **Hexagonal Architecture** (Ports and Adapters):
//! `domain` holds the data model and errors, `ports` the traits the pipeline
//! talks through, `application` the stages and the runner, and
//! `infrastructure` the Oracle, filesystem and object-store adapters.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use application::cancellation::CancellationToken;
pub use application::orchestrator::{run_export, ExportOrchestrator};
pub use domain::entities::{Destination, PipelineOptions, RunConfig, RunStats};
pub use domain::errors::{PipelineError, Stage};
