//! Reading sinks.
//!
//! An [`Exporter`] receives every reading the scanner decodes. Exporters are
//! independent of each other: the fan-out calls them one after another and a
//! failing exporter only affects its own delivery.

#[cfg(feature = "http")]
pub mod http;
pub mod stdout;

use crate::BoxFuture;
use crate::output::FormatError;
use crate::reading::Reading;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error type for exporter operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Export was called with an empty batch
    #[error("no measurements")]
    NoMeasurements,
    /// The export did not finish within the configured deadline
    #[error("export timed out after {0:?}")]
    Timeout(Duration),
    #[error("cannot format reading: {0}")]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The receiving end answered with a non-success status
    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
    /// The exporter was already closed
    #[error("exporter is closed")]
    Closed,
    /// The exporter cannot be built from the given settings
    #[error("invalid exporter configuration: {0}")]
    Config(String),
}

/// A named sink for readings.
pub trait Exporter: Send + Sync {
    /// Human readable name used in logs.
    fn name(&self) -> String;

    /// Deliver a batch of readings.
    ///
    /// # Errors
    /// [`ExportError::NoMeasurements`] for an empty batch; otherwise whatever
    /// the sink reports.
    fn export<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), ExportError>>;

    /// Release connections or flush buffers. Called once on shutdown.
    fn close(&self) -> BoxFuture<'_, Result<(), ExportError>> {
        Box::pin(async { Ok(()) })
    }
}
