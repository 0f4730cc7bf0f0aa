//! Text formats for readings.
//!
//! Formatters turn a [`Reading`] into one line of text. The stdout exporter
//! uses them; further formats (JSON lines, CSV) slot in beside InfluxDB.

pub mod influxdb;

use crate::reading::Reading;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Line protocol needs at least one field
    #[error("data point {0} has no fields")]
    NoFields(String),
}

/// Trait for formatting readings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading, without a trailing newline.
    fn format(&self, reading: &Reading) -> Result<String, FormatError>;
}
