//! `ruuvitag-collector` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logger setup
//! and process exit codes. The [`scanner::Scanner`] drives a radio
//! [`device::Device`], decodes RuuviTag advertisements and hands every reading
//! to the configured [`exporter::Exporter`]s through the [`fanout::Fanout`].
//! [`app`] wires these together from command line options.

use std::future::Future;
use std::pin::Pin;

pub mod alias;
pub mod app;
pub mod config;
pub mod decoder;
pub mod device;
pub mod exporter;
pub mod fanout;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod test_utils;

/// Boxed future returned by the object-safe driver and exporter traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Re-export commonly used types at the crate root
pub use alias::{Alias, DeviceRegistry, parse_alias};
pub use config::{ScannerConfig, parse_duration};
pub use decoder::DecodeError;
pub use device::{Device, DeviceDriver, DeviceError, PowerState};
pub use exporter::{ExportError, Exporter};
pub use mac_address::MacAddress;
pub use output::{FormatError, OutputFormatter};
pub use output::influxdb::InfluxDbFormatter;
pub use reading::{Reading, SensorValues};
pub use scanner::{Scanner, ScannerError};
