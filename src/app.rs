//! Core application runner for `ruuvitag-collector`.
//!
//! This module is decoupled from process setup (logger, signals, exit codes)
//! so it can be tested with a fake device driver and a shutdown future that
//! completes on demand.

use crate::alias::Alias;
use crate::config::{ScannerConfig, parse_duration};
use crate::device::DeviceDriver;
use crate::exporter::stdout::WriterExporter;
use crate::exporter::{ExportError, Exporter};
use crate::output::influxdb::InfluxDbFormatter;
use crate::scanner::{Scanner, ScannerError};
use clap::Parser;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// How often to issue a scan command while the adapter is powered on.
    /// Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub interval: Duration,

    /// RuuviTag to read and the name to report it under. Repeatable.
    /// Without any, advertisements from every nearby device are decoded.
    /// Format: --device DE:AD:BE:EF:00:00=Sauna
    #[arg(long = "device", value_parser = crate::alias::parse_alias, value_name = "MAC=NAME")]
    pub devices: Vec<Alias>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ruuvi_measurement")]
    pub influxdb_measurement: String,

    /// Do not print readings to stdout.
    #[arg(long)]
    pub no_stdout: bool,

    /// POST every reading as JSON to this URL.
    #[arg(long, value_name = "URL")]
    pub http_url: Option<String>,

    /// Bearer token for the HTTP exporter.
    #[arg(long, env = "RUUVITAG_HTTP_TOKEN", hide_env_values = true)]
    pub http_token: Option<String>,

    /// Request timeout of the HTTP exporter.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub http_timeout: Duration,

    /// Give up on an exporter that takes longer than this for one reading.
    #[arg(long, value_parser = parse_duration)]
    pub export_timeout: Option<Duration>,

    /// Verbose output, log every reading and unparsable advertisement
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    /// Scanner settings carried by these options.
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            reporting_interval: self.interval,
            devices: self.devices.clone(),
            export_timeout: self.export_timeout,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scanner(#[from] ScannerError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("no exporters configured: drop --no-stdout or set --http-url")]
    NoExporters,
}

/// Build the exporters selected by `options`, stdout first.
pub fn build_exporters(options: &Options) -> Result<Vec<Arc<dyn Exporter>>, RunError> {
    let mut exporters: Vec<Arc<dyn Exporter>> = Vec::new();

    if !options.no_stdout {
        let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());
        exporters.push(Arc::new(WriterExporter::stdout(Box::new(formatter))));
    }

    if let Some(url) = &options.http_url {
        exporters.push(http_exporter(url, options)?);
    }

    if exporters.is_empty() {
        return Err(RunError::NoExporters);
    }
    Ok(exporters)
}

#[cfg(feature = "http")]
fn http_exporter(url: &str, options: &Options) -> Result<Arc<dyn Exporter>, ExportError> {
    let exporter = crate::exporter::http::HttpExporter::new(
        url,
        options.http_token.clone(),
        options.http_timeout,
    )?;
    Ok(Arc::new(exporter))
}

#[cfg(not(feature = "http"))]
fn http_exporter(_url: &str, _options: &Options) -> Result<Arc<dyn Exporter>, ExportError> {
    Err(ExportError::Config(
        "HTTP exporter not available (not compiled in)".into(),
    ))
}

/// Run until `shutdown` completes, exporting to the exporters selected by
/// `options`.
pub async fn run(
    options: Options,
    driver: Arc<dyn DeviceDriver>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let exporters = build_exporters(&options)?;
    run_with_exporters(&options.scanner_config(), driver, exporters, shutdown).await
}

/// Start a scanner, wait for `shutdown`, then stop it and close `exporters`.
///
/// Errors from constructing or starting the scanner are returned. Everything
/// after start-up, including failures to close an exporter, is only logged.
pub async fn run_with_exporters(
    config: &ScannerConfig,
    driver: Arc<dyn DeviceDriver>,
    exporters: Vec<Arc<dyn Exporter>>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    if exporters.is_empty() {
        return Err(RunError::NoExporters);
    }
    let names: Vec<String> = exporters.iter().map(|e| e.name()).collect();
    info!("Exporting readings to {}", names.join(", "));

    let scanner = Scanner::new(config, driver, exporters.clone())?;
    scanner.start().await?;

    shutdown.await;
    scanner.stop();

    for exporter in &exporters {
        if let Err(e) = exporter.close().await {
            warn!("Failed to close exporter {}: {e}", exporter.name());
        }
    }
    Ok(())
}
