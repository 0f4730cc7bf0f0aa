//! Line oriented exporter for stdout or any other writer.

use super::{ExportError, Exporter};
use crate::BoxFuture;
use crate::output::OutputFormatter;
use crate::reading::Reading;
use std::io::{self, Write};
use tokio::sync::Mutex;

/// Writes one formatted line per reading.
pub struct WriterExporter<W> {
    name: String,
    formatter: Box<dyn OutputFormatter>,
    out: Mutex<W>,
}

impl WriterExporter<io::Stdout> {
    /// Exporter printing to the process' standard output.
    pub fn stdout(formatter: Box<dyn OutputFormatter>) -> Self {
        Self::new("stdout", formatter, io::stdout())
    }
}

impl<W: Write + Send> WriterExporter<W> {
    pub fn new(name: impl Into<String>, formatter: Box<dyn OutputFormatter>, out: W) -> Self {
        Self {
            name: name.into(),
            formatter,
            out: Mutex::new(out),
        }
    }

    /// Consume the exporter and return the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> Exporter for WriterExporter<W> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn export<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            if readings.is_empty() {
                return Err(ExportError::NoMeasurements);
            }
            let lines = readings
                .iter()
                .map(|reading| self.formatter.format(reading))
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = self.out.lock().await;
            for line in lines {
                writeln!(out, "{line}")?;
            }
            out.flush()?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ExportError>> {
        Box::pin(async move {
            self.out.lock().await.flush()?;
            Ok(())
        })
    }
}
