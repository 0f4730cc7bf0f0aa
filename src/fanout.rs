//! Delivery of readings to every configured exporter.

use crate::exporter::{ExportError, Exporter};
use crate::reading::Reading;
use log::{debug, warn};
use std::slice;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Hands each reading to all exporters, isolating their failures.
#[derive(Clone)]
pub struct Fanout {
    exporters: Vec<Arc<dyn Exporter>>,
    export_timeout: Option<Duration>,
}

impl Fanout {
    pub fn new(exporters: Vec<Arc<dyn Exporter>>, export_timeout: Option<Duration>) -> Self {
        Self {
            exporters,
            export_timeout,
        }
    }

    pub fn exporters(&self) -> &[Arc<dyn Exporter>] {
        &self.exporters
    }

    /// Drain `readings` until `quit` is cancelled or every sender is gone.
    ///
    /// Quit takes priority over a waiting reading. An export already running
    /// when quit arrives is allowed to finish.
    pub async fn run(self, mut readings: mpsc::Receiver<Reading>, quit: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => {
                    debug!("Export loop quitting");
                    return;
                }
                reading = readings.recv() => match reading {
                    Some(reading) => self.dispatch(&reading).await,
                    None => {
                        debug!("Reading channel closed, export loop exiting");
                        return;
                    }
                },
            }
        }
    }

    /// Export one reading to every exporter in order.
    ///
    /// Failures are logged and do not stop the remaining exporters.
    pub async fn dispatch(&self, reading: &Reading) {
        debug!("Received measurement from sensor {}", reading.display_name());
        for exporter in &self.exporters {
            debug!("Exporting measurement to {}", exporter.name());
            if let Err(e) = self.export(exporter.as_ref(), reading).await {
                warn!(
                    "Failed to export measurement to {}: {e}",
                    exporter.name()
                );
            }
        }
    }

    async fn export(&self, exporter: &dyn Exporter, reading: &Reading) -> Result<(), ExportError> {
        let batch = slice::from_ref(reading);
        match self.export_timeout {
            Some(limit) => tokio::time::timeout(limit, exporter.export(batch))
                .await
                .unwrap_or(Err(ExportError::Timeout(limit))),
            None => exporter.export(batch).await,
        }
    }
}
