//! Scanner lifecycle.
//!
//! A [`Scanner`] owns the connection between a radio [`Device`] and the
//! configured exporters:
//!
//! ```text
//! Created --start--> Started --PoweredOn--> scanning
//!                       ^                      |
//!                       +------PoweredOff------+   (stop scan, re-init once)
//! ```
//!
//! While powered on a scan loop issues a scan command immediately and then
//! once per reporting interval. Discovered advertisements are decoded in the
//! discovery callback and handed through a single-slot channel to the
//! [`Fanout`] task, which exports them. [`Scanner::stop`] cancels the quit
//! token shared by both tasks.

use crate::BoxFuture;
use crate::alias::{DeviceRegistry, InvalidDeviceId};
use crate::config::ScannerConfig;
use crate::decoder::{self, DecodeError};
use crate::device::{
    Advertisement, Device, DeviceDriver, DeviceError, DiscoveryHandler, Peripheral, PowerState,
    StateHandler,
};
use crate::exporter::Exporter;
use crate::fanout::Fanout;
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Number of decoded readings that may wait for the export loop.
///
/// A full channel blocks the discovery callback, which in turn holds back the
/// device's advertisement delivery.
pub const READING_CHANNEL_CAPACITY: usize = 1;

/// Error type for scanner construction and start-up.
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error(transparent)]
    InvalidDeviceId(#[from] InvalidDeviceId),
    #[error("reporting interval must be greater than zero")]
    InvalidInterval,
    #[error("failed to open device: {0}")]
    OpenDevice(#[source] DeviceError),
    #[error("failed to initialize device: {0}")]
    InitDevice(#[source] DeviceError),
    #[error("scanner already started")]
    AlreadyStarted,
}

/// Reads RuuviTags through a radio device and exports what it decodes.
pub struct Scanner {
    inner: Arc<Inner>,
}

/// State shared with the device callbacks and the background tasks.
struct Inner {
    sleep_interval: Duration,
    registry: DeviceRegistry,
    fanout: Fanout,
    driver: Arc<dyn DeviceDriver>,
    quit: CancellationToken,
    /// Stop signal of the running scan loop, if any
    stop_scan: Mutex<Option<CancellationToken>>,
    readings: mpsc::Sender<Reading>,
    /// Receiving end of `readings` until the export loop is started
    pending: Mutex<Option<mpsc::Receiver<Reading>>>,
}

impl Scanner {
    /// Validate `config` and prepare a scanner. Nothing touches the radio
    /// before [`start`](Self::start).
    pub fn new(
        config: &ScannerConfig,
        driver: Arc<dyn DeviceDriver>,
        exporters: Vec<Arc<dyn Exporter>>,
    ) -> Result<Self, ScannerError> {
        if config.reporting_interval.is_zero() {
            return Err(ScannerError::InvalidInterval);
        }
        let registry = DeviceRegistry::from_aliases(&config.devices)?;
        if registry.is_empty() {
            info!("Reading from all nearby BLE devices");
        } else {
            info!("Reading from RuuviTags {}", id_list(registry.ids()));
        }

        let (tx, rx) = mpsc::channel(READING_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                sleep_interval: config.reporting_interval,
                registry,
                fanout: Fanout::new(exporters, config.export_timeout),
                driver,
                quit: CancellationToken::new(),
                stop_scan: Mutex::new(None),
                readings: tx,
                pending: Mutex::new(Some(rx)),
            }),
        })
    }

    /// Open and initialize the device, then start the export loop.
    ///
    /// Scanning itself begins once the device reports that it is powered on.
    /// A failed start leaves the scanner unstarted so it can be retried.
    pub async fn start(&self) -> Result<(), ScannerError> {
        let inner = &self.inner;
        let mut pending = inner.pending.lock().await;
        if pending.is_none() {
            return Err(ScannerError::AlreadyStarted);
        }

        let device = inner
            .driver
            .new_device()
            .await
            .map_err(ScannerError::OpenDevice)?;
        device.handle_peripheral_discovered(inner.clone());
        device
            .init(inner.clone())
            .await
            .map_err(ScannerError::InitDevice)?;

        let Some(readings) = pending.take() else {
            return Err(ScannerError::AlreadyStarted);
        };
        tokio::spawn(inner.fanout.clone().run(readings, inner.quit.clone()));
        debug!(
            "Export loop started with {} exporter(s)",
            inner.fanout.exporters().len()
        );
        Ok(())
    }

    /// Signal the scan and export loops to quit. Does not wait for them.
    pub fn stop(&self) {
        info!("Scanner stopping");
        self.inner.quit.cancel();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.quit.is_cancelled()
    }
}

impl Inner {
    async fn powered_on(self: Arc<Self>, device: Arc<dyn Device>) {
        info!("Device powered on");
        if self.quit.is_cancelled() {
            debug!("Scanner already stopped, not scanning");
            return;
        }
        let stop = self.quit.child_token();
        if let Some(previous) = self.stop_scan.lock().await.replace(stop.clone()) {
            previous.cancel();
        }
        tokio::spawn(self.scan_loop(device, stop));
    }

    async fn powered_off(self: Arc<Self>, device: Arc<dyn Device>) {
        info!("Device powered off");
        if let Some(stop) = self.stop_scan.lock().await.take() {
            stop.cancel();
        }
        if let Err(e) = device.init(self.clone()).await {
            error!("Failed to restart device: {e}");
        }
    }

    async fn scan_loop(self: Arc<Self>, device: Arc<dyn Device>, stop: CancellationToken) {
        if stop.is_cancelled() {
            return;
        }
        info!("Scanner starting");
        self.scan(device.as_ref()).await;

        let mut ticker =
            time::interval_at(Instant::now() + self.sleep_interval, self.sleep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    if self.quit.is_cancelled() {
                        info!("Scanner quitting");
                    } else {
                        info!("Scanner stopping");
                    }
                    return;
                }
                _ = ticker.tick() => self.scan(device.as_ref()).await,
            }
        }
    }

    async fn scan(&self, device: &dyn Device) {
        info!("Scanner scanning devices [{}]", id_list(self.registry.ids()));
        if let Err(e) = device.scan(self.registry.ids(), false).await {
            warn!("Scan command failed: {e}");
        }
    }

    fn decode(&self, peripheral: &Peripheral, advertisement: &Advertisement) -> Option<Reading> {
        let data = &advertisement.manufacturer_data;
        match decoder::parse(data) {
            Ok(values) => Some(Reading::new(
                peripheral.id,
                self.registry.name(&peripheral.id).to_string(),
                values,
            )),
            Err(e @ DecodeError::UnknownManufacturer(_)) => {
                debug!(
                    "Error while parsing RuuviTag data ({} bytes) {:02X?}: {e}",
                    data.len(),
                    decoder::payload_header(data)
                );
                None
            }
            Err(e) => {
                warn!(
                    "Error while parsing RuuviTag data ({} bytes) {:02X?}: {e}",
                    data.len(),
                    decoder::payload_header(data)
                );
                None
            }
        }
    }
}

fn id_list(ids: &[MacAddress]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl StateHandler for Inner {
    fn on_state_changed(
        self: Arc<Self>,
        device: Arc<dyn Device>,
        state: PowerState,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match state {
                PowerState::PoweredOn => self.powered_on(device).await,
                PowerState::PoweredOff => self.powered_off(device).await,
                other => warn!("Unhandled state: {other}"),
            }
        })
    }
}

impl DiscoveryHandler for Inner {
    fn on_peripheral_discovered(
        &self,
        peripheral: Peripheral,
        advertisement: Advertisement,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(
                "Read sensor data from device {}:{}",
                peripheral.id,
                self.registry.name(&peripheral.id)
            );
            let Some(reading) = self.decode(&peripheral, &advertisement) else {
                return;
            };
            let id = reading.device_id;
            tokio::select! {
                biased;
                _ = self.quit.cancelled() => {
                    debug!("Scanner stopped, dropping reading from {id}");
                }
                sent = self.readings.send(reading) => {
                    if let Err(e) = sent {
                        debug!("Export loop gone, dropping reading from {}", e.0.device_id);
                    }
                }
            }
        })
    }
}
