//! Fakes and helpers shared by the unit tests.

use crate::BoxFuture;
use crate::device::{
    Advertisement, Device, DeviceDriver, DeviceError, DiscoveryHandler, Peripheral, PowerState,
    StateHandler,
};
use crate::exporter::{ExportError, Exporter};
use crate::mac_address::MacAddress;
use crate::reading::{Reading, SensorValues};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Manufacturer data of a RuuviTag broadcasting format 5, company ID included.
pub fn v5_manufacturer_data() -> Vec<u8> {
    vec![
        0x99, 0x04, // Ruuvi Innovations, little-endian
        0x05, // Format 5
        0x12, 0xFC, // Temperature: 24.30°C
        0x53, 0x94, // Humidity: 53.49%
        0xC3, 0x7C, // Pressure: 100044 Pa
        0x00, 0x04, // Acceleration X: 4 mG
        0xFF, 0xFC, // Acceleration Y: -4 mG
        0x04, 0x0C, // Acceleration Z: 1036 mG
        0xAC, 0x36, // Battery: 2977 mV, TX Power: 4 dBm
        0x42, // Movement counter: 66
        0x00, 0xCD, // Sequence: 205
        0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F, // MAC address
    ]
}

/// A reading from [`TEST_MAC`] carrying only a temperature.
pub fn test_reading(name: &str, temperature: f64) -> Reading {
    Reading::new(
        TEST_MAC,
        name.to_string(),
        SensorValues {
            temperature: Some(temperature),
            ..SensorValues::default()
        },
    )
}

/// Poll `condition` until it holds, failing the test after about a second
/// of (possibly virtual) time.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

/// Exporter that remembers every batch it was given.
pub struct RecordingExporter {
    name: String,
    fail: bool,
    delay: Option<Duration>,
    batches: Mutex<Vec<Vec<Reading>>>,
    completed: AtomicUsize,
    closed: AtomicUsize,
}

impl RecordingExporter {
    fn build(name: &str, fail: bool, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail,
            delay,
            batches: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, false, None)
    }

    /// Records the batch, then reports an HTTP 500. Closing fails too.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, true, None)
    }

    /// Records the batch, then takes `delay` to finish.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, false, Some(delay))
    }

    pub fn batches(&self) -> Vec<Vec<Reading>> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of export calls that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Exporter for RecordingExporter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn export<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            if readings.is_empty() {
                return Err(ExportError::NoMeasurements);
            }
            self.batches.lock().unwrap().push(readings.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExportError::Status {
                    url: format!("http://{}.invalid/", self.name),
                    status: 500,
                });
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ExportError>> {
        Box::pin(async move {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExportError::Config(format!("{} refused to close", self.name)));
            }
            Ok(())
        })
    }
}

/// In-memory radio driven by the test.
#[derive(Default)]
pub struct FakeDevice {
    init_failures: Mutex<VecDeque<DeviceError>>,
    init_calls: AtomicUsize,
    scan_failure: Mutex<Option<DeviceError>>,
    scans: Mutex<Vec<Vec<MacAddress>>>,
    state_handler: Mutex<Option<Arc<dyn StateHandler>>>,
    discovery_handler: Mutex<Option<Arc<dyn DiscoveryHandler>>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `init` call fail with `err`.
    pub fn fail_next_init(&self, err: DeviceError) {
        self.init_failures.lock().unwrap().push_back(err);
    }

    /// Make every following scan command fail with `err`.
    pub fn fail_scans(&self, err: DeviceError) {
        *self.scan_failure.lock().unwrap() = Some(err);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Device ID filters of all scan commands so far.
    pub fn scans(&self) -> Vec<Vec<MacAddress>> {
        self.scans.lock().unwrap().clone()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.lock().unwrap().len()
    }

    /// Report `state` to the handler registered by the latest successful `init`.
    pub async fn set_power(self: &Arc<Self>, state: PowerState) {
        let handler = self
            .state_handler
            .lock()
            .unwrap()
            .clone()
            .expect("device not initialized");
        let device: Arc<dyn Device> = self.clone();
        handler.on_state_changed(device, state).await;
    }

    /// Deliver an advertisement with the given manufacturer data.
    pub async fn advertise(&self, id: MacAddress, manufacturer_data: Vec<u8>) {
        let handler = self
            .discovery_handler
            .lock()
            .unwrap()
            .clone()
            .expect("no discovery handler registered");
        handler
            .on_peripheral_discovered(
                Peripheral { id, name: None },
                Advertisement {
                    manufacturer_data,
                    rssi: Some(-70),
                },
            )
            .await;
    }
}

impl Device for FakeDevice {
    fn init(
        self: Arc<Self>,
        handler: Arc<dyn StateHandler>,
    ) -> BoxFuture<'static, Result<(), DeviceError>> {
        Box::pin(async move {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.init_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            *self.state_handler.lock().unwrap() = Some(handler);
            Ok(())
        })
    }

    fn scan<'a>(
        &'a self,
        device_ids: &'a [MacAddress],
        _allow_duplicates: bool,
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            self.scans.lock().unwrap().push(device_ids.to_vec());
            match self.scan_failure.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn handle_peripheral_discovered(&self, handler: Arc<dyn DiscoveryHandler>) {
        *self.discovery_handler.lock().unwrap() = Some(handler);
    }
}

/// Driver handing out a single [`FakeDevice`], or failing when it has none.
pub struct FakeDriver {
    device: Option<Arc<FakeDevice>>,
}

impl FakeDriver {
    pub fn new(device: Arc<FakeDevice>) -> Self {
        Self {
            device: Some(device),
        }
    }

    pub fn broken() -> Self {
        Self { device: None }
    }
}

impl DeviceDriver for FakeDriver {
    fn new_device(&self) -> BoxFuture<'_, Result<Arc<dyn Device>, DeviceError>> {
        Box::pin(async move {
            match &self.device {
                Some(device) => Ok(device.clone() as Arc<dyn Device>),
                None => Err(DeviceError::Unavailable("no adapter in test".into())),
            }
        })
    }
}

/// Logger keeping every record in memory so tests can assert on log output.
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

static LOGGER: CaptureLogger = CaptureLogger {
    lines: Mutex::new(Vec::new()),
};

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("{} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Install the capturing logger. Safe to call from every test.
pub fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).expect("another logger is installed");
        log::set_max_level(LevelFilter::Debug);
    });
}

/// Whether any captured log line contains `needle`.
///
/// Tests run in parallel and share the logger, so needles should be unique to
/// the test asserting on them.
pub fn logged(needle: &str) -> bool {
    LOGGER
        .lines
        .lock()
        .unwrap()
        .iter()
        .any(|line| line.contains(needle))
}
