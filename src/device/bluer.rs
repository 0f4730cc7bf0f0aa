//! BlueZ D-Bus device driver.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Advertisement, Device, DeviceDriver, DeviceError, DiscoveryHandler, Peripheral, PowerState,
    StateHandler,
};
use crate::BoxFuture;
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::{Stream, StreamExt};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

impl From<bluer::Error> for DeviceError {
    fn from(err: bluer::Error) -> Self {
        DeviceError::Bluetooth(err.to_string())
    }
}

/// Opens the default adapter of the local BlueZ daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluerDriver;

impl DeviceDriver for BluerDriver {
    fn new_device(&self) -> BoxFuture<'_, Result<Arc<dyn Device>, DeviceError>> {
        Box::pin(async {
            let device: Arc<dyn Device> = Arc::new(BluerDevice::open().await?);
            Ok(device)
        })
    }
}

/// A BlueZ adapter.
///
/// Power states come from the adapter's `Powered` property. The first scan
/// command opens an LE discovery session that stays alive until the next
/// `init`; later scan commands only update its device filter. Manufacturer
/// data is forwarded to the registered [`DiscoveryHandler`] only when it
/// differs from what was last seen for that device, so data BlueZ has cached
/// and property changes such as RSSI updates are not reported as readings.
pub struct BluerDevice {
    // Keeps the D-Bus connection alive for the adapter handle.
    _session: Session,
    adapter: Adapter,
    /// Bumped by every `init`; stale power watchers exit when they notice.
    generation: AtomicU64,
    discovery_handler: Mutex<Option<Arc<dyn DiscoveryHandler>>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    filter: Arc<Mutex<ScanFilter>>,
    seen: Arc<Mutex<PayloadCache>>,
}

/// Device filter of the latest scan command.
#[derive(Debug, Default, Clone)]
struct ScanFilter {
    device_ids: Vec<MacAddress>,
    allow_duplicates: bool,
}

impl ScanFilter {
    fn accepts(&self, id: &MacAddress) -> bool {
        self.device_ids.is_empty() || self.device_ids.contains(id)
    }
}

/// Last manufacturer data seen per device and company.
#[derive(Debug, Default)]
struct PayloadCache {
    last: HashMap<(MacAddress, u16), Vec<u8>>,
}

impl PayloadCache {
    /// Remember `data` and tell whether it differs from the previous payload.
    fn is_new(&mut self, id: MacAddress, company: u16, data: &[u8]) -> bool {
        match self.last.get_mut(&(id, company)) {
            Some(last) if last.as_slice() == data => false,
            Some(last) => {
                last.clear();
                last.extend_from_slice(data);
                true
            }
            None => {
                self.last.insert((id, company), data.to_vec());
                true
            }
        }
    }
}

/// A device's current advertisement as BlueZ reports it.
struct DeviceData {
    peripheral: Peripheral,
    rssi: Option<i16>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl BluerDevice {
    pub async fn open() -> Result<Self, DeviceError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
            generation: AtomicU64::new(0),
            discovery_handler: Mutex::new(None),
            discovery: Mutex::new(None),
            filter: Arc::default(),
            seen: Arc::default(),
        })
    }

    fn discovery_running(&self) -> bool {
        self.discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn stop_discovery(&self) {
        if let Some(task) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// Mark the data BlueZ already holds for known devices as seen.
    async fn remember_known_devices(&self) -> Result<(), bluer::Error> {
        for address in self.adapter.device_addresses().await? {
            let data = match read_device(&self.adapter, address).await {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Failed to read cached data of {address}: {e}");
                    continue;
                }
            };
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            for (company, payload) in &data.manufacturer_data {
                seen.is_new(address.into(), *company, payload);
            }
        }
        Ok(())
    }

    async fn watch_power(
        self: Arc<Self>,
        generation: u64,
        handler: Arc<dyn StateHandler>,
        mut powered: bool,
        events: impl Stream<Item = AdapterEvent>,
    ) {
        let mut events = Box::pin(events);
        let device: Arc<dyn Device> = self.clone();

        handler.clone().on_state_changed(device.clone(), power_state(powered)).await;

        while self.is_current(generation) {
            let Some(event) = events.next().await else {
                break;
            };
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(now)) = event
                && now != powered
                && self.is_current(generation)
            {
                powered = now;
                handler.clone().on_state_changed(device.clone(), power_state(now)).await;
            }
        }
        debug!("Power watcher {generation} for {} finished", self.adapter.name());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

fn power_state(powered: bool) -> PowerState {
    if powered {
        PowerState::PoweredOn
    } else {
        PowerState::PoweredOff
    }
}

impl Device for BluerDevice {
    fn init(
        self: Arc<Self>,
        handler: Arc<dyn StateHandler>,
    ) -> BoxFuture<'static, Result<(), DeviceError>> {
        Box::pin(async move {
            // A discovery session does not survive a power cycle.
            self.stop_discovery();
            self.adapter.set_powered(true).await?;
            let events = self.adapter.events().await?;
            let powered = self.adapter.is_powered().await?;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(self.watch_power(generation, handler, powered, events));
            Ok(())
        })
    }

    fn scan<'a>(
        &'a self,
        device_ids: &'a [MacAddress],
        allow_duplicates: bool,
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            let handler = self
                .discovery_handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| DeviceError::Unavailable("no discovery handler".into()))?;

            *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = ScanFilter {
                device_ids: device_ids.to_vec(),
                allow_duplicates,
            };
            if self.discovery_running() {
                debug!("Discovery already running on {}", self.adapter.name());
                return Ok(());
            }

            self.adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: allow_duplicates,
                    ..Default::default()
                })
                .await?;
            self.remember_known_devices().await?;
            let events = self.adapter.discover_devices_with_changes().await?;
            debug!("Discovery started on {}", self.adapter.name());

            let task = tokio::spawn(deliver_advertisements(
                self.adapter.clone(),
                events,
                self.filter.clone(),
                self.seen.clone(),
                handler,
            ));
            let previous = self
                .discovery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(task);
            if let Some(previous) = previous {
                previous.abort();
            }
            Ok(())
        })
    }

    fn handle_peripheral_discovered(&self, handler: Arc<dyn DiscoveryHandler>) {
        *self
            .discovery_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

impl Drop for BluerDevice {
    fn drop(&mut self) {
        if let Some(task) = self
            .discovery
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Forward changed manufacturer data from a discovery session until it ends
/// or is aborted.
async fn deliver_advertisements(
    adapter: Adapter,
    events: impl Stream<Item = AdapterEvent>,
    filter: Arc<Mutex<ScanFilter>>,
    seen: Arc<Mutex<PayloadCache>>,
    handler: Arc<dyn DiscoveryHandler>,
) {
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        // Property changes of known devices arrive as `DeviceAdded` too.
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        let id = MacAddress::from(address);
        let current = filter.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if !current.accepts(&id) {
            continue;
        }
        let data = match read_device(&adapter, address).await {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(e) => {
                debug!("Failed to read advertisement of {id}: {e}");
                continue;
            }
        };
        let changed = {
            let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
            changed_payloads(&mut seen, id, &data, current.allow_duplicates)
        };
        for (company, payload) in changed {
            handler
                .on_peripheral_discovered(
                    data.peripheral.clone(),
                    advertisement(company, payload, data.rssi),
                )
                .await;
        }
    }
}

/// The manufacturer entries of `data` that should be reported.
fn changed_payloads<'a>(
    seen: &mut PayloadCache,
    id: MacAddress,
    data: &'a DeviceData,
    allow_duplicates: bool,
) -> Vec<(u16, &'a [u8])> {
    data.manufacturer_data
        .iter()
        .filter(|(company, payload)| seen.is_new(id, **company, payload) || allow_duplicates)
        .map(|(company, payload)| (*company, payload.as_slice()))
        .collect()
}

/// Build an advertisement whose data starts with the little-endian company ID.
fn advertisement(company: u16, data: &[u8], rssi: Option<i16>) -> Advertisement {
    let mut manufacturer_data = Vec::with_capacity(2 + data.len());
    manufacturer_data.extend_from_slice(&company.to_le_bytes());
    manufacturer_data.extend_from_slice(data);
    Advertisement {
        manufacturer_data,
        rssi,
    }
}

/// Read the current advertisement data of a device. `None` when it carries no
/// manufacturer data.
async fn read_device(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<DeviceData>, bluer::Error> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };

    Ok(Some(DeviceData {
        peripheral: Peripheral {
            id: address.into(),
            name: device.name().await?,
        },
        rssi: device.rssi().await?,
        manufacturer_data,
    }))
}
