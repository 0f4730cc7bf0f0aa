//! Radio driver abstraction.
//!
//! The scanner never talks to a Bluetooth stack directly. A [`DeviceDriver`]
//! opens a [`Device`], the scanner registers itself on it as a
//! [`DiscoveryHandler`] and a [`StateHandler`], and from then on the device
//! pushes power-state changes and received advertisements into the scanner.
//! Backends implement these traits; tests use an in-memory fake.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::BoxFuture;
use crate::mac_address::MacAddress;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error type for radio driver operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// No usable adapter
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Power state reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    /// Any other informational state (resetting, unauthorized, ...)
    Other(String),
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::PoweredOn => write!(f, "powered on"),
            PowerState::PoweredOff => write!(f, "powered off"),
            PowerState::Other(state) => write!(f, "{state}"),
        }
    }
}

/// The remote device an advertisement came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Peripheral {
    pub id: MacAddress,
    /// Advertised local name, if any
    pub name: Option<String>,
}

/// One received advertisement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
    /// Manufacturer-specific data including the little-endian company ID
    pub manufacturer_data: Vec<u8>,
    pub rssi: Option<i16>,
}

/// Receives power-state notifications from a [`Device`].
///
/// The device passes itself along so the handler can scan or re-initialize it.
pub trait StateHandler: Send + Sync {
    fn on_state_changed(
        self: Arc<Self>,
        device: Arc<dyn Device>,
        state: PowerState,
    ) -> BoxFuture<'static, ()>;
}

/// Receives advertisements from a [`Device`].
///
/// Devices await the returned future before delivering the next
/// advertisement, so a slow handler slows down delivery.
pub trait DiscoveryHandler: Send + Sync {
    fn on_peripheral_discovered(
        &self,
        peripheral: Peripheral,
        advertisement: Advertisement,
    ) -> BoxFuture<'_, ()>;
}

/// An opened radio.
pub trait Device: Send + Sync {
    /// Bring the radio up and report power states to `handler`.
    ///
    /// Calling `init` again replaces the previous handler; only the most
    /// recent one receives notifications.
    fn init(self: Arc<Self>, handler: Arc<dyn StateHandler>)
    -> BoxFuture<'static, Result<(), DeviceError>>;

    /// Issue a scan command. An empty `device_ids` accepts every device.
    fn scan<'a>(
        &'a self,
        device_ids: &'a [MacAddress],
        allow_duplicates: bool,
    ) -> BoxFuture<'a, Result<(), DeviceError>>;

    /// Register the receiver for advertisements found by later scans.
    fn handle_peripheral_discovered(&self, handler: Arc<dyn DiscoveryHandler>);
}

/// Opens radio devices.
pub trait DeviceDriver: Send + Sync {
    fn new_device(&self) -> BoxFuture<'_, Result<Arc<dyn Device>, DeviceError>>;
}
