//! RuuviTag reading data structures.

use crate::mac_address::MacAddress;
use std::time::SystemTime;

/// Sensor values decoded from a single advertisement payload.
///
/// All values are in SI units:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Pressure in Pascals
/// - Battery voltage in Volts
/// - TX power in dBm
/// - Acceleration in g (standard gravity)
///
/// A field is `None` when the tag reported it as unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorValues {
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent (0-100)
    pub humidity: Option<f64>,
    /// Atmospheric pressure in Pascals
    pub pressure: Option<f64>,
    /// Battery voltage in Volts
    pub battery: Option<f64>,
    /// TX power in dBm
    pub tx_power: Option<i8>,
    /// Movement counter
    pub movement_counter: Option<u32>,
    /// Measurement sequence number
    pub measurement_sequence: Option<u32>,
    /// Acceleration vector (x, y, z) in g
    pub acceleration: Option<(f64, f64, f64)>,
}

impl SensorValues {
    /// Whether the tag reported no value at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A decoded measurement attributed to a device.
///
/// Built by the scanner once per successfully decoded advertisement and handed
/// to every exporter exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Address of the tag that sent the advertisement
    pub device_id: MacAddress,
    /// Configured display name, empty when the tag is not in the registry
    pub name: String,
    /// Wall clock time the payload was decoded
    pub timestamp: SystemTime,
    /// Decoded sensor values
    pub values: SensorValues,
}

impl Reading {
    pub fn new(device_id: MacAddress, name: String, values: SensorValues) -> Self {
        Self {
            device_id,
            name,
            timestamp: SystemTime::now(),
            values,
        }
    }

    /// Name to show for the device: the display name, or the address when unnamed.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.device_id.to_string()
        } else {
            self.name.clone()
        }
    }
}
