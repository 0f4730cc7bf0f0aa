//! RuuviTag manufacturer data decoding.
//!
//! [`parse`] takes the manufacturer-specific bytes exactly as they appear in
//! the advertisement: the little-endian company identifier followed by the
//! data format byte and the format body.

use crate::reading::SensorValues;
use ruuvi_decoders::v5;
use thiserror::Error;

/// Ruuvi Innovations company identifier.
///
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Number of leading payload bytes included in decode failure logs.
pub const HEADER_LEN: usize = 3;

/// Length of a RAWv2 body including the format byte.
const V5_PAYLOAD_LEN: usize = 24;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload belongs to some other vendor
    #[error("Unknown manufacturer: 0x{0:04X}")]
    UnknownManufacturer(u16),
    /// Unsupported RuuviTag data format (anything but RAWv2)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Invalid or corrupted data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Decoder library returned an error
    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Decode raw manufacturer data into sensor values.
///
/// # Errors
/// Fails for payloads shorter than company ID plus format byte, for other
/// manufacturers, and for any data format other than 5.
pub fn parse(data: &[u8]) -> Result<SensorValues, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::InvalidData(format!(
            "payload too short ({} bytes)",
            data.len()
        )));
    }

    let manufacturer = u16::from_le_bytes([data[0], data[1]]);
    if manufacturer != RUUVI_MANUFACTURER_ID {
        return Err(DecodeError::UnknownManufacturer(manufacturer));
    }

    decode_ruuvi_data(&data[2..])
}

/// Decode the format byte and body that follow the company identifier.
///
/// Battery voltage is converted from millivolts to Volts and acceleration
/// from milli-g to g.
pub fn decode_ruuvi_data(data: &[u8]) -> Result<SensorValues, DecodeError> {
    match data.first() {
        None => Err(DecodeError::InvalidData("Empty data".into())),
        Some(5) => decode_v5(data),
        Some(format) => Err(DecodeError::UnsupportedFormat(format!(
            "RuuviTag data format {format} (only V5 supported)"
        ))),
    }
}

fn decode_v5(data: &[u8]) -> Result<SensorValues, DecodeError> {
    if data.len() < V5_PAYLOAD_LEN {
        return Err(DecodeError::InvalidData(format!(
            "RAWv2 body is {} bytes, expected {V5_PAYLOAD_LEN}",
            data.len()
        )));
    }

    let tag = v5::decode(data).map_err(|e| {
        DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}"))
    })?;

    let acceleration = match (tag.acceleration_x, tag.acceleration_y, tag.acceleration_z) {
        (Some(x), Some(y), Some(z)) => Some((
            f64::from(x) / 1000.0,
            f64::from(y) / 1000.0,
            f64::from(z) / 1000.0,
        )),
        _ => None,
    };

    let values = SensorValues {
        temperature: tag.temperature,
        humidity: tag.humidity,
        pressure: tag.pressure,
        battery: tag.battery_voltage.map(|mv| f64::from(mv) / 1000.0),
        tx_power: tag.tx_power,
        movement_counter: tag.movement_counter.map(u32::from),
        measurement_sequence: tag.measurement_sequence.map(u32::from),
        acceleration,
    };
    if values.is_empty() {
        return Err(DecodeError::InvalidData(
            "every value is marked as not available".into(),
        ));
    }
    Ok(values)
}

/// Leading bytes of a payload, used to identify rejected advertisements in logs.
pub fn payload_header(data: &[u8]) -> &[u8] {
    &data[..data.len().min(HEADER_LEN)]
}
