//! Bluetooth device identifiers.
//!
//! Every device the scanner hears from is keyed by its 6-byte MAC address. The
//! type is independent of the radio backend so the scanner core, the exporters
//! and the tests never touch `bluer` types directly.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors returned when a configured device ID is not a MAC address.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseMacError {
    #[error("expected 6 colon separated octets, got {0}")]
    InvalidLength(usize),
    #[error("octet {0} must be two hex digits")]
    InvalidPartLength(usize),
    #[error("'{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError::InvalidHex(part.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_uppercase_colon_separated() {
        let addr = MacAddress([0xcc, 0xca, 0x7e, 0x52, 0xcc, 0x34]);
        assert_eq!(addr.to_string(), "CC:CA:7E:52:CC:34");
        assert_eq!(MacAddress::default().to_string(), "00:00:00:00:00:00");
    }

    #[test]
    fn parses_either_case_and_surrounding_whitespace() {
        let upper: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let lower: MacAddress = " aa:bb:cc:dd:ee:ff ".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(
            "not-a-mac".parse::<MacAddress>(),
            Err(ParseMacError::InvalidLength(1))
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:F".parse::<MacAddress>(),
            Err(ParseMacError::InvalidPartLength(5))
        );
        assert!(matches!(
            "AA:BB:CC:DD:EE:GG".parse::<MacAddress>(),
            Err(ParseMacError::InvalidHex(part)) if part == "GG"
        ));
    }

    #[test]
    fn rejects_signed_octets() {
        assert!(matches!(
            "AA:BB:CC:DD:EE:+F".parse::<MacAddress>(),
            Err(ParseMacError::InvalidHex(part)) if part == "+F"
        ));
        assert!(matches!(
            "-0:BB:CC:DD:EE:FF".parse::<MacAddress>(),
            Err(ParseMacError::InvalidHex(part)) if part == "-0"
        ));
    }

    #[test]
    fn serializes_as_string() {
        let addr = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"AA:BB:CC:DD:EE:FF\""
        );
    }
}
