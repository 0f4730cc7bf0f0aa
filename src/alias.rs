//! Configured RuuviTags and their display names.
//!
//! Each `--device MAC=NAME` option becomes an [`Alias`]. The scanner turns the
//! aliases into a [`DeviceRegistry`] once at construction: the registry both
//! restricts scanning to the configured tags and names their readings.

use crate::mac_address::{MacAddress, ParseMacError};
use std::collections::BTreeMap;
use thiserror::Error;

/// A configured device: an unparsed ID and the name to report it under.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// The device ID as configured (e.g., "AA:BB:CC:DD:EE:FF")
    pub address: String,
    /// The human-readable name (e.g., "Sauna")
    pub name: String,
}

impl Alias {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use ruuvitag_collector::alias::parse_alias;
///
/// let alias = parse_alias("AA:BB:CC:DD:EE:FF=Kitchen").unwrap();
/// assert_eq!(alias.address, "AA:BB:CC:DD:EE:FF");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    src.split_once('=')
        .map(|(address, name)| Alias::new(address.trim(), name.trim()))
        .ok_or_else(|| "invalid device: expected format MAC=NAME".into())
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to parse RuuviTag ID {id}: {source}")]
pub struct InvalidDeviceId {
    pub id: String,
    #[source]
    pub source: ParseMacError,
}

/// Read-only lookup of configured devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    ids: Vec<MacAddress>,
    names: BTreeMap<MacAddress, String>,
}

impl DeviceRegistry {
    /// Build the registry, failing on the first ID that is not a MAC address.
    ///
    /// IDs keep their configured order; a repeated ID keeps its first position
    /// and its last name.
    pub fn from_aliases(aliases: &[Alias]) -> Result<Self, InvalidDeviceId> {
        let mut registry = Self::default();
        for alias in aliases {
            let id: MacAddress = alias.address.parse().map_err(|source| InvalidDeviceId {
                id: alias.address.clone(),
                source,
            })?;
            if registry.names.insert(id, alias.name.clone()).is_none() {
                registry.ids.push(id);
            }
        }
        Ok(registry)
    }

    /// Device ID filter for scan commands. Empty means any device.
    pub fn ids(&self) -> &[MacAddress] {
        &self.ids
    }

    /// Display name for `id`, empty if the device is not configured.
    pub fn name(&self, id: &MacAddress) -> &str {
        self.names.get(id).map(String::as_str).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
