//! InfluxDB line protocol output formatter.

use crate::output::{FormatError, OutputFormatter};
use crate::reading::Reading;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
///
/// Line protocol requires at least one field, so a data point can only be
/// built through [`DataPoint::new`].
#[derive(Debug)]
pub struct DataPoint {
    measurement: String,
    tag_set: BTreeMap<&'static str, String>,
    field_set: BTreeMap<&'static str, FieldValue>,
    timestamp: Option<SystemTime>,
}

impl DataPoint {
    pub fn new(
        measurement: impl Into<String>,
        tag_set: BTreeMap<&'static str, String>,
        field_set: BTreeMap<&'static str, FieldValue>,
        timestamp: Option<SystemTime>,
    ) -> Result<Self, FormatError> {
        let measurement = measurement.into();
        if field_set.is_empty() {
            return Err(FormatError::NoFields(measurement));
        }
        Ok(Self {
            measurement,
            tag_set,
            field_set,
            timestamp,
        })
    }
}

/// Escape commas, spaces and equals signs in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Timestamps before the epoch are written without one.
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Output is Telegraf compatible: `mac` and `name` tags, one field per
/// available value, nanosecond timestamp of the reading.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Convert humidity from percent (0-100) to fraction (0-1).
    #[inline]
    fn humidity_fraction(percent: f64) -> f64 {
        percent / 100.0
    }

    /// Convert pressure from Pascals to kilopascals.
    #[inline]
    fn pressure_kpa(pascals: f64) -> f64 {
        pascals / 1000.0
    }

    pub fn new(measurement_name: impl Into<String>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
        }
    }

    fn tag_set(&self, reading: &Reading) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("mac", reading.device_id.to_string()),
            ("name", reading.display_name()),
        ])
    }

    /// Build the field set. Values the tag did not report are omitted.
    fn field_set(&self, reading: &Reading) -> BTreeMap<&'static str, FieldValue> {
        let m = &reading.values;
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, int $val:expr) => {
                if let Some(v) = $val {
                    fields.insert($name, FieldValue::Integer(i64::from(v)));
                }
            };
            ($name:literal, $val:expr) => {
                if let Some(v) = $val {
                    fields.insert($name, FieldValue::Float(v));
                }
            };
        }

        add!("temperature", m.temperature);
        add!("humidity", m.humidity.map(Self::humidity_fraction));
        add!("pressure", m.pressure.map(Self::pressure_kpa));
        add!("battery_potential", m.battery);
        add!("tx_power", int m.tx_power);
        add!("movement_counter", int m.movement_counter);
        add!("measurement_sequence_number", int m.measurement_sequence);

        if let Some((x, y, z)) = m.acceleration {
            fields.insert("acceleration_x", FieldValue::Float(x));
            fields.insert("acceleration_y", FieldValue::Float(y));
            fields.insert("acceleration_z", FieldValue::Float(z));
        }

        fields
    }

    pub fn to_data_point(&self, reading: &Reading) -> Result<DataPoint, FormatError> {
        DataPoint::new(
            self.measurement_name.clone(),
            self.tag_set(reading),
            self.field_set(reading),
            Some(reading.timestamp),
        )
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, reading: &Reading) -> Result<String, FormatError> {
        Ok(self.to_data_point(reading)?.to_string())
    }
}
