//! Scanner configuration.

use crate::alias::Alias;
use std::time::Duration;

/// Default delay between scan commands.
pub const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(60);

/// Settings consumed by [`Scanner::new`](crate::scanner::Scanner::new).
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// How often the scan command is reissued while the radio is powered on
    pub reporting_interval: Duration,
    /// Devices to scan for; empty means every nearby device
    pub devices: Vec<Alias>,
    /// Upper bound for a single exporter call. `None` waits indefinitely.
    pub export_timeout: Option<Duration>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            reporting_interval: DEFAULT_REPORTING_INTERVAL,
            devices: Vec::new(),
            export_timeout: None,
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ruuvitag_collector::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, millis_per_unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds", 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours", 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes", 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds", 1000)
    } else {
        (src, "duration", 1000)
    };

    num.trim()
        .parse::<u64>()
        .map(|n| Duration::from_millis(n.saturating_mul(millis_per_unit)))
        .map_err(|_| format!("invalid {unit}: {num}"))
}
