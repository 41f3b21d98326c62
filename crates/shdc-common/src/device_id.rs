//! Device id parsing for the CLI surface (spec §6).
//!
//! Accepts hex (`0x...`) or decimal input; the value must fit in a `u32`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(v: u32) -> Self {
        DeviceId(v)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// `clap` value parser for device ids passed on the command line.
///
/// Accepts `0x`/`0X`-prefixed hex or plain decimal, rejecting anything that
/// doesn't fit a `u32`.
pub fn parse_device_id(s: &str) -> Result<DeviceId, String> {
    let trimmed = s.trim();
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex device id '{s}': {e}"))?
    } else {
        trimmed
            .parse::<u32>()
            .map_err(|e| format!("invalid device id '{s}': {e}"))?
    };
    Ok(DeviceId(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex() {
        assert_eq!(parse_device_id("0x12345678").unwrap(), DeviceId(0x1234_5678));
    }

    #[test]
    fn parses_decimal() {
        assert_eq!(parse_device_id("42").unwrap(), DeviceId(42));
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_device_id("0x1_0000_0000").is_err());
        assert!(parse_device_id("4294967296").is_err());
    }

    #[test]
    fn display_is_eight_hex_digits() {
        assert_eq!(DeviceId(0xAB).to_string(), "000000AB");
    }
}
