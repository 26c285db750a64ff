//! Hardware address type used as the device identity key.
//!
//! Scanners print MACs in whatever case and separator style they like.
//! Everything downstream compares the normalised lower-case, colon-separated
//! form, so parsing is the only place that deals with the variations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered addresses are usually randomised or virtual.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl FromStr for MacAddr {
    type Err = CoreError;

    /// Accepts exactly six two-digit hex octets separated consistently by
    /// `:` or `-`, in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMacAddress(s.to_string());

        let sep = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises_case_and_separator() {
        let upper: MacAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let dashed: MacAddr = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(upper, dashed);
        assert_eq!(upper.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb:cc-dd:ee:ff",
            "a:bb:cc:dd:ee:ff",
            "aaa:bb:cc:dd:ee:ff",
            "gg:bb:cc:dd:ee:ff",
            "aabbccddeeff",
            " aa:bb:cc:dd:ee:ff",
            "+a:bb:cc:dd:ee:ff",
        ] {
            assert!(bad.parse::<MacAddr>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_locally_administered_bit() {
        let random: MacAddr = "da:a1:19:00:00:01".parse().unwrap();
        let vendor: MacAddr = "00:1a:2b:3c:4d:5e".parse().unwrap();
        assert!(random.is_locally_administered());
        assert!(!vendor.is_locally_administered());
    }

    #[test]
    fn test_serde_uses_normalised_string() {
        let mac: MacAddr = "00-1A-2B-3C-4D-5E".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:1a:2b:3c:4d:5e\"");

        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
        assert!(serde_json::from_str::<MacAddr>("\"nope\"").is_err());
    }
}
