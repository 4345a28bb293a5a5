//! Versionstamps: opaque 12-byte tokens that encode global write order.

use crate::error::DecodeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Fixed 12-byte commit token, bijective with a 24-character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Versionstamp([u8; Versionstamp::LEN]);

impl Versionstamp {
    pub const LEN: usize = 12;
    pub const HEX_LEN: usize = Self::LEN * 2;

    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        if s.len() != Self::HEX_LEN {
            return Err(DecodeError::InvalidVersionstamp(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(DecodeError::InvalidVersionstamp(
                "hex must be lowercase".to_string(),
            ));
        }
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| DecodeError::InvalidVersionstamp(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for Versionstamp {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            DecodeError::InvalidVersionstamp(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }
}

impl From<[u8; Versionstamp::LEN]> for Versionstamp {
    fn from(bytes: [u8; Versionstamp::LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Versionstamp {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Versionstamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Versionstamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_is_24_lowercase_chars() {
        let vs = Versionstamp::new([0xAB, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xFF, 0x10]);
        let hex = vs.to_hex();
        assert_eq!(hex, "ab000000000000000001ff10");
        assert_eq!(hex.len(), 24);
        assert_eq!(hex.parse::<Versionstamp>().unwrap(), vs);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Versionstamp::from_hex("00").is_err());
        assert!(Versionstamp::from_hex("AB0000000000000000000000").is_err());
        assert!(Versionstamp::from_hex("zz0000000000000000000000").is_err());
        assert!(Versionstamp::try_from([0u8; 10].as_slice()).is_err());
        assert!(Versionstamp::try_from([7u8; 12].as_slice()).is_ok());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let vs = Versionstamp::new([1; 12]);
        let json = serde_json::to_string(&vs).unwrap();
        assert_eq!(json, "\"010101010101010101010101\"");
        let back: Versionstamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vs);
    }
}
