//! Insteon device address (three bytes, written `AA.BB.CC`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::MsgError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsteonAddress([u8; 3]);

impl InsteonAddress {
    pub const fn new(high: u8, middle: u8, low: u8) -> Self {
        Self([high, middle, low])
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    /// Build from the first three bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MsgError> {
        match bytes {
            [a, b, c, ..] => Ok(Self([*a, *b, *c])),
            _ => Err(MsgError::InvalidAddress(format!("{:02X?}", bytes))),
        }
    }

    pub const fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }
}

impl fmt::Display for InsteonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}.{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for InsteonAddress {
    type Err = MsgError;

    /// Accepts `AA.BB.CC`, `AA:BB:CC`, `AA BB CC` or `AABBCC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | ' '))
            .collect();
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MsgError::InvalidAddress(s.to_string()));
        }
        let mut out = [0u8; 3];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| MsgError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(out))
    }
}

impl Serialize for InsteonAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InsteonAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
