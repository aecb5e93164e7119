//! Function selectors: the routing keys of a diamond.

use std::{fmt, str::FromStr};

use alloy_core::primitives::{FixedBytes, keccak256};
use derive_more::{Deref, From};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 4-byte function selector.
///
/// Ordering is numeric (big-endian byte order), which keeps plans and records
/// diffable. Displays and serializes as `0x` followed by 8 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, From)]
pub struct Selector(FixedBytes<4>);

impl Selector {
    /// Build a selector from its numeric value.
    pub const fn from_u32(value: u32) -> Self {
        Self(FixedBytes(value.to_be_bytes()))
    }

    /// Compute the selector of a canonical signature such as `transfer(address,uint256)`.
    pub fn from_signature(signature: &str) -> Self {
        let hash = keccak256(signature.as_bytes());
        Self(FixedBytes([hash[0], hash[1], hash[2], hash[3]]))
    }

    /// The numeric value of the selector.
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0.0)
    }
}

/// `supportsInterface(bytes4)` from ERC-165.
pub const SUPPORTS_INTERFACE: Selector = Selector::from_u32(0x01ffc9a7);

/// Introspection selectors that are only routed when a facet declares them itself.
pub const RESERVED_INTROSPECTION: &[Selector] = &[SUPPORTS_INTERFACE];

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.as_u32())
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes: [u8; 4] = hex::decode(digits)
            .map_err(|e| format!("invalid selector '{}': {}", s, e))?
            .try_into()
            .map_err(|_| format!("invalid selector '{}': expected 4 bytes", s))?;
        Ok(Self(FixedBytes(bytes)))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
