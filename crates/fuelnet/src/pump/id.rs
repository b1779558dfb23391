// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pump identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest pump id in the reference deployment. Ids run from 1 to this value.
pub const MAX_PUMP_ID: u32 = 4;

/// Id of a pump, always within `1..=MAX_PUMP_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PumpId(u32);

/// Raised for ids that are not numeric or fall outside the valid range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pump id '{0}' (expected 1..={max})", max = MAX_PUMP_ID)]
pub struct InvalidPumpId(pub String);

impl PumpId {
    pub fn new(raw: u32) -> Result<Self, InvalidPumpId> {
        if (1..=MAX_PUMP_ID).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(InvalidPumpId(raw.to_string()))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Every valid id, lowest first.
    pub fn all() -> impl Iterator<Item = PumpId> {
        (1..=MAX_PUMP_ID).map(PumpId)
    }

    /// Uniformly random valid id.
    pub fn random() -> Self {
        Self(fastrand::u32(1..=MAX_PUMP_ID))
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PumpId {
    type Err = InvalidPumpId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s
            .trim()
            .parse()
            .map_err(|_| InvalidPumpId(s.trim().to_string()))?;
        Self::new(raw)
    }
}

impl TryFrom<u32> for PumpId {
    type Error = InvalidPumpId;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<PumpId> for u32 {
    fn from(id: PumpId) -> u32 {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_id_range() {
        assert!(PumpId::new(0).is_err());
        assert!(PumpId::new(1).is_ok());
        assert!(PumpId::new(MAX_PUMP_ID).is_ok());
        assert!(PumpId::new(MAX_PUMP_ID + 1).is_err());
    }

    #[test]
    fn test_pump_id_parse() {
        assert_eq!("3".parse::<PumpId>().unwrap().get(), 3);
        assert_eq!(" 2 ".parse::<PumpId>().unwrap().get(), 2);
        assert!("S1".parse::<PumpId>().is_err());
        assert!("-1".parse::<PumpId>().is_err());
        assert!("9".parse::<PumpId>().is_err());
    }

    #[test]
    fn test_random_is_in_range() {
        for _ in 0..100 {
            let id = PumpId::random().get();
            assert!((1..=MAX_PUMP_ID).contains(&id));
        }
    }
}
