// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuel catalog and per-fuel ledgers.
//!
//! A pump keeps one [`FuelLedger`] per catalog entry. Ledgers are plain data;
//! the owning [`PumpNode`](crate::pump::PumpNode) serializes access to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default unit price for a freshly seeded ledger.
pub const DEFAULT_PRICE: f64 = 100.0;

/// Fuel grades sold by every pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FuelType {
    /// 93 octane gasoline
    Gas93,
    /// 95 octane gasoline
    Gas95,
    /// 97 octane gasoline
    Gas97,
    Diesel,
    Kerosene,
}

impl FuelType {
    /// Full catalog, in wire order.
    pub const ALL: [FuelType; 5] = [
        FuelType::Gas93,
        FuelType::Gas95,
        FuelType::Gas97,
        FuelType::Diesel,
        FuelType::Kerosene,
    ];

    /// Wire code for this grade.
    pub fn code(self) -> &'static str {
        match self {
            Self::Gas93 => "93",
            Self::Gas95 => "95",
            Self::Gas97 => "97",
            Self::Diesel => "Diesel",
            Self::Kerosene => "Kerosene",
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a code is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fuel type: {0}")]
pub struct UnknownFuelType(pub String);

impl FromStr for FuelType {
    type Err = UnknownFuelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Self::ALL
            .into_iter()
            .find(|fuel| fuel.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| UnknownFuelType(code.to_string()))
    }
}

/// Counters and price for one fuel grade at one pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelLedger {
    pub fuel: FuelType,
    /// Cumulative liters sold. Only grows.
    pub liters_consumed: f64,
    /// Number of completed charges. Only grows.
    pub charges: u64,
    /// Current unit price.
    pub price: f64,
    /// Quantity on hand, informational.
    pub available: f64,
}

impl FuelLedger {
    /// A ledger with zeroed counters at the given price.
    pub fn new(fuel: FuelType, price: f64) -> Self {
        Self {
            fuel,
            liters_consumed: 0.0,
            charges: 0,
            price,
            available: 0.0,
        }
    }

    /// Record a completed charge of `liters`.
    ///
    /// Callers validate that `liters` is positive and finite.
    pub fn register_charge(&mut self, liters: f64) {
        self.liters_consumed += liters;
        self.charges += 1;
    }

    /// Replace the unit price.
    pub fn update_price(&mut self, price: f64) {
        self.price = price;
    }

    /// Add `liters` to the quantity on hand.
    pub fn restock(&mut self, liters: f64) {
        self.available += liters;
    }
}

/// Full set of ledgers for one pump, keyed and ordered by fuel type.
pub type LedgerMap = BTreeMap<FuelType, FuelLedger>;

/// Seed every catalog entry with zero counters and `price`.
pub fn default_ledgers(price: f64) -> LedgerMap {
    FuelType::ALL
        .into_iter()
        .map(|fuel| (fuel, FuelLedger::new(fuel, price)))
        .collect()
}

/// Format a decimal so that whole numbers keep a trailing `.0`.
pub(crate) fn fmt_decimal(value: f64) -> String {
    format!("{:?}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuel_type_parse_is_case_insensitive() {
        assert_eq!("93".parse::<FuelType>().unwrap(), FuelType::Gas93);
        assert_eq!("diesel".parse::<FuelType>().unwrap(), FuelType::Diesel);
        assert_eq!(" KEROSENE ".parse::<FuelType>().unwrap(), FuelType::Kerosene);
        assert!("98".parse::<FuelType>().is_err());
    }

    #[test]
    fn test_fuel_type_display_matches_code() {
        for fuel in FuelType::ALL {
            assert_eq!(fuel.to_string().parse::<FuelType>().unwrap(), fuel);
        }
    }

    #[test]
    fn test_register_charge_accumulates() {
        let mut ledger = FuelLedger::new(FuelType::Gas95, DEFAULT_PRICE);
        ledger.register_charge(10.0);
        ledger.register_charge(2.5);
        assert_eq!(ledger.liters_consumed, 12.5);
        assert_eq!(ledger.charges, 2);
        assert_eq!(ledger.price, DEFAULT_PRICE);
    }

    #[test]
    fn test_update_price_and_restock() {
        let mut ledger = FuelLedger::new(FuelType::Diesel, DEFAULT_PRICE);
        ledger.update_price(1234.5);
        ledger.restock(500.0);
        assert_eq!(ledger.price, 1234.5);
        assert_eq!(ledger.available, 500.0);
        assert_eq!(ledger.charges, 0);
    }

    #[test]
    fn test_default_ledgers_cover_catalog() {
        let ledgers = default_ledgers(42.0);
        assert_eq!(ledgers.len(), FuelType::ALL.len());
        assert!(ledgers.values().all(|l| l.price == 42.0 && l.charges == 0));
    }

    #[test]
    fn test_fmt_decimal_keeps_fraction() {
        assert_eq!(fmt_decimal(100.0), "100.0");
        assert_eq!(fmt_decimal(10.25), "10.25");
    }
}
