// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-pump sales tally built from `TRANSACTION` lines.

use crate::ledger::FuelType;
use crate::pump::PumpId;
use dashmap::DashMap;

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    liters: f64,
    count: u64,
}

/// Sales of one fuel grade at one pump.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleSummary {
    pub pump: PumpId,
    pub fuel: FuelType,
    pub liters: f64,
    pub count: u64,
}

/// Concurrent tally of sales reported by pumps.
#[derive(Default)]
pub struct SalesLedger {
    tallies: DashMap<(PumpId, FuelType), Tally>,
}

impl SalesLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pump: PumpId, fuel: FuelType, liters: f64) {
        let mut tally = self.tallies.entry((pump, fuel)).or_default();
        tally.liters += liters;
        tally.count += 1;
    }

    /// All tallies, ordered by pump then fuel.
    pub fn summaries(&self) -> Vec<SaleSummary> {
        let mut out: Vec<SaleSummary> = self
            .tallies
            .iter()
            .map(|entry| {
                let (pump, fuel) = *entry.key();
                SaleSummary {
                    pump,
                    fuel,
                    liters: entry.liters,
                    count: entry.count,
                }
            })
            .collect();
        out.sort_by_key(|s| (s.pump, s.fuel));
        out
    }

    /// Liters sold by `pump` across every grade.
    pub fn total_liters(&self, pump: PumpId) -> f64 {
        self.tallies
            .iter()
            .filter(|entry| entry.key().0 == pump)
            .map(|entry| entry.liters)
            .sum()
    }
}
