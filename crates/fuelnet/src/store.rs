// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flat-file persistence for pump ledgers.
//!
//! The file holds one record per (pump id, fuel type):
//!
//! ```text
//! id,fuelType,litersConsumed,price[,charges]
//! ```
//!
//! Several pumps may share one file. Every rewrite drops lines whose id is not
//! a valid pump id, replaces the saving pump's lines and passes the other
//! pumps' lines through untouched. Four-field lines are accepted on load; their
//! charge count is estimated from the liters sold.

use crate::ledger::{default_ledgers, fmt_decimal, FuelLedger, FuelType, LedgerMap, DEFAULT_PRICE};
use crate::pump::PumpId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Average liters per charge, used to estimate charge counts for legacy lines.
const LEGACY_LITERS_PER_CHARGE: f64 = 10.0;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line of the state file.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub pump: PumpId,
    pub fuel: FuelType,
    pub liters_consumed: f64,
    pub price: f64,
    /// Missing on legacy four-field lines.
    pub charges: Option<u64>,
}

impl PersistedRecord {
    pub fn from_ledger(pump: PumpId, ledger: &FuelLedger) -> Self {
        Self {
            pump,
            fuel: ledger.fuel,
            liters_consumed: ledger.liters_consumed,
            price: ledger.price,
            charges: Some(ledger.charges),
        }
    }

    /// Parse a line. Returns `None` for anything malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != 4 && fields.len() != 5 {
            return None;
        }

        let pump = fields[0].parse().ok()?;
        let fuel = fields[1].parse().ok()?;
        let liters_consumed: f64 = fields[2].parse().ok()?;
        let price: f64 = fields[3].parse().ok()?;
        if !is_non_negative(liters_consumed) || !is_non_negative(price) {
            return None;
        }
        let charges = match fields.get(4) {
            Some(raw) => Some(raw.parse().ok()?),
            None => None,
        };

        Some(Self {
            pump,
            fuel,
            liters_consumed,
            price,
            charges,
        })
    }

    /// Convert to a ledger, estimating the charge count if the line had none.
    pub fn into_ledger(self) -> FuelLedger {
        let charges = self
            .charges
            .unwrap_or_else(|| (self.liters_consumed / LEGACY_LITERS_PER_CHARGE) as u64);
        FuelLedger {
            fuel: self.fuel,
            liters_consumed: self.liters_consumed,
            charges,
            price: self.price,
            available: 0.0,
        }
    }
}

impl fmt::Display for PersistedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.pump,
            self.fuel,
            fmt_decimal(self.liters_consumed),
            fmt_decimal(self.price)
        )?;
        if let Some(charges) = self.charges {
            write!(f, ",{}", charges)?;
        }
        Ok(())
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Pump id carried by the first field of a line, if it is a valid one.
fn line_pump_id(line: &str) -> Option<PumpId> {
    line.split(',').next()?.parse().ok()
}

/// Result of a load, with the number of rows that matched the pump.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub ledgers: LedgerMap,
    pub rows_applied: usize,
}

/// State file owned by one pump process.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    default_price: f64,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_price: DEFAULT_PRICE,
            write_lock: Mutex::new(()),
        }
    }

    /// Price used when seeding ledgers that have no saved row.
    pub fn with_default_price(mut self, price: f64) -> Self {
        self.default_price = price;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_price(&self) -> f64 {
        self.default_price
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load ledgers for `pump`, seeding the full catalog first.
    pub fn try_load(&self, pump: PumpId) -> Result<LoadOutcome, StoreError> {
        let mut ledgers = default_ledgers(self.default_price);
        let mut rows_applied = 0;

        for line in self.read_lines()? {
            if line.trim().is_empty() {
                continue;
            }
            match PersistedRecord::parse(&line) {
                Some(record) if record.pump == pump => {
                    ledgers.insert(record.fuel, record.into_ledger());
                    rows_applied += 1;
                }
                Some(_) => {}
                None => debug!("Skipping malformed state line: {:?}", line),
            }
        }

        Ok(LoadOutcome {
            ledgers,
            rows_applied,
        })
    }

    /// Load ledgers for `pump`, falling back to defaults on any read failure.
    pub fn load(&self, pump: PumpId) -> LedgerMap {
        match self.try_load(pump) {
            Ok(outcome) => {
                if outcome.rows_applied == 0 {
                    info!("No saved state for pump {} in {:?}", pump, self.path);
                } else {
                    debug!(
                        "Loaded {} saved ledgers for pump {}",
                        outcome.rows_applied, pump
                    );
                }
                outcome.ledgers
            }
            Err(e) => {
                error!("{}; using default ledgers for pump {}", e, pump);
                default_ledgers(self.default_price)
            }
        }
    }

    /// Rewrite the file with `pump`'s ledgers replacing its previous lines.
    pub fn save(&self, pump: PumpId, ledgers: &LedgerMap) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        let mut lines: Vec<String> = self
            .read_lines()?
            .into_iter()
            .filter(|line| matches!(line_pump_id(line), Some(id) if id != pump))
            .collect();

        lines.extend(
            ledgers
                .values()
                .map(|ledger| PersistedRecord::from_ledger(pump, ledger).to_string()),
        );

        let mut content = lines.join("\n");
        content.push('\n');
        self.write_atomic(&content)
    }

    /// Ids that already own at least one valid line.
    pub fn used_ids(&self) -> Result<BTreeSet<PumpId>, StoreError> {
        Ok(self
            .read_lines()?
            .iter()
            .filter_map(|line| line_pump_id(line))
            .collect())
    }

    /// Lowest id with no saved lines, or a random one when all are taken.
    pub fn assign_pump_id(&self) -> PumpId {
        let used = self.used_ids().unwrap_or_else(|e| {
            warn!("{}; assuming no pump ids in use", e);
            BTreeSet::new()
        });

        PumpId::all()
            .find(|id| !used.contains(id))
            .unwrap_or_else(PumpId::random)
    }

    fn read_lines(&self) -> Result<Vec<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_atomic(&self, content: &str) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(raw: u32) -> PumpId {
        PumpId::new(raw).unwrap()
    }

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.txt"))
    }

    #[test]
    fn test_record_parse_and_format() {
        let record = PersistedRecord::parse("2,93,10.0,100.0,1").unwrap();
        assert_eq!(record.pump, pump(2));
        assert_eq!(record.fuel, FuelType::Gas93);
        assert_eq!(record.charges, Some(1));
        assert_eq!(record.to_string(), "2,93,10.0,100.0,1");
    }

    #[test]
    fn test_record_parse_rejects_malformed() {
        assert!(PersistedRecord::parse("").is_none());
        assert!(PersistedRecord::parse("2,93,10.0").is_none());
        assert!(PersistedRecord::parse("S1,93,10.0,100.0").is_none());
        assert!(PersistedRecord::parse("7,93,10.0,100.0").is_none());
        assert!(PersistedRecord::parse("2,98,10.0,100.0").is_none());
        assert!(PersistedRecord::parse("2,93,abc,100.0").is_none());
        assert!(PersistedRecord::parse("2,93,-1.0,100.0").is_none());
        assert!(PersistedRecord::parse("2,93,1.0,100.0,x").is_none());
        assert!(PersistedRecord::parse("2,93,1.0,100.0,1,extra").is_none());
    }

    #[test]
    fn test_legacy_line_estimates_charges() {
        let ledger = PersistedRecord::parse("1,Diesel,35.0,990.5")
            .unwrap()
            .into_ledger();
        assert_eq!(ledger.charges, 3);
        assert_eq!(ledger.price, 990.5);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let outcome = store.try_load(pump(2)).unwrap();
        assert_eq!(outcome.rows_applied, 0);
        assert_eq!(outcome.ledgers.len(), FuelType::ALL.len());
        for ledger in outcome.ledgers.values() {
            assert_eq!(ledger.liters_consumed, 0.0);
            assert_eq!(ledger.charges, 0);
            assert_eq!(ledger.price, DEFAULT_PRICE);
        }
    }

    #[test]
    fn test_load_uses_configured_default_price() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_default_price(850.0);
        let ledgers = store.load(pump(1));
        assert!(ledgers.values().all(|l| l.price == 850.0));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut ledgers = default_ledgers(DEFAULT_PRICE);
        if let Some(l) = ledgers.get_mut(&FuelType::Gas93) {
            l.register_charge(10.0);
        }
        if let Some(l) = ledgers.get_mut(&FuelType::Kerosene) {
            l.register_charge(3.3);
            l.register_charge(4.4);
            l.update_price(777.7);
        }
        store.save(pump(2), &ledgers).unwrap();

        let loaded = store.load(pump(2));
        let gas = &loaded[&FuelType::Gas93];
        assert_eq!(gas.liters_consumed, 10.0);
        assert_eq!(gas.charges, 1);
        let kerosene = &loaded[&FuelType::Kerosene];
        assert_eq!(kerosene.liters_consumed, 3.3 + 4.4);
        assert_eq!(kerosene.charges, 2);
        assert_eq!(kerosene.price, 777.7);
    }

    #[test]
    fn test_save_keeps_other_pumps_and_drops_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            "1,93,5.0,100.0\nS1,93,1.0,1.0\n9,95,1.0,1.0\n2,95,99.0,1.0\n4,Diesel,7.0,120.0,2\nx1\n",
        )
        .unwrap();

        store.save(pump(2), &default_ledgers(DEFAULT_PRICE)).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines.contains(&"1,93,5.0,100.0"));
        assert!(lines.contains(&"4,Diesel,7.0,120.0,2"));
        assert!(!content.contains("S1"));
        assert!(!content.contains("x1"));
        assert!(!lines.iter().any(|l| l.starts_with("9,")));
        assert!(!lines.contains(&"2,95,99.0,1.0"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("2,")).count(), 5);
    }

    #[test]
    fn test_load_ignores_other_pumps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "1,93,50.0,100.0,5\n3,93,7.0,90.0,1\n").unwrap();

        let loaded = store.try_load(pump(3)).unwrap();
        assert_eq!(loaded.rows_applied, 1);
        assert_eq!(loaded.ledgers[&FuelType::Gas93].liters_consumed, 7.0);
        assert_eq!(loaded.ledgers[&FuelType::Gas93].price, 90.0);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("data/nested/state.txt"));
        store.save(pump(1), &default_ledgers(DEFAULT_PRICE)).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_assign_pump_id_lowest_free() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.assign_pump_id(), pump(1));

        std::fs::write(store.path(), "1,93,0.0,100.0\n3,93,0.0,100.0\nS2,93,0.0,1.0\n").unwrap();
        assert_eq!(store.assign_pump_id(), pump(2));
    }

    #[test]
    fn test_assign_pump_id_all_taken_falls_back_to_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            "1,93,0.0,1.0\n2,93,0.0,1.0\n3,93,0.0,1.0\n4,93,0.0,1.0\n",
        )
        .unwrap();
        for _ in 0..20 {
            let id = store.assign_pump_id().get();
            assert!((1..=4).contains(&id));
        }
    }
}
