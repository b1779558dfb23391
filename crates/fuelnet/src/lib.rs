// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! fuelnet: three-tier fuel distribution network
//!
//! Pumps sell fuel and report upward, distributors aggregate pumps and relay
//! reports, headquarters observes the whole network. Every tier talks the same
//! newline-delimited text protocol over TCP.
//!
//! # Features
//!
//! - **Pump**: per-grade ledgers, flat-file persistence, reconnecting
//!   distributor session with id handshake
//! - **Distributor**: pump accept loop, acknowledgments, report relay, sales
//!   tally, downward price push
//! - **Headquarters**: distributor accept loop, bounded inbound history
//!
//! # Quick Start
//!
//! ```bash
//! fuelnet-node headquarters --port 6000
//! fuelnet-node distributor --name Station_North --port 5000 --headquarters 127.0.0.1:6000
//! fuelnet-node pump --distributor-host 127.0.0.1 --distributor-port 5000 --stdin
//! ```
//!
//! # Wire format
//!
//! See [`protocol`] for the verbs and [`store`] for the state file layout.

pub mod config;
pub mod distributor;
pub mod error;
pub mod headquarters;
pub mod ledger;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod store;

pub use config::{ConfigError, DistributorConfig, HeadquartersConfig, PumpConfig};
pub use distributor::{DistributorNode, DistributorStatsSnapshot, SaleSummary};
pub use error::NodeError;
pub use headquarters::{HeadquarterNode, HeadquartersStatsSnapshot, InboundRecord, RecordKind};
pub use ledger::{FuelLedger, FuelType, LedgerMap, DEFAULT_PRICE};
pub use protocol::{Message, ProtocolError, Reply, StatusReport};
pub use pump::{ConnectionState, PumpId, PumpNode, TransactionGuard};
pub use session::{SessionError, Shutdown};
pub use store::{PersistedRecord, StateStore, StoreError};
