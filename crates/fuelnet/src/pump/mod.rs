// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pump node.
//!
//! A pump owns one ledger per fuel grade, persists them to its state file and
//! keeps a session open to its distributor. The distributor probes the pump
//! for its id, then pushes `PRICE` and `STATUS_REQUEST` commands; the pump
//! forwards every committed charge upward as a `TRANSACTION` line, and
//! operator reports as `REPORT:` lines.
//!
//! ```text
//! Disconnected -> Connecting -> Identifying -> Active
//!      ^                                          |
//!      +------------- I/O error / close ----------+  (backoff, then Connecting)
//! ```

mod id;

pub use id::{InvalidPumpId, PumpId, MAX_PUMP_ID};

use crate::config::PumpConfig;
use crate::error::NodeError;
use crate::ledger::{fmt_decimal, FuelType, LedgerMap};
use crate::protocol::{Message, Reply, StatusReport};
use crate::session::{
    run_reconnecting, LineConnection, LinkEvent, SessionError, Shutdown, UpstreamError,
    UpstreamSlot,
};
use crate::store::{StateStore, StoreError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where the pump's distributor session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport up, waiting for the distributor's probe.
    Identifying,
    Active,
}

struct PumpState {
    ledgers: LedgerMap,
    /// Open transactions. Mutations are refused while this is zero.
    busy: usize,
}

/// Marks the pump busy for as long as it is alive.
#[must_use = "the pump is only busy while the guard is held"]
pub struct TransactionGuard<'a> {
    node: &'a PumpNode,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.node.state.lock();
        state.busy = state.busy.saturating_sub(1);
    }
}

/// A fuel pump.
pub struct PumpNode {
    id: PumpId,
    config: PumpConfig,
    state: Mutex<PumpState>,
    store: StateStore,
    /// Serializes snapshot + write so the newest snapshot always lands last.
    persist_lock: Mutex<()>,
    upstream: UpstreamSlot,
    link: RwLock<ConnectionState>,
    shutdown: Shutdown,
}

impl PumpNode {
    /// Create pump `id`, replaying its saved ledgers from `config.state_file`.
    pub fn new(id: PumpId, config: PumpConfig) -> Self {
        let store =
            StateStore::new(config.state_file.clone()).with_default_price(config.default_price);
        let ledgers = store.load(id);
        Self {
            id,
            config,
            state: Mutex::new(PumpState { ledgers, busy: 0 }),
            store,
            persist_lock: Mutex::new(()),
            upstream: UpstreamSlot::new(),
            link: RwLock::new(ConnectionState::Disconnected),
            shutdown: Shutdown::new(),
        }
    }

    /// Validate `config`, pick an id and make sure the state file exists.
    ///
    /// The id comes from `config.pump_id` when set, otherwise it is the lowest
    /// id without saved lines.
    pub fn start(config: PumpConfig) -> Result<Arc<Self>, NodeError> {
        config.validate()?;
        let id = match config.pump_id {
            Some(id) => id,
            None => StateStore::new(config.state_file.clone()).assign_pump_id(),
        };

        let node = Arc::new(Self::new(id, config));
        if let Err(e) = node.ensure_state_file() {
            error!("[pump {}] Cannot create state file: {}", id, e);
        }
        info!(
            "[pump {}] Ready, state file {:?}",
            id,
            node.store.path()
        );
        Ok(node)
    }

    pub fn id(&self) -> PumpId {
        self.id
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Mark the pump busy until the returned guard is dropped.
    pub fn begin_transaction(&self) -> TransactionGuard<'_> {
        self.state.lock().busy += 1;
        TransactionGuard { node: self }
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy > 0
    }

    /// Record a charge and forward it to the distributor.
    ///
    /// Refused unless a transaction is open and `liters` is positive. A missing
    /// distributor session does not undo the charge.
    pub fn register_charge(&self, fuel: FuelType, liters: f64) -> bool {
        if !(liters.is_finite() && liters > 0.0) {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.busy == 0 {
                warn!("[pump {}] Charge refused, no open transaction", self.id);
                return false;
            }
            match state.ledgers.get_mut(&fuel) {
                Some(ledger) => ledger.register_charge(liters),
                None => return false,
            }
        }
        info!(
            "[pump {}] Charged {} L of {}",
            self.id,
            fmt_decimal(liters),
            fuel
        );

        let notice = Message::Transaction {
            pump: self.id,
            fuel,
            liters,
        };
        self.forward(&notice.to_string());
        true
    }

    /// Replace a price and persist.
    ///
    /// Refused unless a transaction is open and `price` is non-negative. A
    /// failed save is logged; the new price stays in effect.
    pub fn update_price(&self, fuel: FuelType, price: f64) -> bool {
        if !(price.is_finite() && price >= 0.0) {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.busy == 0 {
                warn!("[pump {}] Price update refused, no open transaction", self.id);
                return false;
            }
            match state.ledgers.get_mut(&fuel) {
                Some(ledger) => ledger.update_price(price),
                None => return false,
            }
        }
        info!(
            "[pump {}] Price of {} set to {}",
            self.id,
            fuel,
            fmt_decimal(price)
        );
        self.persist();
        true
    }

    /// Queue a `REPORT:` line for the distributor to relay to headquarters.
    ///
    /// Returns `false` for an empty report or when no distributor session can
    /// take it. Reports are not retried.
    pub fn send_report(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let line = Message::Report(text.to_string()).to_string();
        self.forward(&line)
    }

    /// Add stock to a fuel grade.
    pub fn restock(&self, fuel: FuelType, liters: f64) -> bool {
        if !(liters.is_finite() && liters > 0.0) {
            return false;
        }
        let mut state = self.state.lock();
        match state.ledgers.get_mut(&fuel) {
            Some(ledger) => {
                ledger.restock(liters);
                debug!(
                    "[pump {}] Restocked {} with {} L",
                    self.id,
                    fuel,
                    fmt_decimal(liters)
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of every ledger.
    pub fn ledgers(&self) -> LedgerMap {
        self.state.lock().ledgers.clone()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport::from_ledgers(self.id, &self.state.lock().ledgers)
    }

    /// Write the current ledgers to the state file.
    pub fn save_state(&self) -> Result<(), StoreError> {
        let _persist = self.persist_lock.lock();
        let snapshot = self.ledgers();
        self.store.save(self.id, &snapshot)
    }

    /// Replace the in-memory ledgers with the saved ones, or defaults.
    pub fn load_state(&self) {
        let ledgers = self.store.load(self.id);
        self.state.lock().ledgers = ledgers;
    }

    /// Write the initial state file if there is none yet.
    pub fn ensure_state_file(&self) -> Result<(), StoreError> {
        if self.store.exists() {
            return Ok(());
        }
        info!(
            "[pump {}] Creating state file {:?}",
            self.id,
            self.store.path()
        );
        self.save_state()
    }

    /// Run an operator command typed at the pump.
    ///
    /// Returns the line to show the operator.
    pub fn execute_local(&self, line: &str) -> String {
        let message = match Message::parse(line) {
            Ok(Some(message)) => message,
            Ok(None) => return Reply::error(format!("unknown command: {}", line.trim())).to_string(),
            Err(e) => return Reply::from(e).to_string(),
        };

        let reply = match message {
            Message::Charge { fuel, liters } => {
                let _tx = self.begin_transaction();
                if self.register_charge(fuel, liters) {
                    self.persist();
                    Reply::ok(format!("charged {} L of {}", fmt_decimal(liters), fuel))
                } else {
                    Reply::error(format!("charge of {} rejected", fuel))
                }
            }
            Message::Price { fuel, price } => self.apply_price(fuel, price),
            Message::Restock { fuel, liters } => {
                if self.restock(fuel, liters) {
                    Reply::ok(format!("restocked {} L of {}", fmt_decimal(liters), fuel))
                } else {
                    Reply::error(format!("restock of {} rejected", fuel))
                }
            }
            Message::Report(text) => {
                if self.send_report(&text) {
                    Reply::ok("report sent to distributor")
                } else if text.is_empty() {
                    Reply::error("empty report")
                } else {
                    Reply::error("report not sent, no distributor session")
                }
            }
            Message::LocalStatus | Message::StatusRequest => {
                return self.status_report().to_string()
            }
            other => Reply::error(format!("not a pump command: {}", other)),
        };
        reply.to_string()
    }

    /// Handle a line pushed by the distributor.
    ///
    /// Returns the reply to send back, if any. Acknowledgments, replies and
    /// unknown verbs are ignored.
    pub fn handle_remote(&self, line: &str) -> Option<String> {
        match Message::parse(line) {
            Ok(Some(Message::Price { fuel, price })) => {
                Some(self.apply_price(fuel, price).to_string())
            }
            Ok(Some(Message::StatusRequest)) => Some(self.status_report().to_string()),
            Ok(Some(Message::Identify)) => Some(Message::IdReply(self.id).to_string()),
            Ok(Some(message)) if message.is_informational() => {
                debug!("[pump {}] Distributor says: {}", self.id, line);
                None
            }
            Ok(_) => {
                debug!("[pump {}] Ignoring: {}", self.id, line);
                None
            }
            Err(e) => {
                warn!("[pump {}] Bad command {:?}: {}", self.id, line, e);
                Some(Reply::from(e).to_string())
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.link.read()
    }

    /// Whether a distributor session is currently attached.
    pub fn is_connected(&self) -> bool {
        self.upstream.is_attached()
    }

    /// Keep a session to the distributor at `target` (`host:port`) alive in
    /// the background until [`PumpNode::shutdown`].
    pub fn connect_to_distributor(self: &Arc<Self>, target: String) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let label = format!("pump {}", node.id);
            let policy = node.config.reconnect_policy();
            let shutdown = node.shutdown.clone();
            run_reconnecting(
                &label,
                &target,
                &policy,
                &shutdown,
                |event| node.on_link_event(event),
                |conn| {
                    let node = Arc::clone(&node);
                    async move { node.run_session(conn).await }
                },
            )
            .await;
        })
    }

    /// Stop the distributor session and flush state.
    pub fn shutdown(&self) {
        info!("[pump {}] Shutting down", self.id);
        self.shutdown.trigger();
        self.persist();
    }

    fn apply_price(&self, fuel: FuelType, price: f64) -> Reply {
        let _tx = self.begin_transaction();
        if self.update_price(fuel, price) {
            Reply::ok(format!("price of {} updated to {}", fuel, fmt_decimal(price)))
        } else {
            Reply::error(format!("price of {} not updated", fuel))
        }
    }

    fn persist(&self) {
        if let Err(e) = self.save_state() {
            error!("[pump {}] {}", self.id, e);
        }
    }

    fn forward(&self, line: &str) -> bool {
        match self.upstream.send(line) {
            Ok(()) => {
                debug!("[pump {}] Queued upstream: {}", self.id, line);
                true
            }
            Err(UpstreamError::Detached) => {
                debug!("[pump {}] No distributor session, not forwarded: {}", self.id, line);
                false
            }
            Err(UpstreamError::Full) => {
                warn!("[pump {}] Upstream queue full, dropped: {}", self.id, line);
                false
            }
        }
    }

    fn set_link(&self, state: ConnectionState) {
        *self.link.write() = state;
    }

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connecting => self.set_link(ConnectionState::Connecting),
            LinkEvent::Connected => self.set_link(ConnectionState::Identifying),
            LinkEvent::Disconnected { reason } => {
                debug!("[pump {}] Link down: {}", self.id, reason);
                self.set_link(ConnectionState::Disconnected);
            }
        }
    }

    async fn run_session(
        self: &Arc<Self>,
        mut conn: LineConnection,
    ) -> Result<(), SessionError> {
        if !self.identify(&mut conn).await? {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);
        self.upstream.attach(tx.clone());
        self.set_link(ConnectionState::Active);
        info!(
            "[pump {}] Registered with distributor {}",
            self.id,
            conn.peer_addr()
        );

        let result = self.exchange(&mut conn, &mut rx).await;
        self.upstream.detach(&tx);
        result
    }

    /// Wait for the probe and answer with our id. `Ok(false)` if the peer
    /// closed first.
    async fn identify(&self, conn: &mut LineConnection) -> Result<bool, SessionError> {
        let deadline = tokio::time::sleep(self.config.reconnect_policy().connect_timeout);
        tokio::pin!(deadline);

        loop {
            let line = tokio::select! {
                line = conn.read_line() => line?,
                _ = &mut deadline => return Err(SessionError::Handshake),
                _ = self.shutdown.wait() => return Ok(false),
            };
            match line {
                None => return Ok(false),
                Some(line) => {
                    if let Ok(Some(Message::Identify)) = Message::parse(&line) {
                        debug!("[pump {}] Identification requested", self.id);
                        conn.send_line(&Message::IdReply(self.id).to_string())
                            .await?;
                        return Ok(true);
                    }
                    debug!("[pump {}] Ignoring before identification: {}", self.id, line);
                }
            }
        }
    }

    async fn exchange(
        self: &Arc<Self>,
        conn: &mut LineConnection,
        rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                line = conn.read_line() => {
                    match line? {
                        Some(line) => {
                            debug!("[pump {}] <- {}", self.id, line);
                            // Price pushes rewrite the state file.
                            let node = Arc::clone(self);
                            let reply =
                                tokio::task::spawn_blocking(move || node.handle_remote(&line))
                                    .await?;
                            if let Some(reply) = reply {
                                conn.send_line(&reply).await?;
                            }
                        }
                        None => return Ok(()),
                    }
                }
                Some(out) = rx.recv() => {
                    debug!("[pump {}] -> {}", self.id, out);
                    conn.send_line(&out).await?;
                }
                _ = self.shutdown.wait() => {
                    let _ = conn.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}
