// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distributor node.
//!
//! Accepts pump sessions on its listening port and keeps one session open to
//! headquarters. Every pump line except `EXIT` is acknowledged; lines carrying
//! the report marker are relayed upward as `REPORT:[<name>] <text>`. Price
//! updates received from headquarters are pushed down to every pump.

mod sales;

pub use sales::{SaleSummary, SalesLedger};

use crate::config::DistributorConfig;
use crate::error::NodeError;
use crate::ledger::{fmt_decimal, FuelType};
use crate::protocol::{is_report, relay_envelope, Message, Reply, StatusReport};
use crate::pump::PumpId;
use crate::session::{
    accept_loop, bind, run_reconnecting, LineConnection, LinkEvent, PeerInfo, PeerRegistry,
    SessionError, Shutdown, UpstreamError, UpstreamSlot,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Traffic counters for a distributor.
#[derive(Debug)]
pub struct DistributorStats {
    /// Lines received from pumps, `EXIT` excluded.
    pub messages_received: AtomicU64,
    pub acks_sent: AtomicU64,
    /// Reports handed to the headquarters session.
    pub reports_forwarded: AtomicU64,
    /// Reports lost because headquarters was unreachable.
    pub reports_dropped: AtomicU64,
    pub transactions: AtomicU64,
    pub started: Instant,
}

impl DistributorStats {
    fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            reports_forwarded: AtomicU64::new(0),
            reports_dropped: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> DistributorStatsSnapshot {
        DistributorStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            reports_forwarded: self.reports_forwarded.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Point-in-time copy of [`DistributorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributorStatsSnapshot {
    pub messages_received: u64,
    pub acks_sent: u64,
    pub reports_forwarded: u64,
    pub reports_dropped: u64,
    pub transactions: u64,
    pub uptime_secs: u64,
}

/// A station aggregating pumps.
pub struct DistributorNode {
    config: DistributorConfig,
    pumps: PeerRegistry,
    upstream: UpstreamSlot,
    sales: SalesLedger,
    latest_state: DashMap<PumpId, StatusReport>,
    stats: DistributorStats,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown: Shutdown,
}

impl DistributorNode {
    pub fn new(config: DistributorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pumps: PeerRegistry::new(),
            upstream: UpstreamSlot::new(),
            sales: SalesLedger::new(),
            latest_state: DashMap::new(),
            stats: DistributorStats::new(),
            local_addr: RwLock::new(None),
            shutdown: Shutdown::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bind the pump port, then run the accept loop and the headquarters
    /// session in the background.
    ///
    /// Returns the bound address. Only a bind failure or an invalid
    /// configuration is an error.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        self.config.validate()?;
        if self.local_addr.read().is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let listener = bind(self.config.listen_address()).await?;
        let local = listener.local_addr()?;
        *self.local_addr.write() = Some(local);
        info!("[{}] Listening for pumps on {}", self.config.name, local);

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let shutdown = node.shutdown.clone();
            accept_loop(
                &node.config.name,
                listener,
                &shutdown,
                node.config.max_line_len,
                |conn| {
                    let node = Arc::clone(&node);
                    async move { node.handle_pump(conn).await }
                },
            )
            .await;
        });

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let shutdown = node.shutdown.clone();
            let target = node.config.headquarters_address.clone();
            let policy = node.config.reconnect_policy();
            let label = node.config.name.clone();
            run_reconnecting(
                &label,
                &target,
                &policy,
                &shutdown,
                |event| {
                    if let LinkEvent::Disconnected { reason } = event {
                        debug!("[{}] Headquarters link down: {}", label, reason);
                    }
                },
                |conn| {
                    let node = Arc::clone(&node);
                    async move { node.run_upstream(conn, local.port()).await }
                },
            )
            .await;
        });

        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Queue `line` for every connected pump. Returns how many accepted it.
    pub fn broadcast_to_pumps(&self, line: &str) -> usize {
        let sent = self.pumps.broadcast(line);
        info!(
            "[{}] Pushed to {} pump(s): {}",
            self.config.name, sent, line
        );
        sent
    }

    /// Push a price change to every connected pump.
    pub fn push_price(&self, fuel: FuelType, price: f64) -> usize {
        self.broadcast_to_pumps(&Message::Price { fuel, price }.to_string())
    }

    /// Ask every connected pump for its `STATE:` line.
    pub fn request_status(&self) -> usize {
        self.broadcast_to_pumps(&Message::StatusRequest.to_string())
    }

    /// Queue `line` for pump `id`. Returns `false` if it is not connected.
    pub fn send_to_pump(&self, id: PumpId, line: &str) -> bool {
        self.pumps.send_to_label(&id.to_string(), line) > 0
    }

    pub fn pump_count(&self) -> usize {
        self.pumps.len()
    }

    pub fn pumps(&self) -> Vec<PeerInfo> {
        self.pumps.peers()
    }

    /// Whether the headquarters session is up.
    pub fn is_upstream_connected(&self) -> bool {
        self.upstream.is_attached()
    }

    pub fn sales(&self) -> Vec<SaleSummary> {
        self.sales.summaries()
    }

    /// Last `STATE:` line received from pump `id`.
    pub fn latest_state(&self, id: PumpId) -> Option<StatusReport> {
        self.latest_state.get(&id).map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> DistributorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting pumps and close every session.
    pub fn shutdown(&self) {
        info!("[{}] Shutting down", self.config.name);
        self.shutdown.trigger();
    }

    async fn handle_pump(&self, mut conn: LineConnection) {
        let addr = conn.peer_addr();
        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);
        self.pumps.register(addr, tx);

        if let Err(e) = self.serve_pump(&mut conn, &mut rx).await {
            warn!("[{}] Pump session {} failed: {}", self.config.name, addr, e);
        }

        if let Some(peer) = self.pumps.unregister(&addr) {
            info!(
                "[{}] Pump {} disconnected ({})",
                self.config.name,
                peer.label.as_deref().unwrap_or("anonymous"),
                addr
            );
        }
    }

    async fn serve_pump(
        &self,
        conn: &mut LineConnection,
        rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), SessionError> {
        let addr = conn.peer_addr();
        conn.send_line(&Message::Identify.to_string()).await?;

        let first = tokio::select! {
            line = conn.read_line() => line?,
            _ = self.shutdown.wait() => return Ok(()),
        };
        let Some(first) = first else {
            return Ok(());
        };
        match Message::parse(&first) {
            Ok(Some(Message::IdReply(id))) => {
                self.pumps.set_label(&addr, id.to_string());
                info!("[{}] Pump {} registered from {}", self.config.name, id, addr);
                let confirm =
                    Reply::ok(format!("pump {} registered with {}", id, self.config.name));
                conn.send_line(&confirm.to_string()).await?;
            }
            _ => {
                info!(
                    "[{}] Peer {} did not identify, serving as anonymous pump",
                    self.config.name, addr
                );
                if !self.on_pump_line(conn, &first).await? {
                    return Ok(());
                }
            }
        }

        loop {
            tokio::select! {
                line = conn.read_line() => {
                    match line? {
                        Some(line) => {
                            if !self.on_pump_line(conn, &line).await? {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                Some(out) = rx.recv() => {
                    debug!("[{}] -> {}: {}", self.config.name, addr, out);
                    conn.send_line(&out).await?;
                }
                _ = self.shutdown.wait() => {
                    let _ = conn.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Process one pump line. Returns `false` once the pump asked to leave.
    async fn on_pump_line(
        &self,
        conn: &mut LineConnection,
        line: &str,
    ) -> Result<bool, SessionError> {
        let addr = conn.peer_addr();
        let parsed = Message::parse(line);
        if matches!(parsed, Ok(Some(Message::Exit))) {
            info!("[{}] Pump {} sent EXIT", self.config.name, addr);
            return Ok(false);
        }

        debug!("[{}] <- {}: {}", self.config.name, addr, line);
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        if is_report(line) {
            self.relay(line);
        } else {
            match parsed {
                Ok(Some(Message::Transaction { pump, fuel, liters })) => {
                    self.stats.transactions.fetch_add(1, Ordering::Relaxed);
                    self.sales.record(pump, fuel, liters);
                    info!(
                        "[{}] Sale at pump {}: {} L of {}",
                        self.config.name,
                        pump,
                        fmt_decimal(liters),
                        fuel
                    );
                }
                Ok(Some(Message::State(report))) => {
                    debug!("[{}] Status from pump {}", self.config.name, report.pump);
                    self.latest_state.insert(report.pump, report);
                }
                Ok(Some(Message::IdReply(id))) => {
                    self.pumps.set_label(&addr, id.to_string());
                }
                Ok(_) => {}
                Err(e) => debug!("[{}] Unparsed line from {}: {}", self.config.name, addr, e),
            }
        }

        conn.send_line(&Message::ack_from(self.config.name.as_str()).to_string())
            .await?;
        self.stats.acks_sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn relay(&self, line: &str) {
        let Some(envelope) = relay_envelope(&self.config.name, line) else {
            return;
        };
        match self.upstream.send(envelope) {
            Ok(()) => {
                self.stats.reports_forwarded.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] Report relayed: {}", self.config.name, line);
            }
            Err(e) => {
                self.stats.reports_dropped.fetch_add(1, Ordering::Relaxed);
                match e {
                    UpstreamError::Detached => {
                        info!("[{}] Headquarters offline, report dropped", self.config.name)
                    }
                    UpstreamError::Full => {
                        warn!("[{}] Headquarters queue full, report dropped", self.config.name)
                    }
                }
            }
        }
    }

    async fn run_upstream(&self, mut conn: LineConnection, port: u16) -> Result<(), SessionError> {
        let announce = Message::Active {
            name: self.config.name.clone(),
            port,
        };
        conn.send_line(&announce.to_string()).await?;

        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);
        self.upstream.attach(tx.clone());
        info!(
            "[{}] Announced to headquarters {}",
            self.config.name,
            conn.peer_addr()
        );

        let result = self.exchange_upstream(&mut conn, &mut rx).await;
        self.upstream.detach(&tx);
        result
    }

    async fn exchange_upstream(
        &self,
        conn: &mut LineConnection,
        rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                line = conn.read_line() => {
                    match line? {
                        Some(line) => self.on_headquarters_line(&line),
                        None => return Ok(()),
                    }
                }
                Some(out) = rx.recv() => {
                    conn.send_line(&out).await?;
                }
                _ = self.shutdown.wait() => {
                    let _ = conn.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    fn on_headquarters_line(&self, line: &str) {
        match Message::parse(line) {
            Ok(Some(Message::Price { fuel, price })) => {
                self.push_price(fuel, price);
            }
            Ok(Some(Message::StatusRequest)) => {
                self.request_status();
            }
            Ok(_) => info!("[{}] From headquarters: {}", self.config.name, line),
            Err(e) => warn!(
                "[{}] Bad line from headquarters {:?}: {}",
                self.config.name, line, e
            ),
        }
    }
}
