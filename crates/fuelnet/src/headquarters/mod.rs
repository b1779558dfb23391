// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Headquarters node: passive sink for distributor traffic.

use crate::config::HeadquartersConfig;
use crate::error::NodeError;
use crate::protocol::{is_report, Message};
use crate::session::{
    accept_loop, bind, LineConnection, PeerInfo, PeerRegistry, SessionError, Shutdown,
};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What an inbound line was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Report,
    Message,
}

/// A line received from a distributor.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    /// Distributor name, or its address until it announced itself.
    pub from: String,
    pub kind: RecordKind,
    pub line: String,
    pub received_at: SystemTime,
}

#[derive(Debug, Default)]
pub struct HeadquartersStats {
    pub messages: AtomicU64,
    pub reports: AtomicU64,
    pub connections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadquartersStatsSnapshot {
    pub messages: u64,
    pub reports: u64,
    pub connections: u64,
}

impl HeadquartersStats {
    pub fn snapshot(&self) -> HeadquartersStatsSnapshot {
        HeadquartersStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            reports: self.reports.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Root of the network.
pub struct HeadquarterNode {
    config: HeadquartersConfig,
    distributors: PeerRegistry,
    history: Mutex<VecDeque<InboundRecord>>,
    stats: HeadquartersStats,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown: Shutdown,
}

impl HeadquarterNode {
    pub fn new(config: HeadquartersConfig) -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            config,
            distributors: PeerRegistry::new(),
            stats: HeadquartersStats::default(),
            local_addr: RwLock::new(None),
            shutdown: Shutdown::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bind and accept distributors in the background. Returns the bound address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        self.config.validate()?;
        if self.local_addr.read().is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let listener = bind(self.config.listen_address()).await?;
        let local = listener.local_addr()?;
        *self.local_addr.write() = Some(local);
        info!("[{}] Listening for distributors on {}", self.config.name, local);

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
                    async move { node.handle_distributor(conn).await }
                },
            )
            .await;
        });

        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Queue `line` for every connected distributor.
    pub fn broadcast(&self, line: &str) -> usize {
        let sent = self.distributors.broadcast(line);
        info!(
            "[{}] Pushed to {} distributor(s): {}",
            self.config.name, sent, line
        );
        sent
    }

    /// Queue `line` for the distributor that announced itself as `name`.
    pub fn send_to(&self, name: &str, line: &str) -> bool {
        self.distributors.send_to_label(name, line) > 0
    }

    pub fn distributor_count(&self) -> usize {
        self.distributors.len()
    }

    pub fn distributors(&self) -> Vec<PeerInfo> {
        self.distributors.peers()
    }

    /// Retained inbound lines, oldest first.
    pub fn history(&self) -> Vec<InboundRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Retained reports, oldest first.
    pub fn reports(&self) -> Vec<InboundRecord> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.kind == RecordKind::Report)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> HeadquartersStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shutdown(&self) {
        info!("[{}] Shutting down", self.config.name);
        self.shutdown.trigger();
    }

    async fn handle_distributor(&self, mut conn: LineConnection) {
        let addr = conn.peer_addr();
        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);
        self.distributors.register(addr, tx);
        self.stats.connections.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.serve(&mut conn, &mut rx).await {
            warn!("[{}] Session {} failed: {}", self.config.name, addr, e);
        }

        if let Some(peer) = self.distributors.unregister(&addr) {
            info!(
                "[{}] Distributor {} disconnected",
                self.config.name,
                peer.label.unwrap_or_else(|| addr.to_string())
            );
        }
    }

    async fn serve(
        &self,
        conn: &mut LineConnection,
        rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), SessionError> {
        let addr = conn.peer_addr();
        loop {
            tokio::select! {
                line = conn.read_line() => {
                    match line? {
                        Some(line) => self.record(addr, line),
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

    fn record(&self, addr: SocketAddr, line: String) {
        if let Ok(Some(Message::Active { name, port })) = Message::parse(&line) {
            info!(
                "[{}] Distributor {} active at {}:{}",
                self.config.name,
                name,
                addr.ip(),
                port
            );
            self.distributors.set_label(&addr, name);
        }

        let from = self
            .distributors
            .label_of(&addr)
            .unwrap_or_else(|| addr.to_string());
        let kind = if is_report(&line) {
            self.stats.reports.fetch_add(1, Ordering::Relaxed);
            info!("[{}] Report from {}: {}", self.config.name, from, line);
            RecordKind::Report
        } else {
            debug!("[{}] <- {}: {}", self.config.name, from, line);
            RecordKind::Message
        };

        let mut history = self.history.lock();
        if history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(InboundRecord {
            from,
            kind,
            line,
            received_at: SystemTime::now(),
        });
        drop(history);
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
    }
}
