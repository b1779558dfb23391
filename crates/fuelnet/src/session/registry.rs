// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected downstream peers, indexed by remote address.
//!
//! Each accepted connection registers the sending side of its outbound
//! channel; the connection task drains the channel onto the socket. Pushing a
//! line to a peer therefore never blocks on that peer's socket.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::warn;

struct PeerEntry {
    label: Option<String>,
    tx: mpsc::Sender<String>,
    connected_at: SystemTime,
}

/// Public view of a registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    /// Name the peer identified itself with, if any.
    pub label: Option<String>,
    pub connected_at: SystemTime,
}

/// Concurrent set of connected peers.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<SocketAddr, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: SocketAddr, tx: mpsc::Sender<String>) {
        self.peers.insert(
            addr,
            PeerEntry {
                label: None,
                tx,
                connected_at: SystemTime::now(),
            },
        );
    }

    /// Attach a name to a registered peer. Returns `false` if it is gone.
    pub fn set_label(&self, addr: &SocketAddr, label: impl Into<String>) -> bool {
        match self.peers.get_mut(addr) {
            Some(mut entry) => {
                entry.label = Some(label.into());
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.remove(addr).map(|(addr, entry)| PeerInfo {
            addr,
            label: entry.label,
            connected_at: entry.connected_at,
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn label_of(&self, addr: &SocketAddr) -> Option<String> {
        self.peers.get(addr).and_then(|entry| entry.label.clone())
    }

    /// Snapshot of all peers, in no particular order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .map(|entry| PeerInfo {
                addr: *entry.key(),
                label: entry.label.clone(),
                connected_at: entry.connected_at,
            })
            .collect()
    }

    /// Queue `line` for every peer. Returns how many accepted it.
    pub fn broadcast(&self, line: &str) -> usize {
        let mut sent = 0;
        for entry in self.peers.iter() {
            if Self::push(entry.key(), &entry.tx, line) {
                sent += 1;
            }
        }
        sent
    }

    /// Queue `line` for the peer at `addr`.
    pub fn send_to(&self, addr: &SocketAddr, line: &str) -> bool {
        match self.peers.get(addr) {
            Some(entry) => Self::push(addr, &entry.tx, line),
            None => false,
        }
    }

    /// Queue `line` for every peer labelled `label`. Returns how many accepted it.
    pub fn send_to_label(&self, label: &str, line: &str) -> usize {
        let mut sent = 0;
        for entry in self.peers.iter() {
            if entry.label.as_deref() == Some(label) && Self::push(entry.key(), &entry.tx, line) {
                sent += 1;
            }
        }
        sent
    }

    fn push(addr: &SocketAddr, tx: &mpsc::Sender<String>, line: &str) -> bool {
        match tx.try_send(line.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping line", addr);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register(addr(1000), tx);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&addr(1000)));

        assert!(registry.set_label(&addr(1000), "pump-2"));
        assert_eq!(registry.label_of(&addr(1000)).as_deref(), Some("pump-2"));

        let info = registry.unregister(&addr(1000)).unwrap();
        assert_eq!(info.label.as_deref(), Some("pump-2"));
        assert!(registry.is_empty());
        assert!(!registry.set_label(&addr(1000), "gone"));
    }

    #[test]
    fn test_broadcast_reaches_live_peers() {
        let registry = PeerRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        registry.register(addr(1), tx_a);
        registry.register(addr(2), tx_b);
        drop(rx_b);

        assert_eq!(registry.broadcast("PRICE 93 1000.0"), 1);
        assert_eq!(rx_a.try_recv().unwrap(), "PRICE 93 1000.0");
    }

    #[test]
    fn test_send_to_label_and_full_queue() {
        let registry = PeerRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(addr(7), tx);
        registry.set_label(&addr(7), "North");

        assert_eq!(registry.send_to_label("South", "x"), 0);
        assert_eq!(registry.send_to_label("North", "first"), 1);
        assert!(!registry.send_to(&addr(7), "second"));
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(registry.send_to(&addr(7), "third"));
    }

    #[test]
    fn test_peers_snapshot() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(addr(3), tx.clone());
        registry.register(addr(4), tx);
        let mut addrs: Vec<_> = registry.peers().into_iter().map(|p| p.addr).collect();
        addrs.sort();
        assert_eq!(addrs, vec![addr(3), addr(4)]);
    }
}
