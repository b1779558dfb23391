// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Why a line could not be handed to the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("no upstream session attached")]
    Detached,

    #[error("upstream outbound queue is full")]
    Full,
}

/// Swappable handle to the current outbound session.
///
/// Only the reconnect loop attaches and detaches; senders read it under the
/// same lock, so a send never races a swap.
#[derive(Default)]
pub struct UpstreamSlot {
    tx: RwLock<Option<mpsc::Sender<String>>>,
}

impl UpstreamSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, tx: mpsc::Sender<String>) {
        *self.tx.write() = Some(tx);
    }

    /// Detach `tx` if it is still the attached session.
    pub fn detach(&self, tx: &mpsc::Sender<String>) {
        let mut slot = self.tx.write();
        if slot.as_ref().is_some_and(|current| current.same_channel(tx)) {
            *slot = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tx
            .read()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `line` on the attached session without waiting.
    pub fn send(&self, line: impl Into<String>) -> Result<(), UpstreamError> {
        let slot = self.tx.read();
        let tx = slot.as_ref().ok_or(UpstreamError::Detached)?;
        tx.try_send(line.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => UpstreamError::Full,
            mpsc::error::TrySendError::Closed(_) => UpstreamError::Detached,
        })
    }
}
