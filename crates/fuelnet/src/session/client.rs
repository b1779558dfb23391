// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnecting client side of a session.

use super::{LineConnection, SessionError, Shutdown};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing and framing for a reconnecting client.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Pause after a failed attempt or a closed session.
    pub delay: Duration,
    pub connect_timeout: Duration,
    pub max_line_len: usize,
}

/// Lifecycle events reported by [`run_reconnecting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// About to dial the target.
    Connecting,
    /// Transport established, session handler starting.
    Connected,
    /// Session over or attempt failed; backing off.
    Disconnected { reason: String },
}

/// Keep a session to `target` alive until `shutdown` fires.
///
/// Every successful connection is handed to `session`; when it returns (peer
/// closed or I/O error) or the connect attempt fails, the loop waits
/// `policy.delay` and dials again. Failures are never fatal.
pub async fn run_reconnecting<S, SFut, E>(
    label: &str,
    target: &str,
    policy: &ReconnectPolicy,
    shutdown: &Shutdown,
    mut on_event: E,
    mut session: S,
) where
    S: FnMut(LineConnection) -> SFut,
    SFut: Future<Output = Result<(), SessionError>>,
    E: FnMut(LinkEvent),
{
    while !shutdown.is_triggered() {
        on_event(LinkEvent::Connecting);
        let attempt = tokio::select! {
            result = LineConnection::connect(target, policy.connect_timeout, policy.max_line_len) => result,
            _ = shutdown.wait() => break,
        };

        let reason = match attempt {
            Ok(conn) => {
                info!("[{}] Connected to {}", label, target);
                on_event(LinkEvent::Connected);
                let outcome = tokio::select! {
                    outcome = session(conn) => outcome,
                    _ = shutdown.wait() => break,
                };
                match outcome {
                    Ok(()) => {
                        info!("[{}] Session with {} closed by peer", label, target);
                        "closed by peer".to_string()
                    }
                    Err(e) => {
                        warn!("[{}] Session with {} failed: {}", label, target, e);
                        e.to_string()
                    }
                }
            }
            Err(e) => {
                warn!("[{}] Cannot connect to {}: {}", label, target, e);
                e.to_string()
            }
        };

        on_event(LinkEvent::Disconnected { reason });
        info!("[{}] Retrying {} in {:?}", label, target, policy.delay);
        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = shutdown.wait() => break,
        }
    }

    on_event(LinkEvent::Disconnected {
        reason: "shutdown".to_string(),
    });
    debug!("[{}] Reconnect loop for {} stopped", label, target);
}
