// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex line-oriented sessions shared by every node kind.
//!
//! - [`LineConnection`]: one TCP stream, one message per line
//! - [`run_reconnecting`]: client side, redials after a fixed delay forever
//! - [`accept_loop`]: server side, one task per accepted peer
//! - [`PeerRegistry`]: connected downstream peers and their outbound queues
//! - [`UpstreamSlot`]: the single outbound session of a node, swapped on reconnect

use std::io;
use thiserror::Error;

pub mod client;
pub mod connection;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod upstream;

pub use client::{run_reconnecting, LinkEvent, ReconnectPolicy};
pub use connection::LineConnection;
pub use registry::{PeerInfo, PeerRegistry};
pub use server::{accept_loop, bind};
pub use shutdown::Shutdown;
pub use upstream::{UpstreamError, UpstreamSlot};

/// Longest accepted line, terminator excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Capacity of a session's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("peer did not complete the handshake")]
    Handshake,

    #[error("line handler failed: {0}")]
    Handler(#[from] tokio::task::JoinError),
}
