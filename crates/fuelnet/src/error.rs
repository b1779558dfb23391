// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

/// Errors that stop a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Node already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
