// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! Every node reads an optional JSON file; missing fields take defaults. The
//! binary applies command-line overrides on top.

use crate::ledger::DEFAULT_PRICE;
use crate::pump::PumpId;
use crate::session::{ReconnectPolicy, DEFAULT_MAX_LINE_LEN, DEFAULT_OUTBOUND_QUEUE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the distributor host a pump connects to.
pub const ENV_DISTRIBUTOR_HOST: &str = "DISTRIBUTOR_HOST";
/// Environment variable naming the distributor port a pump connects to.
pub const ENV_DISTRIBUTOR_PORT: &str = "DISTRIBUTOR_PORT";
/// Older deployments name the variables in Spanish; read when the English one is unset.
pub const ENV_DISTRIBUTOR_HOST_ALIAS: &str = "DISTRIBUIDOR_HOST";
pub const ENV_DISTRIBUTOR_PORT_ALIAS: &str = "DISTRIBUIDOR_PORT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_distributor_host() -> String {
    "distributor".to_string()
}

fn default_distributor_port() -> u16 {
    6000
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/app/data/pump_state.txt")
}

fn default_price() -> f64 {
    DEFAULT_PRICE
}

fn default_pump_reconnect_ms() -> u64 {
    10_000
}

fn default_distributor_name() -> String {
    "Station_North".to_string()
}

fn default_distributor_listen_port() -> u16 {
    5000
}

fn default_headquarters_address() -> String {
    "127.0.0.1:6000".to_string()
}

fn default_distributor_reconnect_ms() -> u64 {
    5_000
}

fn default_headquarters_name() -> String {
    "Headquarters".to_string()
}

fn default_headquarters_port() -> u16 {
    6000
}

fn default_history_capacity() -> usize {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    4_000
}

fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

fn default_outbound_queue() -> usize {
    DEFAULT_OUTBOUND_QUEUE
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

fn check_framing(max_line_len: usize, outbound_queue: usize) -> Result<(), ConfigError> {
    if max_line_len == 0 {
        return Err(ConfigError::Invalid("max_line_len cannot be 0".into()));
    }
    if outbound_queue == 0 {
        return Err(ConfigError::Invalid("outbound_queue cannot be 0".into()));
    }
    Ok(())
}

/// Pump node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Fixed pump id; assigned from the state file when absent.
    #[serde(default)]
    pub pump_id: Option<PumpId>,

    /// Distributor host (default: distributor)
    #[serde(default = "default_distributor_host")]
    pub distributor_host: String,

    /// Distributor port (default: 6000)
    #[serde(default = "default_distributor_port")]
    pub distributor_port: u16,

    /// Ledger record file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Price seeded into ledgers with no saved row
    #[serde(default = "default_price")]
    pub default_price: f64,

    /// Delay before redialing the distributor (milliseconds)
    #[serde(default = "default_pump_reconnect_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            pump_id: None,
            distributor_host: default_distributor_host(),
            distributor_port: default_distributor_port(),
            state_file: default_state_file(),
            default_price: default_price(),
            reconnect_delay_ms: default_pump_reconnect_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_line_len: default_max_line_len(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl PumpConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Overlay `DISTRIBUTOR_HOST` / `DISTRIBUTOR_PORT` from the process environment,
    /// falling back to `DISTRIBUIDOR_HOST` / `DISTRIBUIDOR_PORT`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let lookup = |key: &'static str, alias: &'static str| {
            get(key)
                .map(|value| (key, value))
                .or_else(|| get(alias).map(|value| (alias, value)))
        };
        if let Some((_, host)) = lookup(ENV_DISTRIBUTOR_HOST, ENV_DISTRIBUTOR_HOST_ALIAS)
            .filter(|(_, h)| !h.trim().is_empty())
        {
            self.distributor_host = host.trim().to_string();
        }
        if let Some((key, port)) = lookup(ENV_DISTRIBUTOR_PORT, ENV_DISTRIBUTOR_PORT_ALIAS) {
            self.distributor_port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} is not a port: {}", key, port)))?;
        }
        Ok(())
    }

    /// `host:port` of the upstream distributor.
    pub fn distributor_address(&self) -> String {
        format!("{}:{}", self.distributor_host, self.distributor_port)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_line_len: self.max_line_len,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.distributor_host.trim().is_empty() {
            return Err(ConfigError::Invalid("distributor_host cannot be empty".into()));
        }
        if self.distributor_port == 0 {
            return Err(ConfigError::Invalid("distributor_port cannot be 0".into()));
        }
        if self.state_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("state_file cannot be empty".into()));
        }
        if !self.default_price.is_finite() || self.default_price < 0.0 {
            return Err(ConfigError::Invalid(
                "default_price must be a non-negative number".into(),
            ));
        }
        check_framing(self.max_line_len, self.outbound_queue)
    }
}

/// Distributor node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Distributor name, used in acknowledgments and relayed reports
    #[serde(default = "default_distributor_name")]
    pub name: String,

    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Port pumps connect to (default: 5000)
    #[serde(default = "default_distributor_listen_port")]
    pub port: u16,

    /// Headquarters `host:port`
    #[serde(default = "default_headquarters_address")]
    pub headquarters_address: String,

    /// Delay before redialing headquarters (milliseconds)
    #[serde(default = "default_distributor_reconnect_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            name: default_distributor_name(),
            bind_address: default_bind_address(),
            port: default_distributor_listen_port(),
            headquarters_address: default_headquarters_address(),
            reconnect_delay_ms: default_distributor_reconnect_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_line_len: default_max_line_len(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl DistributorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_line_len: self.max_line_len,
        }
    }

    /// Port 0 is accepted and means "any free port".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() || self.name.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "name must be a single non-empty word".into(),
            ));
        }
        if self.headquarters_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "headquarters_address cannot be empty".into(),
            ));
        }
        check_framing(self.max_line_len, self.outbound_queue)
    }
}

/// Headquarters node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadquartersConfig {
    #[serde(default = "default_headquarters_name")]
    pub name: String,

    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Port distributors connect to (default: 6000)
    #[serde(default = "default_headquarters_port")]
    pub port: u16,

    /// Inbound records kept in memory
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for HeadquartersConfig {
    fn default() -> Self {
        Self {
            name: default_headquarters_name(),
            bind_address: default_bind_address(),
            port: default_headquarters_port(),
            history_capacity: default_history_capacity(),
            max_line_len: default_max_line_len(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl HeadquartersConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name cannot be empty".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity cannot be 0".into(),
            ));
        }
        check_framing(self.max_line_len, self.outbound_queue)
    }
}
