// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line-based wire protocol shared by pumps, distributors and headquarters.
//!
//! One message per newline-terminated UTF-8 line. Verbs are case-insensitive
//! and arguments are whitespace-separated. Both the English verbs and the
//! Spanish ones used by the field terminals are accepted on input; output
//! always uses the English form.
//!
//! ```text
//! CHARGE <fuel> <liters>           pump-local (alias CARGAR)
//! PRICE <fuel> <price>             distributor -> pump (alias PRECIO)
//! RESTOCK <fuel> <liters>          pump-local (alias REPONER)
//! STATUS_REQUEST                   distributor -> pump (alias ESTADO_SURTIDOR)
//! STATUS                           pump-local (alias MISURTIDOR)
//! TRANSACTION <id> <fuel> <liters> pump -> distributor (alias TRANSACCION)
//! IDENTIFIER / ID:<id>             identification handshake (alias IDENTIFICAR)
//! REPORT:<text>                    relayed upward (alias REPORTE:)
//! STATE:<id>|fuel:price:liters:charges;...
//! ACTIVE <name> <port>             distributor -> headquarters
//! ACK from <name>
//! OK: <text> / ERROR: <text>
//! EXIT                             closes the session (alias SALIR)
//! ```

use crate::ledger::{fmt_decimal, FuelType, LedgerMap, UnknownFuelType};
use crate::pump::{InvalidPumpId, PumpId};
use std::fmt;
use thiserror::Error;

/// Probe sent by a distributor right after accepting a pump.
pub const IDENTIFY_PROBE: &str = "IDENTIFIER";
/// Prefix of a pump's answer to the probe.
pub const ID_PREFIX: &str = "ID:";
/// Marker for messages eligible for relay to headquarters.
pub const REPORT_PREFIX: &str = "REPORT:";
/// Prefix of a pump status line.
pub const STATE_PREFIX: &str = "STATE:";

const REPORT_PREFIX_ALIAS: &str = "REPORTE:";

/// Protocol errors. Rendered into `ERROR:` replies.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("{verb} expects {expected} argument(s), got {got}")]
    WrongArity {
        verb: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{field} must be a number, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error(transparent)]
    UnknownFuel(#[from] UnknownFuelType),

    #[error(transparent)]
    InvalidPumpId(#[from] InvalidPumpId),

    #[error("malformed status line: {0}")]
    MalformedState(String),
}

/// Outcome reply to a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(String),
    Error(String),
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::Ok(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(text) => write!(f, "OK: {}", text),
            Self::Error(text) => write!(f, "ERROR: {}", text),
        }
    }
}

impl From<ProtocolError> for Reply {
    fn from(e: ProtocolError) -> Self {
        Self::Error(e.to_string())
    }
}

/// One fuel entry of a status line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub fuel: FuelType,
    pub price: f64,
    pub liters_consumed: f64,
    pub charges: u64,
}

/// Snapshot of a pump's ledgers as carried by `STATE:` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub pump: PumpId,
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn from_ledgers(pump: PumpId, ledgers: &LedgerMap) -> Self {
        Self {
            pump,
            entries: ledgers
                .values()
                .map(|l| StatusEntry {
                    fuel: l.fuel,
                    price: l.price,
                    liters_consumed: l.liters_consumed,
                    charges: l.charges,
                })
                .collect(),
        }
    }

    /// Parse the text following `STATE:`.
    fn parse_body(body: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedState(body.to_string());

        let (id, rest) = body.split_once('|').ok_or_else(malformed)?;
        let pump: PumpId = id.parse()?;

        let mut entries = Vec::new();
        for chunk in rest.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let parts: Vec<&str> = chunk.split(':').collect();
            if parts.len() != 4 {
                return Err(malformed());
            }
            entries.push(StatusEntry {
                fuel: parts[0].parse()?,
                price: parse_number("price", parts[1])?,
                liters_consumed: parse_number("liters", parts[2])?,
                charges: parts[3].parse().map_err(|_| ProtocolError::InvalidNumber {
                    field: "charges",
                    value: parts[3].to_string(),
                })?,
            });
        }

        Ok(Self { pump, entries })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}|", STATE_PREFIX, self.pump)?;
        for e in &self.entries {
            write!(
                f,
                "{}:{}:{}:{};",
                e.fuel,
                fmt_decimal(e.price),
                fmt_decimal(e.liters_consumed),
                e.charges
            )?;
        }
        Ok(())
    }
}

/// A decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Charge { fuel: FuelType, liters: f64 },
    Price { fuel: FuelType, price: f64 },
    Restock { fuel: FuelType, liters: f64 },
    StatusRequest,
    LocalStatus,
    Transaction {
        pump: PumpId,
        fuel: FuelType,
        liters: f64,
    },
    Identify,
    IdReply(PumpId),
    Report(String),
    State(StatusReport),
    Active { name: String, port: u16 },
    Ack { from: String },
    Reply(Reply),
    Exit,
}

impl Message {
    /// Decode a line.
    ///
    /// Returns `Ok(None)` for blank lines and unknown verbs, which callers
    /// ignore. Known verbs with bad arguments are errors.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if let Some(text) = strip_report_marker(line) {
            return Ok(Some(Self::Report(text.trim().to_string())));
        }
        if let Some(id) = strip_prefix_ci(line, ID_PREFIX) {
            return Ok(Some(Self::IdReply(id.parse()?)));
        }
        if let Some(body) = strip_prefix_ci(line, STATE_PREFIX) {
            return Ok(Some(Self::State(StatusReport::parse_body(body.trim())?)));
        }
        if let Some(text) = strip_prefix_ci(line, "OK:") {
            return Ok(Some(Self::Reply(Reply::ok(text.trim()))));
        }
        if let Some(text) = strip_prefix_ci(line, "ERROR:") {
            return Ok(Some(Self::Reply(Reply::error(text.trim()))));
        }

        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or_default().to_ascii_uppercase();
        let args: Vec<&str> = tokens.collect();

        let msg = match verb.as_str() {
            "CHARGE" | "CARGAR" => {
                expect_arity("CHARGE", &args, 2)?;
                Self::Charge {
                    fuel: args[0].parse()?,
                    liters: parse_positive("liters", args[1])?,
                }
            }
            "PRICE" | "PRECIO" => {
                expect_arity("PRICE", &args, 2)?;
                Self::Price {
                    fuel: args[0].parse()?,
                    price: parse_non_negative("price", args[1])?,
                }
            }
            "RESTOCK" | "REPONER" => {
                expect_arity("RESTOCK", &args, 2)?;
                Self::Restock {
                    fuel: args[0].parse()?,
                    liters: parse_positive("liters", args[1])?,
                }
            }
            "STATUS_REQUEST" | "ESTADO_SURTIDOR" => Self::StatusRequest,
            "STATUS" | "MISURTIDOR" => Self::LocalStatus,
            "TRANSACTION" | "TRANSACCION" => {
                expect_arity("TRANSACTION", &args, 3)?;
                Self::Transaction {
                    pump: args[0].parse()?,
                    fuel: args[1].parse()?,
                    liters: parse_positive("liters", args[2])?,
                }
            }
            "IDENTIFIER" | "IDENTIFICAR" => Self::Identify,
            "ACTIVE" => {
                expect_arity("ACTIVE", &args, 2)?;
                Self::Active {
                    name: args[0].to_string(),
                    port: args[1].parse().map_err(|_| ProtocolError::InvalidNumber {
                        field: "port",
                        value: args[1].to_string(),
                    })?,
                }
            }
            "ACK" => {
                let from = match args.split_first() {
                    Some((first, rest)) if first.eq_ignore_ascii_case("from") => rest.join(" "),
                    _ => args.join(" "),
                };
                Self::Ack { from }
            }
            "EXIT" | "SALIR" => Self::Exit,
            _ => return Ok(None),
        };

        Ok(Some(msg))
    }

    pub fn ack_from(name: impl Into<String>) -> Self {
        Self::Ack { from: name.into() }
    }

    /// Responses and acknowledgments need no further processing.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Ack { .. } | Self::Reply(_))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge { fuel, liters } => write!(f, "CHARGE {} {}", fuel, fmt_decimal(*liters)),
            Self::Price { fuel, price } => write!(f, "PRICE {} {}", fuel, fmt_decimal(*price)),
            Self::Restock { fuel, liters } => {
                write!(f, "RESTOCK {} {}", fuel, fmt_decimal(*liters))
            }
            Self::StatusRequest => f.write_str("STATUS_REQUEST"),
            Self::LocalStatus => f.write_str("STATUS"),
            Self::Transaction { pump, fuel, liters } => {
                write!(f, "TRANSACTION {} {} {}", pump, fuel, fmt_decimal(*liters))
            }
            Self::Identify => f.write_str(IDENTIFY_PROBE),
            Self::IdReply(id) => write!(f, "{}{}", ID_PREFIX, id),
            Self::Report(text) => write!(f, "{}{}", REPORT_PREFIX, text),
            Self::State(report) => write!(f, "{}", report),
            Self::Active { name, port } => write!(f, "ACTIVE {} {}", name, port),
            Self::Ack { from } => write!(f, "ACK from {}", from),
            Self::Reply(reply) => write!(f, "{}", reply),
            Self::Exit => f.write_str("EXIT"),
        }
    }
}

/// Whether a raw line carries the report marker.
pub fn is_report(line: &str) -> bool {
    strip_report_marker(line.trim_start()).is_some()
}

/// Envelope used when a distributor relays a report upward:
/// `REPORT:[<distributor>] <text>`.
pub fn relay_envelope(distributor: &str, line: &str) -> Option<String> {
    let text = strip_report_marker(line.trim_start())?;
    Some(format!("{}[{}] {}", REPORT_PREFIX, distributor, text.trim()))
}

fn strip_report_marker(line: &str) -> Option<&str> {
    strip_prefix_ci(line, REPORT_PREFIX).or_else(|| strip_prefix_ci(line, REPORT_PREFIX_ALIAS))
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn expect_arity(verb: &'static str, args: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::WrongArity {
            verb,
            expected,
            got: args.len(),
        })
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, ProtocolError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ProtocolError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

fn parse_positive(field: &'static str, raw: &str) -> Result<f64, ProtocolError> {
    let v = parse_number(field, raw)?;
    if v > 0.0 {
        Ok(v)
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value: raw.to_string(),
        })
    }
}

fn parse_non_negative(field: &'static str, raw: &str) -> Result<f64, ProtocolError> {
    let v = parse_number(field, raw)?;
    if v >= 0.0 {
        Ok(v)
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value: raw.to_string(),
        })
    }
}
