// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! fuelnet node runner
//!
//! Runs one tier of the fuel network per process.
//!
//! # Usage
//!
//! ```bash
//! # Headquarters on the default port (6000)
//! fuelnet-node headquarters
//!
//! # Distributor on port 5001, reporting to a remote headquarters
//! fuelnet-node distributor --name Station_South --port 5001 --headquarters hq.local:6000
//!
//! # Pump with an operator prompt on stdin
//! DISTRIBUTOR_HOST=127.0.0.1 DISTRIBUTOR_PORT=5001 fuelnet-node pump --stdin
//!
//! # Write a default configuration file
//! fuelnet-node gen-config distributor --output distributor.json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use fuelnet::{
    ConfigError, DistributorConfig, DistributorNode, HeadquarterNode, HeadquartersConfig,
    Message, PumpConfig, PumpId, PumpNode,
};
use std::io::BufRead;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// fuelnet - pump, distributor and headquarters nodes
#[derive(Parser, Debug)]
#[command(name = "fuelnet-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pump
    Pump {
        /// Configuration file (JSON format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Distributor host (overrides DISTRIBUTOR_HOST)
        #[arg(long)]
        distributor_host: Option<String>,

        /// Distributor port (overrides DISTRIBUTOR_PORT)
        #[arg(long)]
        distributor_port: Option<u16>,

        /// Ledger record file
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Fixed pump id; assigned from the state file when omitted
        #[arg(long)]
        pump_id: Option<u32>,

        /// Read operator commands (CARGAR, PRECIO, REPONER, MISURTIDOR) from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Run a distributor
    Distributor {
        /// Configuration file (JSON format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Distributor name
        #[arg(short, long)]
        name: Option<String>,

        /// TCP port pumps connect to
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (0.0.0.0 for all interfaces)
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Headquarters address (host:port)
        #[arg(long)]
        headquarters: Option<String>,
    },

    /// Run headquarters
    Headquarters {
        /// Configuration file (JSON format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Headquarters name
        #[arg(short, long)]
        name: Option<String>,

        /// TCP port distributors connect to
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (0.0.0.0 for all interfaces)
        #[arg(short, long)]
        bind: Option<IpAddr>,
    },

    /// Generate a default configuration file
    GenConfig {
        role: Role,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Role {
    Pump,
    Distributor,
    Headquarters,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    match args.command {
        Commands::Pump {
            config,
            distributor_host,
            distributor_port,
            state_file,
            pump_id,
            stdin,
        } => {
            let mut cfg = load_or_default::<PumpConfig>(config.as_deref(), PumpConfig::from_file)?;
            cfg.apply_env()?;
            if let Some(host) = distributor_host {
                cfg.distributor_host = host;
            }
            if let Some(port) = distributor_port {
                cfg.distributor_port = port;
            }
            if let Some(path) = state_file {
                cfg.state_file = path;
            }
            if let Some(raw) = pump_id {
                cfg.pump_id = Some(PumpId::new(raw)?);
            }
            run_pump(cfg, stdin).await
        }
        Commands::Distributor {
            config,
            name,
            port,
            bind,
            headquarters,
        } => {
            let mut cfg = load_or_default::<DistributorConfig>(
                config.as_deref(),
                DistributorConfig::from_file,
            )?;
            if let Some(name) = name {
                cfg.name = name;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(bind) = bind {
                cfg.bind_address = bind;
            }
            if let Some(hq) = headquarters {
                cfg.headquarters_address = hq;
            }
            run_distributor(cfg).await
        }
        Commands::Headquarters {
            config,
            name,
            port,
            bind,
        } => {
            let mut cfg = load_or_default::<HeadquartersConfig>(
                config.as_deref(),
                HeadquartersConfig::from_file,
            )?;
            if let Some(name) = name {
                cfg.name = name;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(bind) = bind {
                cfg.bind_address = bind;
            }
            run_headquarters(cfg).await
        }
        Commands::GenConfig { role, output } => {
            match role {
                Role::Pump => PumpConfig::default().to_file(&output)?,
                Role::Distributor => DistributorConfig::default().to_file(&output)?,
                Role::Headquarters => HeadquartersConfig::default().to_file(&output)?,
            }
            println!("Wrote default {:?} configuration to {:?}", role, output);
            Ok(())
        }
    }
}

fn load_or_default<T: Default>(
    path: Option<&Path>,
    load: fn(&Path) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading config from {:?}", path);
            load(path)
        }
        None => Ok(T::default()),
    }
}

async fn run_pump(config: PumpConfig, stdin: bool) -> Result<(), Box<dyn std::error::Error>> {
    let pump = PumpNode::start(config)?;
    let target = pump.config().distributor_address();

    info!("+----------------------------------------------------+");
    info!(
        "|       fuelnet pump v{}                          |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Pump:        {:36} |", pump.id().to_string());
    info!("|  Distributor: {:36} |", target);
    info!(
        "|  State file:  {:36} |",
        pump.config().state_file.display().to_string()
    );
    info!("+----------------------------------------------------+");

    let link = pump.connect_to_distributor(target);
    let operator = if stdin {
        Some(spawn_stdin_reader()?)
    } else {
        None
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping pump...");
        }
        () = operator_prompt(&pump, operator), if stdin => {
            info!("Operator session ended, stopping pump...");
        }
    }

    pump.shutdown();
    link.await?;
    info!("Pump {} stopped", pump.id());
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
///
/// The thread is left blocked on stdin when the process exits.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("operator-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Cannot read operator input: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Feed operator lines to the pump until EOF or `EXIT`.
async fn operator_prompt(pump: &PumpNode, lines: Option<mpsc::Receiver<String>>) {
    let Some(mut lines) = lines else {
        return;
    };
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        if matches!(Message::parse(&line), Ok(Some(Message::Exit))) {
            break;
        }
        println!("{}", pump.execute_local(&line));
    }
}

async fn run_distributor(config: DistributorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let headquarters = config.headquarters_address.clone();
    let node = DistributorNode::new(config);
    let addr = node.start().await?;

    info!("+----------------------------------------------------+");
    info!(
        "|       fuelnet distributor v{}                   |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Name:         {:35} |", node.name());
    info!("|  Bind:         {:35} |", addr);
    info!("|  Headquarters: {:35} |", headquarters);
    info!("+----------------------------------------------------+");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping distributor...");
    node.shutdown();

    let stats = node.stats();
    info!(
        "Final: {} messages, {} transactions, {} reports forwarded, {} dropped",
        stats.messages_received, stats.transactions, stats.reports_forwarded, stats.reports_dropped
    );
    for sale in node.sales() {
        info!(
            "  pump {} {:>8}: {} L in {} charge(s)",
            sale.pump,
            sale.fuel.code(),
            sale.liters,
            sale.count
        );
    }
    Ok(())
}

async fn run_headquarters(config: HeadquartersConfig) -> Result<(), Box<dyn std::error::Error>> {
    let node = HeadquarterNode::new(config);
    let addr = node.start().await?;

    info!("+----------------------------------------------------+");
    info!(
        "|       fuelnet headquarters v{}                  |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Name:  {:42} |", node.name());
    info!("|  Bind:  {:42} |", addr);
    info!("+----------------------------------------------------+");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping headquarters...");
    node.shutdown();

    let stats = node.stats();
    info!(
        "Final: {} messages, {} reports from {} connection(s)",
        stats.messages, stats.reports, stats.connections
    );
    Ok(())
}
