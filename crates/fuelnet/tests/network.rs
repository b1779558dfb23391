// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability
#![allow(clippy::float_cmp)] // Test assertions with constants

//! End-to-end tests over loopback TCP.
//!
//! Every node binds `127.0.0.1:0` and reconnect delays are shortened so the
//! whole suite runs in a few seconds.

use fuelnet::{
    ConnectionState, DistributorConfig, DistributorNode, FuelType, HeadquarterNode,
    HeadquartersConfig, PumpConfig, PumpId, PumpNode, RecordKind,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const DISTRIBUTOR: &str = "Station_Test";

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn distributor_config(port: u16, headquarters: SocketAddr) -> DistributorConfig {
    DistributorConfig {
        name: DISTRIBUTOR.into(),
        bind_address: "127.0.0.1".parse().unwrap(),
        port,
        headquarters_address: headquarters.to_string(),
        reconnect_delay_ms: 50,
        connect_timeout_ms: 500,
        ..Default::default()
    }
}

fn pump_config(state_file: &Path, id: u32, distributor: SocketAddr) -> PumpConfig {
    PumpConfig {
        pump_id: Some(PumpId::new(id).unwrap()),
        distributor_host: distributor.ip().to_string(),
        distributor_port: distributor.port(),
        state_file: state_file.to_path_buf(),
        reconnect_delay_ms: 50,
        connect_timeout_ms: 500,
        ..Default::default()
    }
}

/// An address nothing is listening on (yet).
async fn free_addr() -> SocketAddr {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap()
}

async fn start_distributor(
    port: u16,
    headquarters: SocketAddr,
) -> (Arc<DistributorNode>, SocketAddr) {
    for _ in 0..50 {
        let node = DistributorNode::new(distributor_config(port, headquarters));
        if let Ok(addr) = node.start().await {
            return (node, addr);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("distributor could not bind port {}", port);
}

struct RawPump {
    reader: BufReader<TcpStream>,
}

impl RawPump {
    async fn connect(addr: SocketAddr, id: u32) -> Self {
        let mut pump = Self {
            reader: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        };
        assert_eq!(pump.recv().await, "IDENTIFIER");
        pump.send(&format!("ID:{}", id)).await;
        assert!(pump.recv().await.starts_with("OK:"));
        pump
    }

    async fn send(&mut self, line: &str) {
        self.reader
            .get_mut()
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(3), self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line.trim_end().to_string()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_registers_and_receives_pushed_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (distributor, addr) = start_distributor(0, free_addr().await).await;

    let pump = PumpNode::start(pump_config(&dir.path().join("state.txt"), 3, addr)).unwrap();
    let link = pump.connect_to_distributor(pump.config().distributor_address());
    let id = pump.id();

    eventually("pump registration", || {
        distributor.pumps().iter().any(|p| p.label.as_deref() == Some("3"))
    })
    .await;
    eventually("pump active", || pump.connection_state() == ConnectionState::Active).await;

    assert_eq!(distributor.push_price(FuelType::Diesel, 1250.0), 1);
    eventually("price applied", || {
        pump.ledgers()[&FuelType::Diesel].price == 1250.0
    })
    .await;

    distributor.request_status();
    eventually("status received", || {
        distributor
            .latest_state(id)
            .is_some_and(|s| s.entries.iter().any(|e| e.price == 1250.0))
    })
    .await;

    {
        let _tx = pump.begin_transaction();
        assert!(pump.register_charge(FuelType::Gas95, 40.0));
    }
    eventually("transaction tallied", || !distributor.sales().is_empty()).await;
    let sale = &distributor.sales()[0];
    assert_eq!(
        (sale.pump, sale.fuel, sale.liters, sale.count),
        (id, FuelType::Gas95, 40.0, 1)
    );

    // The price push was persisted by the pump.
    let reloaded = PumpNode::new(id, pump.config().clone());
    assert_eq!(reloaded.ledgers()[&FuelType::Diesel].price, 1250.0);

    pump.shutdown();
    tokio::time::timeout(Duration::from_secs(2), link)
        .await
        .unwrap()
        .unwrap();
    distributor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reports_are_relayed_only_while_headquarters_is_up() {
    let hq_addr = free_addr().await;
    let (distributor, addr) = start_distributor(0, hq_addr).await;
    let mut pump = RawPump::connect(addr, 1).await;

    pump.send("REPORTE:low-stock").await;
    assert_eq!(pump.recv().await, format!("ACK from {}", DISTRIBUTOR));
    assert_eq!(distributor.stats().reports_dropped, 1);

    let hq = HeadquarterNode::new(HeadquartersConfig {
        bind_address: hq_addr.ip(),
        port: hq_addr.port(),
        ..Default::default()
    });
    hq.start().await.unwrap();
    eventually("distributor announced", || {
        hq.distributors()
            .iter()
            .any(|d| d.label.as_deref() == Some(DISTRIBUTOR))
    })
    .await;
    eventually("upstream attached", || distributor.is_upstream_connected()).await;

    pump.send("hello headquarters").await;
    assert_eq!(pump.recv().await, format!("ACK from {}", DISTRIBUTOR));
    pump.send("TRANSACTION 1 93 5.0").await;
    assert_eq!(pump.recv().await, format!("ACK from {}", DISTRIBUTOR));
    pump.send("REPORT:pump 1 nozzle jammed").await;
    assert_eq!(pump.recv().await, format!("ACK from {}", DISTRIBUTOR));

    eventually("report received", || hq.reports().len() == 1).await;
    let report = &hq.reports()[0];
    assert_eq!(report.line, format!("REPORT:[{}] pump 1 nozzle jammed", DISTRIBUTOR));
    assert_eq!(report.from, DISTRIBUTOR);

    // Only the announce and the report made it upstream; the early report was
    // never retried.
    let history = hq.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, RecordKind::Message);
    assert!(history[0].line.starts_with("ACTIVE Station_Test"));
    assert_eq!(distributor.stats().reports_forwarded, 1);

    hq.shutdown();
    distributor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn headquarters_price_reaches_pumps() {
    let hq = HeadquarterNode::new(HeadquartersConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..Default::default()
    });
    let hq_addr = hq.start().await.unwrap();
    let (distributor, addr) = start_distributor(0, hq_addr).await;
    let mut pump = RawPump::connect(addr, 2).await;

    eventually("distributor announced", || hq.distributor_count() == 1).await;
    eventually("upstream attached", || distributor.is_upstream_connected()).await;

    assert_eq!(hq.broadcast("PRICE 97 1415.5"), 1);
    assert_eq!(pump.recv().await, "PRICE 97 1415.5");

    hq.shutdown();
    distributor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_report_reaches_headquarters() {
    let dir = tempfile::tempdir().unwrap();
    let hq = HeadquarterNode::new(HeadquartersConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..Default::default()
    });
    let hq_addr = hq.start().await.unwrap();
    let (distributor, addr) = start_distributor(0, hq_addr).await;
    eventually("upstream attached", || distributor.is_upstream_connected()).await;

    let pump = PumpNode::start(pump_config(&dir.path().join("state.txt"), 1, addr)).unwrap();
    let _link = pump.connect_to_distributor(pump.config().distributor_address());
    eventually("pump active", || pump.connection_state() == ConnectionState::Active).await;

    assert_eq!(
        pump.execute_local("REPORTE: tank 93 below 10%"),
        "OK: report sent to distributor"
    );
    eventually("report received", || hq.reports().len() == 1).await;
    assert_eq!(
        hq.reports()[0].line,
        format!("REPORT:[{}] tank 93 below 10%", DISTRIBUTOR)
    );
    assert_eq!(distributor.stats().reports_forwarded, 1);

    pump.shutdown();
    distributor.shutdown();
    hq.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_reconnects_after_distributor_restart() {
    let dir = tempfile::tempdir().unwrap();
    let hq_addr = free_addr().await;
    let (first, addr) = start_distributor(0, hq_addr).await;

    let pump = PumpNode::start(pump_config(&dir.path().join("state.txt"), 2, addr)).unwrap();
    let _link = pump.connect_to_distributor(pump.config().distributor_address());
    eventually("first registration", || first.pump_count() == 1).await;

    first.shutdown();
    eventually("pump notices", || pump.connection_state() != ConnectionState::Active).await;

    let (second, _) = start_distributor(addr.port(), hq_addr).await;
    eventually("second registration", || second.pump_count() == 1).await;
    eventually("pump active again", || pump.connection_state() == ConnectionState::Active).await;

    // Charges made while connected reach the new distributor.
    {
        let _tx = pump.begin_transaction();
        assert!(pump.register_charge(FuelType::Kerosene, 8.0));
    }
    eventually("transaction tallied", || second.stats().transactions == 1).await;

    pump.shutdown();
    second.shutdown();
}

#[tokio::test]
async fn pump_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.txt");
    let addr = free_addr().await;

    let pump = PumpNode::start(pump_config(&path, 2, addr)).unwrap();
    assert!(path.exists());
    assert!(pump.execute_local("CARGAR 93 10").starts_with("OK:"));
    assert!(pump.execute_local("CARGAR 93 2.5").starts_with("OK:"));
    pump.shutdown();

    // Another pump sharing the file keeps pump 2's lines intact.
    let other = PumpNode::start(pump_config(&path, 4, addr)).unwrap();
    other.save_state().unwrap();

    let restarted = PumpNode::start(pump_config(&path, 2, addr)).unwrap();
    let ledger = &restarted.ledgers()[&FuelType::Gas93];
    assert_eq!(ledger.liters_consumed, 12.5);
    assert_eq!(ledger.charges, 2);
    assert_eq!(restarted.ledgers().len(), FuelType::ALL.len());
}
