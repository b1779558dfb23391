// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Accepting side of a session.

use super::{LineConnection, Shutdown};
use crate::error::NodeError;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Bind a listening socket. Failure here is fatal for the node.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NodeError> {
    TcpListener::bind(addr).await.map_err(|source| NodeError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Accept connections until `shutdown` fires, spawning `handler` for each.
pub async fn accept_loop<H, HFut>(
    label: &str,
    listener: TcpListener,
    shutdown: &Shutdown,
    max_line_len: usize,
    mut handler: H,
) where
    H: FnMut(LineConnection) -> HFut,
    HFut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        info!("[{}] New connection from {}", label, peer_addr);
                        tokio::spawn(handler(LineConnection::new(stream, peer_addr, max_line_len)));
                    }
                    Err(e) => {
                        error!("[{}] Accept error: {}", label, e);
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                }
            }
            _ = shutdown.wait() => {
                info!("[{}] Shutdown signal received, no longer accepting", label);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let taken = first.local_addr().unwrap();
        assert!(matches!(bind(taken).await, Err(NodeError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_accept_loop_spawns_handlers() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                accept_loop("echo", listener, &shutdown, 1024, |mut conn| async move {
                    while let Ok(Some(line)) = conn.read_line().await {
                        if conn.send_line(&line.to_uppercase()).await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            })
        };

        for _ in 0..2 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping\n").await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line, "PING\n");
        }

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
