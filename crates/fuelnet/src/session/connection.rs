// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Newline-delimited TCP connection.

use super::SessionError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A connected peer exchanging one message per line.
pub struct LineConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    max_line_len: usize,
    read_buffer: Vec<u8>,
}

impl LineConnection {
    /// Wrap an accepted or connected stream.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_line_len: usize) -> Self {
        stream.set_nodelay(true).ok();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            peer_addr,
            max_line_len,
            read_buffer: Vec::with_capacity(256),
        }
    }

    /// Connect to `addr` (`host:port`), giving up after `connect_timeout`.
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        max_line_len: usize,
    ) -> Result<Self, SessionError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::ConnectTimeout(addr.to_string()))??;
        let peer_addr = stream.peer_addr()?;
        Ok(Self::new(stream, peer_addr, max_line_len))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next line without its terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Partial input is
    /// kept across calls, so this is safe to use as a `tokio::select!` branch.
    pub async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        loop {
            let limit = (self.max_line_len + 1).saturating_sub(self.read_buffer.len()) as u64;
            let n = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.read_buffer)
                .await?;

            if self.read_buffer.last() == Some(&b'\n') {
                return self.take_line().map(Some);
            }
            if self.read_buffer.len() > self.max_line_len {
                self.read_buffer.clear();
                return Err(SessionError::LineTooLong(self.max_line_len));
            }
            if n == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                // Last line without a terminator.
                return self.take_line().map(Some);
            }
        }
    }

    /// Write `line` followed by a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write side.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    fn take_line(&mut self) -> Result<String, SessionError> {
        let mut bytes = std::mem::take(&mut self.read_buffer);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes).map_err(|_| SessionError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair(max_line_len: usize) -> (LineConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (LineConnection::new(server, peer, max_line_len), client)
    }

    #[tokio::test]
    async fn test_reads_lines_and_strips_terminators() {
        let (mut conn, mut raw) = pair(1024).await;
        raw.write_all(b"ID:2\r\nPRICE 93 10\npartial").await.unwrap();
        raw.shutdown().await.unwrap();

        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("ID:2"));
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("PRICE 93 10"));
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("partial"));
        assert_eq!(conn.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_oversized_lines() {
        let (mut conn, mut raw) = pair(8).await;
        raw.write_all(b"0123456789abcdef\n").await.unwrap();
        assert!(matches!(
            conn.read_line().await,
            Err(SessionError::LineTooLong(8))
        ));
    }

    #[tokio::test]
    async fn test_send_line_appends_newline() {
        let (mut conn, raw) = pair(1024).await;
        conn.send_line("ACK from North").await.unwrap();

        let mut reader = BufReader::new(raw);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "ACK from North\n");
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            LineConnection::connect(&addr.to_string(), Duration::from_secs(1), 1024).await;
        assert!(result.is_err());
    }
}
