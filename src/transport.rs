//! Datagram transport: one bound `tokio::net::UdpSocket`, the worker
//! address table, and thin send/recv wrappers around `frames::{encode,decode}`.

#![forbid(unsafe_code)]

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::frames::{decode, encode, Frame, FrameError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("binding UDP socket on {addr}: {source}")]
    Bind { addr: String, #[source] source: std::io::Error },
    #[error("sending datagram to {addr}: {source}")]
    Send { addr: SocketAddr, #[source] source: std::io::Error },
    #[error("receiving datagram: {source}")]
    Recv { #[source] source: std::io::Error },
}

/// A single bound UDP endpoint plus the known worker address table.
pub struct Transport {
    socket: UdpSocket,
    worker_addrs: Vec<SocketAddr>,
}

/// A frame received from the socket, plus whoever sent it and whether it
/// decoded cleanly. Malformed datagrams are logged and dropped by the
/// caller; this type separates that decision from the raw socket read.
pub enum Ingress {
    Frame(Frame, SocketAddr),
    Malformed(SocketAddr, FrameError),
}

impl Transport {
    /// Bind `bind_addr` and precompute the worker address table
    /// `host:worker_port_start + i` for `i in 0..n`.
    pub async fn bind(
        bind_addr: SocketAddr,
        worker_host: std::net::IpAddr,
        worker_port_start: u16,
        n: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Bind { addr: bind_addr.to_string(), source: e })?;
        let worker_addrs = (0..n)
            .map(|i| SocketAddr::new(worker_host, worker_port_start + i as u16))
            .collect();
        Ok(Self { socket, worker_addrs })
    }

    pub fn worker_addr(&self, tid: usize) -> SocketAddr {
        self.worker_addrs[tid]
    }

    pub fn worker_count(&self) -> usize {
        self.worker_addrs.len()
    }

    /// Encode and send `frame` to `addr`.
    pub async fn send(&self, frame: &Frame, addr: SocketAddr) -> Result<(), TransportError> {
        let bytes = encode(frame).map_err(|e| TransportError::Send {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        })?;
        self.socket
            .send_to(&bytes, addr)
            .await
            .map_err(|e| TransportError::Send { addr, source: e })?;
        Ok(())
    }

    /// Receive and decode the next datagram. Never returns `Err` for a
    /// malformed payload — that case is reported as `Ingress::Malformed` so
    /// the caller can log and continue.
    pub async fn recv(&self) -> Result<Ingress, TransportError> {
        let mut buf = vec![0u8; 65_535];
        let (len, from) =
            self.socket.recv_from(&mut buf).await.map_err(|e| TransportError::Recv { source: e })?;
        match decode(&buf[..len]) {
            Ok(frame) => Ok(Ingress::Frame(frame, from)),
            Err(e) => Ok(Ingress::Malformed(from, e)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
