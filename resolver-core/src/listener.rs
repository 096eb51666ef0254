// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Owns the UDP and TCP sockets, accepts inbound queries, and dispatches each to a
//! [`QueryHandler`] concurrently.

use crate::error::{BindError, ResolverError};
use crate::handler::QueryHandler;
use bytes::{Bytes, BytesMut};
use log::{debug, error, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, UdpSocket};
use tokio::sync::watch;

const MAX_DATAGRAM: usize = 4096;
const GRACE_WINDOW: Duration = Duration::from_secs(5);

/// `created -> listening -> draining -> stopped`. `stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    /// Constructed, not yet bound.
    Created = 0,
    /// Bound and actively accepting requests.
    Listening = 1,
    /// `stop()` was called; no new requests are accepted, in-flight ones are finishing.
    Draining = 2,
    /// Terminal. Sockets released.
    Stopped = 3,
}

impl ListenerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Listening,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Binds the configured UDP socket (and, best-effort, a TCP socket on the same port) and serves
/// queries until `stop()` is called or binding fails.
pub struct Listener {
    addr: SocketAddr,
    handler: Arc<QueryHandler>,
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Listener {
    pub fn new(addr: SocketAddr, handler: Arc<QueryHandler>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            addr,
            handler,
            state: AtomicU8::new(ListenerState::Created as u8),
            shutdown: tx,
            shutdown_rx: rx,
        }
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Serve until `stop()` is called or a fatal bind error occurs. Returns once shutdown has
    /// completed cleanly; bind failures are returned as `Err` before the state ever reaches
    /// `Listening`.
    pub async fn start(&self) -> Result<(), ResolverError> {
        let udp = bind_udp(self.addr).await?;
        let tcp = match TokioTcpListener::bind(self.addr).await {
            Ok(tcp) => Some(tcp),
            Err(e) => {
                warn!("TCP listener on {} unavailable, serving UDP only: {e}", self.addr);
                None
            }
        };

        self.state.store(ListenerState::Listening as u8, Ordering::Release);
        debug!("listening on {}", self.addr);

        let mut shutdown_udp = self.shutdown_rx.clone();
        let udp = Arc::new(udp);
        let handler = self.handler.clone();
        let udp_task = tokio::spawn(serve_udp(udp, handler, shutdown_udp.clone()));

        let tcp_task = tcp.map(|tcp| {
            let handler = self.handler.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            tokio::spawn(serve_tcp(tcp, handler, shutdown_rx))
        });

        shutdown_udp.changed().await.ok();
        self.state.store(ListenerState::Draining as u8, Ordering::Release);

        // Give in-flight handlers a grace window before declaring the socket closed; the tasks
        // themselves stop accepting new work as soon as the shutdown signal fires.
        let _ = tokio::time::timeout(GRACE_WINDOW, udp_task).await;
        if let Some(tcp_task) = tcp_task {
            let _ = tokio::time::timeout(GRACE_WINDOW, tcp_task).await;
        }

        self.state.store(ListenerState::Stopped as u8, Ordering::Release);
        Ok(())
    }

    /// Initiate graceful shutdown. Idempotent; safe to call before `start()` returns or more
    /// than once.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, ResolverError> {
    UdpSocket::bind(addr).await.map_err(|e| {
        if addr.port() < 1024 {
            ResolverError::BindFailed(BindError::PrivilegedPort { port: addr.port(), source: e })
        } else {
            ResolverError::BindFailed(BindError::Other { addr, source: e })
        }
    })
}

async fn serve_udp(socket: Arc<UdpSocket>, handler: Arc<QueryHandler>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let mut buf = BytesMut::with_capacity(MAX_DATAGRAM);
        buf.resize(MAX_DATAGRAM, 0);

        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("udp recv error: {e}");
                        continue;
                    }
                };
                buf.resize(len, 0);
                let request = buf.freeze();
                let socket = socket.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Some(response) = handler.handle(request).await {
                        if let Err(e) = socket.send_to(&response, peer).await {
                            error!("failed to write response to {peer}: {e}");
                        }
                    }
                });
            }
        }
    }
}

async fn serve_tcp(listener: TokioTcpListener, handler: Arc<QueryHandler>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("tcp accept error: {e}");
                        continue;
                    }
                };
                let handler = handler.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(serve_tcp_connection(stream, peer, handler, shutdown));
            }
        }
    }
}

async fn serve_tcp_connection(
    mut stream: tokio::net::TcpStream,
    peer: SocketAddr,
    handler: Arc<QueryHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut len_buf = [0u8; 2];
        tokio::select! {
            _ = shutdown.changed() => return,
            result = stream.read_exact(&mut len_buf) => {
                if result.is_err() {
                    return;
                }
            }
        }
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut buf = BytesMut::with_capacity(len);
        buf.resize(len, 0);
        if stream.read_exact(&mut buf).await.is_err() {
            return;
        }

        let request: Bytes = buf.freeze();
        let response = match handler.handle(request).await {
            Some(r) => r,
            None => continue,
        };

        let len = match u16::try_from(response.len()) {
            Ok(len) => len,
            Err(_) => {
                warn!("response to {peer} too large for TCP framing, dropping");
                continue;
            }
        };
        let mut framed = BytesMut::with_capacity(2 + response.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&response);

        if stream.write_all(&framed).await.is_err() {
            return;
        }
    }
}
