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

//! Transport-specific resolver clients (UDP, TCP, DoT, DoH), pooled and keyed by
//! `(protocol, address, port)`.

mod https;
mod pool;
mod tcp;
mod tls;
mod udp;

use crate::config::{Protocol, UpstreamServer};
use crate::error::UpstreamError;
use async_trait::async_trait;
use bytes::Bytes;
use domain::base::Message;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const UDP_TCP_TIMEOUT: Duration = Duration::from_secs(3);
const TLS_TIMEOUT: Duration = Duration::from_secs(5);
const HTTPS_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected, reusable DNS client for a single upstream. Implementations perform exactly one
/// query/response exchange per call; pooling, retries and timeouts live one layer up.
#[async_trait]
pub trait QHandle: Send + Sync {
    /// Send `msg` and return the decoded response.
    async fn query(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>, UpstreamError>;
}

/// Something that can create a fresh `QHandle::Connection` on demand. Used by the deadpool
/// manager wrapper in `pool` for the connection-oriented transports (UDP/TCP/TLS); DoH manages
/// its own pooling inside `reqwest` and does not need this.
#[async_trait]
pub trait ConnInitiator: Send + Sync + 'static {
    /// The connection type this initiator produces.
    type Connection: QHandle;

    /// Establish a fresh connection.
    async fn create(&self) -> std::io::Result<Self::Connection>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    protocol: Protocol,
    address: String,
    port: u32,
}

impl ClientKey {
    fn new(server: &UpstreamServer) -> Self {
        Self {
            protocol: server.protocol,
            address: server.address.clone(),
            port: server.port(),
        }
    }
}

/// Resolver clients for all configured upstream transports, pooled and keyed by
/// `(protocol, address, port)` so that TLS/SNI state is never mixed between addresses.
///
/// Client lookup is read-mostly: a shared `RwLock<HashMap<..>>` guards double-checked
/// create-on-miss. Once created, a client's state is immutable for the process lifetime (per
/// spec: "UpstreamClient state ... lives for the process lifetime").
pub struct UpstreamClient {
    clients: RwLock<HashMap<ClientKey, Arc<dyn QHandle>>>,
    // One pooled HTTP client shared across all DoH upstreams (spec §4.3), built lazily on first
    // DoH query and reused for the process lifetime.
    https_client: OnceCell<::reqwest::Client>,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    /// Create an empty client pool. No network I/O happens until the first query.
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            https_client: OnceCell::new(),
        }
    }

    /// Query a single upstream with the protocol-appropriate timeout. Any failure — transport,
    /// TLS, HTTP, parse, or timeout — is surfaced uniformly as `UpstreamError`; the caller
    /// (`QueryHandler`) treats all of them identically as "try the next upstream".
    pub async fn query(
        &self,
        server: &UpstreamServer,
        msg: &Message<Bytes>,
    ) -> Result<Message<Bytes>, UpstreamError> {
        let handle = self.get_or_create(server)?;
        let timeout = match server.protocol {
            Protocol::Udp | Protocol::Tcp => UDP_TCP_TIMEOUT,
            Protocol::Tls => TLS_TIMEOUT,
            Protocol::Https => HTTPS_TIMEOUT,
        };
        match tokio::time::timeout(timeout, handle.query(msg)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        }
    }

    fn get_or_create(&self, server: &UpstreamServer) -> Result<Arc<dyn QHandle>, UpstreamError> {
        let key = ClientKey::new(server);

        if let Some(existing) = self.clients.read().unwrap().get(&key) {
            return Ok(existing.clone());
        }

        let mut clients = self.clients.write().unwrap();
        // Re-check: another task may have created it while we waited for the write lock.
        if let Some(existing) = clients.get(&key) {
            return Ok(existing.clone());
        }

        let handle = self.build(server)?;
        clients.insert(key, handle.clone());
        Ok(handle)
    }

    fn build(&self, server: &UpstreamServer) -> Result<Arc<dyn QHandle>, UpstreamError> {
        let addr = socket_addr(server)?;
        Ok(match server.protocol {
            Protocol::Udp => Arc::new(pool::ConnPool::new(udp::Udp::new(addr))?),
            Protocol::Tcp => Arc::new(pool::ConnPool::new(tcp::Tcp::new(addr))?),
            Protocol::Tls => Arc::new(pool::ConnPool::new(tls::Tls::new(
                server.tls_name().to_owned(),
                addr,
                server.verify,
            ))?),
            Protocol::Https => {
                let client = self
                    .https_client
                    .get_or_try_init(https::build_shared_client)?;
                Arc::new(https::Https::new(client.clone(), server)?)
            }
        })
    }
}

fn socket_addr(server: &UpstreamServer) -> Result<std::net::SocketAddr, UpstreamError> {
    let ip: std::net::IpAddr = server
        .address
        .parse()
        .map_err(|_| UpstreamError::Parse(format!("invalid upstream address: {}", server.address)))?;
    Ok(std::net::SocketAddr::new(ip, server.port() as u16))
}
