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

//! DNS-over-TLS (RFC 7858): length-prefixed messages over a `rustls` connection.

use super::{ConnInitiator, QHandle};
use crate::error::UpstreamError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use domain::base::Message;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use socket2::{Socket, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{client::TlsStream, TlsConnector};

fn root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    store
}

fn client_config(verify: bool) -> ClientConfig {
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store())
        .with_no_client_auth();
    // `verify` here governs certificate validation, not SNI; SNI stays enabled so that upstreams
    // behind a shared IP still receive the expected server name.
    config.enable_sni = true;
    if !verify {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerify));
    }
    config
}

struct NoVerify;

impl rustls::client::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[derive(Clone)]
pub struct Tls {
    client: TlsConnector,
    addr: SocketAddr,
    domain: String,
}

impl Tls {
    pub fn new(domain: String, addr: SocketAddr, verify: bool) -> Self {
        Self {
            client: TlsConnector::from(Arc::new(client_config(verify))),
            addr,
            domain,
        }
    }
}

#[async_trait]
impl ConnInitiator for Tls {
    type Connection = Mutex<TlsStream<TcpStream>>;

    async fn create(&self) -> std::io::Result<Self::Connection> {
        let mut stream = TcpStream::connect(self.addr).await?;

        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(3));
        let socket: Socket = stream.into_std()?.into();
        socket.set_tcp_keepalive(&keepalive)?;
        stream = TcpStream::from_std(socket.into())?;

        let server_name = rustls::ServerName::try_from(self.domain.as_str())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid TLS server name"))?;

        let stream = self
            .client
            .connect(server_name, stream)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        Ok(Mutex::new(stream))
    }
}

#[async_trait]
impl QHandle for Mutex<TlsStream<TcpStream>> {
    async fn query(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>, UpstreamError> {
        let mut stream = self.lock().await;

        let mut msg = Message::from_octets(BytesMut::from(msg.as_slice()))
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;
        msg.header_mut().set_random_id();
        let msg = msg.for_slice();

        let len = u16::try_from(msg.as_slice().len())
            .map_err(|_| UpstreamError::Parse("query too long for TLS framing".into()))?
            .to_be_bytes();
        let mut payload = BytesMut::with_capacity(2 + msg.as_slice().len());
        payload.extend_from_slice(&len);
        payload.extend_from_slice(msg.as_slice());

        stream
            .write_all(&payload)
            .await
            .map_err(UpstreamError::Transport)?;
        stream.flush().await.map_err(UpstreamError::Transport)?;

        loop {
            let mut len = [0u8; 2];
            stream.read_exact(&mut len).await.map_err(UpstreamError::Transport)?;
            let len = u16::from_be_bytes(len);

            let mut buf = BytesMut::with_capacity(len.into());
            buf.resize(len.into(), 0);
            stream.read_exact(&mut buf).await.map_err(UpstreamError::Transport)?;

            let answer = match Message::from_octets(buf.freeze()) {
                Ok(answer) => answer,
                Err(_) => continue,
            };
            if !answer.is_answer(&msg) {
                continue;
            }
            return Ok(answer);
        }
    }
}
