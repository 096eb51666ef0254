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

//! Plain TCP resolver client. Queries are length-prefixed per RFC 1035 §4.2.2: a two-byte
//! big-endian length followed by the message.

use super::{ConnInitiator, QHandle};
use crate::error::UpstreamError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use domain::base::Message;
use socket2::{Socket, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Tcp {
    addr: SocketAddr,
}

impl Tcp {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl ConnInitiator for Tcp {
    type Connection = Mutex<TcpStream>;

    async fn create(&self) -> std::io::Result<Self::Connection> {
        let mut stream = TcpStream::connect(self.addr).await?;

        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(3));
        let socket: Socket = stream.into_std()?.into();
        socket.set_tcp_keepalive(&keepalive)?;
        stream = TcpStream::from_std(socket.into())?;

        Ok(Mutex::new(stream))
    }
}

#[async_trait]
impl QHandle for Mutex<TcpStream> {
    async fn query(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>, UpstreamError> {
        let mut stream = self.lock().await;

        let mut msg = Message::from_octets(BytesMut::from(msg.as_slice()))
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;
        msg.header_mut().set_random_id();
        let msg = msg.for_slice();

        let len = u16::try_from(msg.as_slice().len())
            .map_err(|_| UpstreamError::Parse("query too long for TCP framing".into()))?
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
