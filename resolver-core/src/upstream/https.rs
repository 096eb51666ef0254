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

//! DNS-over-HTTPS (RFC 8484). All upstreams share one pooled `reqwest::Client`; each
//! `UpstreamServer` contributes only its own request URL.

use super::QHandle;
use crate::config::UpstreamServer;
use crate::error::UpstreamError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use domain::base::Message;
use reqwest::Url;
use std::str::FromStr;
use std::time::Duration;

static APP_USER_AGENT: &str = concat!("burrow/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the single `reqwest::Client` shared across every configured DoH upstream. TLS
/// verification is handled by `reqwest`'s own rustls backend and root store; per-upstream
/// `verify = false` is honored by routing that upstream through a second, non-verifying client
/// built lazily the same way (see `Https::new`).
pub fn build_shared_client() -> Result<reqwest::Client, UpstreamError> {
    build_client(true)
}

fn build_client(verify: bool) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .https_only(true)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .danger_accept_invalid_certs(!verify)
        .user_agent(APP_USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(UpstreamError::Reqwest)
}

/// A single DoH upstream: the shared client plus this upstream's precomputed target URL.
pub struct Https {
    client: reqwest::Client,
    url: Url,
}

impl Https {
    pub fn new(shared: reqwest::Client, server: &UpstreamServer) -> Result<Self, UpstreamError> {
        // An upstream that opts out of verification gets its own client; everyone else shares
        // the pooled default built once by `build_shared_client`.
        let client = if server.verify {
            shared
        } else {
            build_client(false)?
        };

        let base = format!(
            "https://{}:{}{}",
            server.address,
            server.port(),
            server.doh_path()
        );
        let url = Url::from_str(&base)
            .map_err(|e| UpstreamError::Parse(format!("invalid DoH URL '{base}': {e}")))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl QHandle for Https {
    async fn query(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>, UpstreamError> {
        // Per RFC 8484, zeroing the ID improves cacheability of the request on the wire; the
        // response is matched back to the caller by the handler, not by this ID.
        let mut msg = Message::from_octets(BytesMut::from(msg.as_slice()))
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;
        msg.header_mut().set_id(0);

        let body: reqwest::Body = msg.into_octets().freeze().into();
        let res = self
            .client
            .post(self.url.clone())
            .header("content-type", "application/dns-message")
            .header("accept", "application/dns-message")
            .body(body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(UpstreamError::Http(res.status().as_u16()));
        }

        let bytes = res.bytes().await?;
        Message::from_octets(bytes).map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}
