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

#![deny(unsafe_code)]
//! Core query pipeline for a recursive resolver aimed at small/home networks: a local host
//! index, a domain blocklist, pooled transport-specific upstream clients, the per-request
//! handler that combines them, and the concurrent listener that serves it all.

pub mod blocklist;
pub mod config;
pub mod error;
pub mod handler;
pub mod hostindex;
pub mod listener;
pub mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

pub use blocklist::Blocklist;
pub use config::Configuration;
pub use error::ResolverError;
pub use handler::QueryHandler;
pub use hostindex::HostIndex;
pub use listener::{Listener, ListenerState};
pub use upstream::UpstreamClient;

/// Builds the full resolver core (`HostIndex`, `Blocklist`, `UpstreamClient`, `QueryHandler`,
/// `Listener`) from a validated `Configuration`. This is the single entry point external
/// callers (the `burrow` binary, or tests) need.
pub struct Resolver {
    host_index: Arc<HostIndex>,
    blocklist: Arc<Blocklist>,
    listener: Arc<Listener>,
}

impl Resolver {
    /// Validate `config` and assemble a `Resolver` from it. Returns `ConfigInvalid` if
    /// validation fails; no sockets are touched until `serve()` is called.
    pub fn new(config: &Configuration) -> Result<Self, ResolverError> {
        config.validate()?;

        let host_index = Arc::new(HostIndex::new(config));
        let blocklist = Arc::new(Blocklist::new(config));
        let upstream = Arc::new(UpstreamClient::new());
        let handler = Arc::new(QueryHandler::new(
            config,
            host_index.clone(),
            blocklist.clone(),
            upstream,
        ));

        let addr = SocketAddr::new(config.server.address, config.server.port as u16);
        let listener = Arc::new(Listener::new(addr, handler));

        Ok(Self { host_index, blocklist, listener })
    }

    /// Atomically replace the host index and blocklist from a freshly validated configuration.
    /// Upstream pools and the listener's bound sockets are untouched.
    pub fn rebuild(&self, config: &Configuration) -> Result<(), ResolverError> {
        config.validate()?;
        self.host_index.rebuild(config);
        self.blocklist.rebuild(config);
        Ok(())
    }

    /// Bind sockets and serve until `stop()` is called or a fatal bind error occurs.
    pub async fn serve(&self) -> Result<(), ResolverError> {
        self.listener.start().await
    }

    /// Initiate graceful shutdown of the listener.
    pub fn stop(&self) {
        self.listener.stop();
    }

    /// The listener's current lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }
}
