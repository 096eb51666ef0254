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

//! Universal error type for `resolver-core`, following `thiserror`.

use std::net::AddrParseError;
use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, ResolverError>;

/// Top level error enumerating everything that can go wrong in the resolver core.
#[derive(Error, Debug)]
pub enum ResolverError {
    /// The configuration failed validation. See `ConfigError` for the specific cause.
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    /// The listener could not acquire its configured socket(s).
    #[error(transparent)]
    BindFailed(#[from] BindError),

    /// An upstream query failed, for any reason (transport, TLS, HTTP, parse).
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// An inbound datagram or stream chunk was not a well-formed DNS message.
    #[error("failed to decode DNS request: {0}")]
    RequestDecode(String),

    /// Writing the response back to the client failed.
    #[error("failed to write DNS response: {0}")]
    ResponseWrite(#[source] std::io::Error),
}

/// Errors that invalidate a `Configuration` before it is ever installed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `server.port` was 0 or out of the valid range (spec requires 1-65535; 0 always fails).
    #[error("invalid bind port: {0}")]
    InvalidPort(u32),

    /// An `UpstreamServer.address` could not be parsed as an IP literal.
    #[error("invalid upstream address '{0}': {1}")]
    InvalidAddress(String, AddrParseError),

    /// `protocol` was not one of udp/tcp/tls/https.
    #[error("unknown upstream protocol '{0}'")]
    UnknownProtocol(String),

    /// A `HostRecord` had neither an IPv4 nor an IPv6 address configured.
    #[error("host '{0}' has neither an ipv4 nor an ipv6 address")]
    EmptyHost(String),

    /// `log_level` was not one of debug/info/warn/error.
    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),

    /// The configuration file could not be read from disk.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed as YAML.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors binding the listener's sockets.
#[derive(Error, Debug)]
pub enum BindError {
    /// Binding a privileged port (<1024) failed, most likely for lack of `CAP_NET_BIND_SERVICE`
    /// or root.
    #[error("cannot bind privileged port {port}: {source}")]
    PrivilegedPort {
        /// The port that failed to bind.
        port: u16,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Any other socket bind failure.
    #[error("failed to bind {addr}: {source}")]
    Other {
        /// The socket address that failed to bind.
        addr: std::net::SocketAddr,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single upstream query attempt. The handler treats any variant as "try the next
/// upstream"; callers never need to match on this beyond logging.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The exchange did not complete within the upstream's configured timeout.
    #[error("upstream query timed out")]
    Timeout,

    /// A transport-level I/O error (UDP/TCP/TLS handshake or read/write).
    #[error("upstream transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The upstream's reply could not be decoded as a DNS message.
    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    /// A DoH request returned a non-200 status.
    #[error("upstream HTTP request failed with status {0}")]
    Http(u16),

    /// A `reqwest` level error (connect, TLS, body).
    #[error("DoH request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// The connection pool failed to create or recycle a connection.
    #[error("connection pool error: {0}")]
    Pool(String),
}
