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

//! Typed, validated configuration consumed by the rest of `resolver-core`. The on-disk text
//! format (YAML, loaded by the `burrow` binary) is external to this crate; this module only
//! describes the already-deserialized shape and its validation rules.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn default_server_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_server_port() -> u32 {
    8053
}

fn default_ttl() -> u32 {
    300
}

const fn default_true() -> bool {
    true
}

fn default_home_domain() -> String {
    "home".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_doh_path() -> String {
    "/dns-query".to_owned()
}

/// Top level configuration, as consumed by `resolver-core`. Constructed once at startup and
/// treated as immutable; `HostIndex`/`Blocklist` are (re)built from it via `rebuild`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Listener bind settings.
    pub server: ServerConfig,
    /// DNS answering behavior: TTLs, recursion, blocklist.
    pub dns: DnsConfig,
    /// Upstream resolvers, in preference order.
    pub upstream: Vec<UpstreamServer>,
    /// Suffix appended to bare (unqualified) configured hostnames.
    #[serde(rename = "home_dns_domain", default = "default_home_domain")]
    pub home_dns_domain: String,
    /// Locally configured hostname -> address mappings.
    pub hosts: Vec<HostRecord>,
    /// One of `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            dns: DnsConfig::default(),
            upstream: Vec::new(),
            home_dns_domain: default_home_domain(),
            hosts: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Configuration {
    /// Validate the configuration, returning the first `ConfigError` encountered. Checked before
    /// a `Configuration` is ever installed (i.e. before `HostIndex`/`Blocklist`/upstream pools
    /// are built from it).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 || self.server.port > 65535 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        match self.log_level.to_ascii_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ConfigError::InvalidLogLevel(self.log_level.clone())),
        }

        for host in &self.hosts {
            if host.ipv4.is_empty() && host.ipv6.is_empty() {
                return Err(ConfigError::EmptyHost(host.hostname.clone()));
            }
        }

        for up in &self.upstream {
            match up.protocol {
                Protocol::Udp | Protocol::Tcp | Protocol::Tls => {
                    if let Err(e) = up.address.parse::<IpAddr>() {
                        return Err(ConfigError::InvalidAddress(up.address.clone(), e));
                    }
                }
                // DoH addresses may be a bare domain name (resolved by the HTTP client) or an
                // IP literal; both are valid, so there is nothing to validate here.
                Protocol::Https => {}
            }
        }

        Ok(())
    }
}

/// Listener bind settings (spec: `server.address`, `server.port`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Default `127.0.0.1`.
    #[serde(default = "default_server_address")]
    pub address: IpAddr,
    /// Bind port, 1-65535. Default `8053`.
    #[serde(default = "default_server_port")]
    pub port: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            port: default_server_port(),
        }
    }
}

/// DNS answering behavior (spec: `dns.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Default TTL (seconds) stamped on locally answered records. Default `300`.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    /// If false, upstream forwarding is disabled entirely. Default `true`.
    #[serde(default = "default_true")]
    pub enable_recursion: bool,
    /// Reserved capacity hint for a response cache. Unused by this core; accepted for
    /// configuration-format compatibility.
    pub cache_size: Option<usize>,
    /// Domain patterns to block (exact or subdomain match, no wildcards).
    pub block_list: Vec<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            enable_recursion: true,
            cache_size: None,
            block_list: Vec::new(),
        }
    }
}

/// A configured local host (spec §3 `HostRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    /// Either a bare label (`laptop`) or an already-qualified name (`nas.lab`).
    pub hostname: String,
    /// IPv4 literals, in configured order.
    #[serde(default)]
    pub ipv4: Vec<Ipv4Addr>,
    /// IPv6 literals, in configured order.
    #[serde(default)]
    pub ipv6: Vec<Ipv6Addr>,
}

/// Upstream transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain UDP, port default 53.
    Udp,
    /// Plain TCP, port default 53.
    Tcp,
    /// DNS-over-TLS, port default 853.
    Tls,
    /// DNS-over-HTTPS, port default 443.
    Https,
}

impl Protocol {
    fn default_port(self) -> u32 {
        match self {
            Protocol::Udp | Protocol::Tcp => 53,
            Protocol::Tls => 853,
            Protocol::Https => 443,
        }
    }
}

/// A single configured upstream resolver (spec §3 `UpstreamServer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServer {
    /// Optional human-readable label, used only for logging.
    pub name: Option<String>,
    /// IP address or hostname of the upstream. For `tls`/`https` this also supplies the SNI /
    /// certificate name unless `name` overrides it.
    pub address: String,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port. Derived from `protocol` when omitted (udp/tcp -> 53, tls -> 853, https -> 443).
    pub port: Option<u32>,
    /// HTTP path for DoH requests. Only meaningful when `protocol == https`. Default
    /// `/dns-query`.
    pub path: Option<String>,
    /// Whether to validate the upstream's TLS certificate. Ignored for udp/tcp. Default `true`.
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl UpstreamServer {
    /// The effective port: configured value, or the protocol's default.
    pub fn port(&self) -> u32 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// The effective DoH path: configured value, or `/dns-query`.
    pub fn doh_path(&self) -> String {
        self.path.clone().unwrap_or_else(default_doh_path)
    }

    /// The name used for TLS SNI / certificate verification: `name` if set, else `address`.
    pub fn tls_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}
