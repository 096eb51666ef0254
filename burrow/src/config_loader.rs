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

//! Loads the YAML configuration file into a validated `resolver_core::Configuration`. This is
//! the external collaborator the core declares but does not implement itself.

use resolver_core::config::Configuration;
use resolver_core::error::ConfigError;
use std::path::Path;

/// Read and parse `path`, returning a `Configuration` that has already passed `validate()`.
pub async fn load(path: &Path) -> Result<Configuration, ConfigError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let config: Configuration =
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn loads_and_validates_a_well_formed_file() {
        let path = write_temp(
            "burrow-config-loader-ok.yaml",
            r#"
server:
  address: 127.0.0.1
  port: 8053
home_dns_domain: home
hosts:
  - hostname: laptop
    ipv4: ["192.168.1.101"]
dns:
  ttl: 300
  block_list: ["evil.com"]
"#,
        )
        .await;

        let config = load(&path).await.unwrap();
        assert_eq!(config.server.port, 8053);
        assert_eq!(config.hosts.len(), 1);
    }

    #[tokio::test]
    async fn rejects_a_host_with_no_addresses() {
        let path = write_temp(
            "burrow-config-loader-bad-host.yaml",
            r#"
hosts:
  - hostname: ghost
"#,
        )
        .await;

        assert!(matches!(load(&path).await, Err(ConfigError::EmptyHost(_))));
    }

    #[tokio::test]
    async fn missing_file_surfaces_io_error() {
        let path = std::env::temp_dir().join("burrow-config-loader-does-not-exist.yaml");
        assert!(matches!(load(&path).await, Err(ConfigError::Io(_))));
    }
}
