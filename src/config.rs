//! Configuration management for the FTP server
//!
//! Values come from an optional `config.toml` layered with `PICOFTP_*`
//! environment overrides. Every key has a default, so a missing file is not
//! an error.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest accepted size for the command and staging buffers.
const MIN_BUFFER_SIZE: usize = 512;

/// Complete server configuration.
///
/// All values are read once at startup. Changing them requires a restart.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IPv4 address the control listener binds to
    pub bind_address: String,

    /// Control port (0 asks the OS for an ephemeral port)
    pub control_port: u16,

    /// Cycling PASV port range, both 0 for ephemeral ports
    pub pasv_port_min: u16,
    pub pasv_port_max: u16,

    // ═══ FILESYSTEM ═══
    /// Real directory that the virtual root `/` maps to
    pub server_root: String,

    // ═══ LIMITS ═══
    /// Concurrent sessions, also used as the listen backlog
    pub max_sessions: usize,

    /// Capacity of the per-session command line buffer
    pub command_buffer_size: usize,

    /// Capacity of the per-session staging buffer used by transfers
    pub transfer_buffer_size: usize,

    /// SO_SNDBUF / SO_RCVBUF applied to data sockets
    pub socket_buffer_size: usize,

    // ═══ TIMING ═══
    /// Reactor wait when every session is idle
    pub idle_poll_ms: u64,

    /// Write timeout on the control connection
    pub command_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: 5000,
            pasv_port_min: 0,
            pasv_port_max: 0,
            server_root: "/".to_string(),
            max_sessions: 4,
            command_buffer_size: 4096,
            transfer_buffer_size: 32768,
            socket_buffer_size: 32768,
            idle_poll_ms: 150,
            command_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path` (without extension, `config` by default)
    /// with environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or("config");

        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("PICOFTP").try_parsing(true))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Message(format!(
                "bind_address is not an IPv4 address: {}",
                self.bind_address
            )));
        }

        if self.server_root.is_empty() {
            return Err(ConfigError::Message("server_root cannot be empty".into()));
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::Message(
                "max_sessions must be greater than 0".into(),
            ));
        }

        if self.command_buffer_size < MIN_BUFFER_SIZE
            || self.transfer_buffer_size < MIN_BUFFER_SIZE
        {
            return Err(ConfigError::Message(format!(
                "buffer sizes must be at least {MIN_BUFFER_SIZE} bytes"
            )));
        }

        if self.pasv_port_min > self.pasv_port_max {
            return Err(ConfigError::Message(
                "pasv_port_min must not exceed pasv_port_max".into(),
            ));
        }

        if (self.pasv_port_min == 0) != (self.pasv_port_max == 0) {
            return Err(ConfigError::Message(
                "pasv_port_min and pasv_port_max must both be set or both be 0".into(),
            ));
        }

        Ok(())
    }

    /// Control listener address
    pub fn control_socket(&self) -> SocketAddr {
        let ip = self.bind_address.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
        SocketAddr::V4(SocketAddrV4::new(ip, self.control_port))
    }

    /// Get server root as PathBuf
    pub fn server_root_path(&self) -> PathBuf {
        PathBuf::from(&self.server_root)
    }

    /// Configured PASV range, `None` when ephemeral ports are used
    pub fn pasv_port_range(&self) -> Option<(u16, u16)> {
        (self.pasv_port_min != 0).then_some((self.pasv_port_min, self.pasv_port_max))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control_socket().port(), 5000);
        assert_eq!(config.idle_poll(), Duration::from_millis(150));
        assert_eq!(config.pasv_port_range(), None);
    }

    #[test]
    fn rejects_bad_values() {
        let config = ServerConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            bind_address: "localhost".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            pasv_port_min: 6000,
            pasv_port_max: 5000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            command_buffer_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load(Some("definitely/not/here")).unwrap();
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.transfer_buffer_size, 32768);
    }
}
