// ABOUTME: HTTP server configuration loaded from environment variables
// ABOUTME: Bind address, port and the allowed CORS origin

use axum::http::HeaderValue;
use runbox_config::{constants, defaults};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid bind address: {0}")]
    InvalidHost(String),
    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub cors_origin: String,
}

/// First variable in `names` that is set, so legacy names keep working.
fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env::var(name).ok())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = match first_env(&[constants::RUNBOX_HOST]) {
            Some(host) => host
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidHost(host))?,
            None => defaults::HOST
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidHost(defaults::HOST.to_string()))?,
        };

        let port = match first_env(&[constants::RUNBOX_PORT, constants::PORT]) {
            Some(port_str) => port_str.trim().parse::<u16>()?,
            None => defaults::PORT,
        };

        // Validate port is in valid range
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let cors_origin = first_env(&[constants::RUNBOX_CORS_ORIGIN, constants::CORS_ORIGIN])
            .unwrap_or_else(|| defaults::CORS_ORIGIN.to_string());

        let config = Config {
            host,
            port,
            cors_origin,
        };
        config.cors_header()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn cors_header(&self) -> Result<HeaderValue, ConfigError> {
        self.cors_origin
            .parse::<HeaderValue>()
            .map_err(|_| ConfigError::InvalidCorsOrigin(self.cors_origin.clone()))
    }
}
