//! Configuration for the exporter, read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Environment variable holding the AWS region to poll.
pub const ENV_REGION: &str = "AWS_REGION";
/// Environment variable holding the refresh interval in seconds.
pub const ENV_INTERVAL: &str = "SCRAPE_INTERVAL";
/// Environment variable holding the HTTP listen port.
pub const ENV_PORT: &str = "EXPORTER_PORT";

fn default_region() -> String {
    "eu-central-1".to_string()
}

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_PORT: u16 = 9877;

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Immutable exporter configuration, resolved once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct ExporterConfig {
    /// AWS region the fetchers are scoped to.
    pub region: String,

    /// Spacing between the end of one refresh cycle and the start of the next.
    pub refresh_interval: Duration,

    /// TCP port the scrape endpoint listens on (all interfaces).
    pub listen_port: u16,
}

impl ExporterConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an injectable variable lookup.
    ///
    /// Tests use this to avoid mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = lookup(ENV_REGION).unwrap_or_else(default_region);

        let interval_secs = match lookup(ENV_INTERVAL) {
            Some(raw) => parse_integer::<u64>(ENV_INTERVAL, &raw)?,
            None => DEFAULT_INTERVAL_SECS,
        };
        if interval_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "{ENV_INTERVAL} must be > 0"
            )));
        }

        let listen_port = match lookup(ENV_PORT) {
            Some(raw) => parse_integer::<u16>(ENV_PORT, &raw)?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            region,
            refresh_interval: Duration::from_secs(interval_secs),
            listen_port,
        })
    }

    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }
}

fn parse_integer<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    name: &'static str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
