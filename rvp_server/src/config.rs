//! Command-line options and the validated server configuration built from them.

use std::time::Duration;

use clap::Parser;
use rvp_core::RegistryConfig;
use thiserror::Error;

use crate::handler::is_valid_name;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// rvp rendezvous relay options
#[derive(Debug, Parser)]
#[command(name = "rvp-server", version, about = "Rendezvous relay pairing one writer with one reader per channel")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "RVP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to run rendezvous server on
    #[arg(short, long, env = "RVP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Fixed channel name handed out by /new (debug only)
    #[arg(short, long, env = "RVP_FIXED_NAME")]
    pub fixed: Option<String>,

    /// Seconds a lone write or read waits for its counterpart
    #[arg(long, env = "RVP_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout: u64,

    /// Seconds a channel may stay unused before it is closed
    #[arg(long, env = "RVP_CHANNEL_TIMEOUT", default_value_t = 1800)]
    pub channel_timeout: u64,

    /// Largest accepted payload in bytes
    #[arg(long, env = "RVP_MAX_BODY_SIZE", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("request timeout ({request:?}) must be shorter than channel timeout ({channel:?})")]
    TimeoutOrder { request: Duration, channel: Duration },

    #[error("fixed channel name '{0}' must be a non-empty URL path segment")]
    InvalidFixedName(String),

    #[error("maximum body size must be greater than zero")]
    ZeroBodySize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub fixed_name: Option<String>,
    pub request_timeout: Duration,
    pub channel_timeout: Duration,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            fixed_name: None,
            request_timeout: registry.operation_timeout,
            channel_timeout: registry.idle_timeout,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout >= self.channel_timeout {
            return Err(ConfigError::TimeoutOrder {
                request: self.request_timeout,
                channel: self.channel_timeout,
            });
        }
        if let Some(name) = &self.fixed_name {
            if !is_valid_name(name) {
                return Err(ConfigError::InvalidFixedName(name.clone()));
            }
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::ZeroBodySize);
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            operation_timeout: self.request_timeout,
            idle_timeout: self.channel_timeout,
        }
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = ServerConfig {
            host: args.host,
            port: args.port,
            fixed_name: args.fixed,
            request_timeout: Duration::from_secs(args.request_timeout),
            channel_timeout: Duration::from_secs(args.channel_timeout),
            max_body_size: args.max_body_size,
        };
        config.validate()?;
        Ok(config)
    }
}
