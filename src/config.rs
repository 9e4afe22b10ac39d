use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::{ClientInfo, PROTOCOL_VERSION};
use crate::session::SessionOptions;

/// Default listen address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default bound on a single RPC call (60 seconds).
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Program that speaks JSON-RPC on its stdio.
    pub command: String,
    pub args: Vec<String>,
    /// `None` disables the per-call bound.
    pub call_timeout: Option<Duration>,
    pub protocol_version: String,
    pub client_info: ClientInfo,
}

impl BridgeConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            command: command.into(),
            args,
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            protocol_version: PROTOCOL_VERSION.into(),
            client_info: ClientInfo::default(),
        }
    }

    /// Load configuration from environment.
    ///
    /// - `MCP_BRIDGE_HOST` (optional, default 127.0.0.1): listen address
    /// - `MCP_BRIDGE_PORT` (optional, default 3000): listen port
    /// - `MCP_BRIDGE_TIMEOUT_SECS` (optional, default 60, 0 disables): max seconds per RPC call
    pub fn from_env(command: impl Into<String>, args: Vec<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(command, args, |name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(
        command: impl Into<String>,
        args: Vec<String>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(command, args);

        if let Some(host) = lookup("MCP_BRIDGE_HOST") {
            config.host = host;
        }

        if let Some(val) = lookup("MCP_BRIDGE_PORT") {
            config.port = val.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "MCP_BRIDGE_PORT",
                expected: "a port number",
                value: val.clone(),
            })?;
        }

        if let Some(val) = lookup("MCP_BRIDGE_TIMEOUT_SECS") {
            let secs: u64 = val.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "MCP_BRIDGE_TIMEOUT_SECS",
                expected: "a non-negative integer",
                value: val.clone(),
            })?;
            config.call_timeout = timeout_from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout = timeout_from_secs(secs);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            call_timeout: self.call_timeout,
            protocol_version: self.protocol_version.clone(),
            client_info: self.client_info.clone(),
        }
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
