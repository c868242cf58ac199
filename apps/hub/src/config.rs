use anyhow::{Context, Result};
use avhub_device_christie::ProjectorConfig;
use avhub_device_marantz::ReceiverConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "avhub.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

/// Top-level hub configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub receiver: ReceiverConfig,
    pub projector: ProjectorConfig,
}

impl HubConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !required && !path.exists() {
            tracing::info!("No {} found, using default configuration", DEFAULT_CONFIG_PATH);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Run both devices against their simulators.
    pub fn simulate_all(&mut self) {
        self.receiver.simulate = true;
        self.projector.simulate = true;
    }
}
