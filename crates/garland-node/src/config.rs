//! Node configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a node can start with zero
//! configuration for local development.

use std::path::PathBuf;

use directories::ProjectDirs;

use garland_shared::constants::DEFAULT_QUIC_PORT;
use garland_sync::{EngineConfig, Role};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// What this device does once connected.
    /// Env: `GARLAND_ROLE` (`host` | `join` | `query`)
    /// Default: `host`
    pub role: Role,

    /// User-facing device name shown to peers.
    /// Env: `GARLAND_NAME`
    /// Default: `"Garland device"`
    pub display_name: String,

    /// QUIC listen port.
    /// Env: `GARLAND_PORT`
    /// Default: `4815`
    pub listen_port: u16,

    /// Directory holding the database and identity key.
    /// Env: `GARLAND_DATA_DIR`
    /// Default: platform data dir (e.g. `~/.local/share/garland`)
    pub data_dir: PathBuf,

    /// Directory holding gift photos.
    /// Env: `GARLAND_PHOTO_DIR`
    /// Default: `<data_dir>/images`
    pub photo_dir: PathBuf,

    /// Sync engine tunables.
    /// Env: `GARLAND_MAX_IN_FLIGHT`, `GARLAND_TIMEOUT_TRIP`
    pub engine: EngineConfig,
}

impl NodeSettings {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = match std::env::var("GARLAND_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => ProjectDirs::from("com", "garland", "garland")
                .ok_or_else(|| anyhow::anyhow!("could not determine a data directory"))?
                .data_dir()
                .to_path_buf(),
        };

        let photo_dir = match std::env::var("GARLAND_PHOTO_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => data_dir.join("images"),
        };

        let role = match std::env::var("GARLAND_ROLE") {
            Ok(raw) => match raw.parse::<Role>() {
                Ok(role) => role,
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Invalid GARLAND_ROLE, using host");
                    Role::Host
                }
            },
            Err(_) => Role::Host,
        };

        let display_name = std::env::var("GARLAND_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Garland device".to_string());

        let mut listen_port = DEFAULT_QUIC_PORT;
        if let Ok(raw) = std::env::var("GARLAND_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => listen_port = port,
                Err(_) => {
                    tracing::warn!(value = %raw, "Invalid GARLAND_PORT, using default");
                }
            }
        }

        let mut engine = EngineConfig::default();
        if let Ok(raw) = std::env::var("GARLAND_MAX_IN_FLIGHT") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => engine.max_in_flight = n,
                _ => tracing::warn!(value = %raw, "Invalid GARLAND_MAX_IN_FLIGHT, using default"),
            }
        }
        if let Ok(raw) = std::env::var("GARLAND_TIMEOUT_TRIP") {
            match raw.parse::<u32>() {
                Ok(n) if n > 0 => engine.timeout_trip = n,
                _ => tracing::warn!(value = %raw, "Invalid GARLAND_TIMEOUT_TRIP, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        Ok(Self {
            role,
            display_name,
            listen_port,
            data_dir,
            photo_dir,
            engine,
        })
    }
}
