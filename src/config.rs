//! Peer configuration module
//!
//! Handles loading and parsing of peer configuration from files and environment variables.

use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Floor for the tick and frame intervals; `tokio::time::interval` rejects zero
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Display name used when joining (falls back to the CLI argument, then "Guest")
    #[serde(default)]
    pub display_name: Option<String>,

    /// Broadcast domain name; frames tagged with another channel are ignored
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Multicast group used by the UDP transport
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,

    /// UDP port shared by every peer in the domain
    #[serde(default = "default_port")]
    pub port: u16,

    /// Outbound UPDATE cadence
    #[serde(default = "default_broadcast_rate")]
    pub broadcast_rate_hz: u32,

    /// Interpolation cadence for remote peers
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: u32,

    /// Delay before answering a JOIN with our own state
    #[serde(default = "default_join_response_delay")]
    pub join_response_delay_ms: u64,

    /// Exponential smoothing rate constant (per second)
    #[serde(default = "default_interpolation_rate")]
    pub interpolation_rate: f64,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_channel() -> String {
    "co-world-channel".to_string()
}

fn default_multicast_addr() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 42, 99)
}

fn default_port() -> u16 {
    43600
}

fn default_broadcast_rate() -> u32 {
    20 // 50ms between updates
}

fn default_frame_rate() -> u32 {
    60
}

fn default_join_response_delay() -> u64 {
    500
}

fn default_interpolation_rate() -> f64 {
    10.0
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/peer.toml"),
            display_name: None,
            channel: default_channel(),
            multicast_addr: default_multicast_addr(),
            port: default_port(),
            broadcast_rate_hz: default_broadcast_rate(),
            frame_rate_hz: default_frame_rate(),
            join_response_delay_ms: default_join_response_delay(),
            interpolation_rate: default_interpolation_rate(),
            debug: false,
        }
    }
}

impl PeerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("COWORLD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/peer.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("COWORLD_DISPLAY_NAME") {
            self.display_name = Some(val);
        }
        if let Ok(val) = env::var("COWORLD_CHANNEL") {
            self.channel = val;
        }
        if let Ok(val) = env::var("COWORLD_MULTICAST_ADDR") {
            if let Ok(addr) = val.parse() {
                self.multicast_addr = addr;
            }
        }
        if let Ok(val) = env::var("COWORLD_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("COWORLD_BROADCAST_RATE_HZ") {
            if let Ok(rate) = val.parse() {
                self.broadcast_rate_hz = rate;
            }
        }
        if let Ok(val) = env::var("COWORLD_FRAME_RATE_HZ") {
            if let Ok(rate) = val.parse() {
                self.frame_rate_hz = rate;
            }
        }
        if let Ok(val) = env::var("COWORLD_JOIN_RESPONSE_DELAY_MS") {
            if let Ok(delay) = val.parse() {
                self.join_response_delay_ms = delay;
            }
        }
        if let Ok(val) = env::var("COWORLD_INTERPOLATION_RATE") {
            if let Ok(rate) = val.parse() {
                self.interpolation_rate = rate;
            }
        }
        if let Ok(val) = env::var("COWORLD_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            anyhow::bail!("Channel name must not be empty");
        }

        if !self.multicast_addr.is_multicast() {
            anyhow::bail!("{} is not a multicast address", self.multicast_addr);
        }

        if self.port == 0 {
            anyhow::bail!("Port must be non-zero");
        }

        if self.broadcast_rate_hz == 0 || self.broadcast_rate_hz > 120 {
            anyhow::bail!("Broadcast rate must be between 1 and 120 Hz");
        }

        if self.frame_rate_hz == 0 || self.frame_rate_hz > 240 {
            anyhow::bail!("Frame rate must be between 1 and 240 Hz");
        }

        if self.join_response_delay_ms > 10_000 {
            anyhow::bail!("Join response delay must be at most 10000ms");
        }

        if !self.interpolation_rate.is_finite() || self.interpolation_rate <= 0.0 {
            anyhow::bail!("Interpolation rate must be a positive number");
        }

        Ok(())
    }

    /// Interval between outbound UPDATE broadcasts
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.broadcast_rate_hz.max(1) as f64).max(MIN_INTERVAL)
    }

    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "info,coworld=debug"
        } else {
            "info"
        }
    }

    /// Interval between interpolation frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz.max(1) as f64).max(MIN_INTERVAL)
    }

    /// Delay applied before answering a JOIN
    pub fn join_response_delay(&self) -> Duration {
        Duration::from_millis(self.join_response_delay_ms)
    }
}
