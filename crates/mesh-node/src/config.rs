//! Node configuration.

use crate::error::NodeError;
use serde::Deserialize;
use std::path::Path;

/// Sentinel disabling the STUN probe.
pub const STUN_DISABLED: &str = "disabled";

fn default_gossip_interval() -> u64 {
    30
}
fn default_gossip_peer_count() -> usize {
    3
}
fn default_message_timeout() -> u64 {
    30
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_stun_server() -> String {
    "stun.l.google.com:19302".to_string()
}

/// Recognized node options. `username` is the only required field; every
/// other key carries its production default.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Our device id on the overlay
    pub username: String,
    /// UDP bind port (0 = OS-assigned)
    #[serde(default)]
    pub udp_port: u16,
    /// Seconds between gossip rounds
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval: u64,
    /// Gossip fan-out per round
    #[serde(default = "default_gossip_peer_count")]
    pub gossip_peer_count: usize,
    /// ACK wait ceiling in seconds
    #[serde(default = "default_message_timeout")]
    pub message_timeout_seconds: u64,
    /// Seconds between peer-table sweeps
    #[serde(default = "default_cleanup_interval")]
    pub peer_cleanup_interval: u64,
    /// STUN server as `host:port`, or `"disabled"`
    #[serde(default = "default_stun_server")]
    pub stun_server: String,
    /// Rewrite every peer address to 127.0.0.1 (same-host topologies)
    #[serde(default)]
    pub force_localhost: bool,
}

impl NodeConfig {
    /// Config with defaults for a device id.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            udp_port: 0,
            gossip_interval: default_gossip_interval(),
            gossip_peer_count: default_gossip_peer_count(),
            message_timeout_seconds: default_message_timeout(),
            peer_cleanup_interval: default_cleanup_interval(),
            stun_server: default_stun_server(),
            force_localhost: false,
        }
    }

    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, NodeError> {
        toml::from_str(text).map_err(|e| NodeError::Internal(format!("bad config: {e}")))
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Internal(format!("cannot read config: {e}")))?;
        Self::from_toml_str(&text)
    }

    /// True when the STUN probe should run at startup.
    pub fn stun_enabled(&self) -> bool {
        !self.force_localhost && self.stun_server != STUN_DISABLED
    }

    /// The ACK wait ceiling in milliseconds.
    pub fn message_timeout_ms(&self) -> u64 {
        self.message_timeout_seconds * 1000
    }
}
