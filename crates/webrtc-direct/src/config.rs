//! Transport configuration
//!
//! Plain structs with serde defaults so a host process can embed them in its
//! own configuration file. Nothing here reads from disk.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default STUN servers handed to the WebRTC stack
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
];

/// Label of the single data channel opened per connection
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "webrtc-direct";

pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_GATHER_TIMEOUT_MS: u64 = 10_000;

/// WebRTC-level settings for a single channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
    /// Upper bound on ICE gathering before the local description is sent
    /// as-is (candidates are never trickled)
    #[serde(default = "default_gather_timeout_ms")]
    pub gather_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            data_channel_label: default_data_channel_label(),
            gather_timeout_ms: default_gather_timeout_ms(),
        }
    }
}

impl ChannelConfig {
    /// Config without any STUN servers, for loopback/LAN use
    pub fn local_only() -> Self {
        Self {
            stun_servers: Vec::new(),
            ..Default::default()
        }
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}

fn default_data_channel_label() -> String {
    DEFAULT_DATA_CHANNEL_LABEL.to_string()
}

fn default_gather_timeout_ms() -> u64 {
    DEFAULT_GATHER_TIMEOUT_MS
}

fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}

/// Top-level transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRTCDirectConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

impl Default for WebRTCDirectConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            dial_timeout_ms: default_dial_timeout_ms(),
        }
    }
}

impl WebRTCDirectConfig {
    /// Dial options seeded from this config
    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            cancel: None,
            timeout: Duration::from_millis(self.dial_timeout_ms),
            channel: self.channel.clone(),
        }
    }

    /// Listener options seeded from this config
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            channel: self.channel.clone(),
        }
    }
}

/// Per-dial options
///
/// The channel role (initiator) and trickle setting (off) are fixed by the
/// dialer and cannot be overridden here.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub cancel: Option<CancellationToken>,
    pub timeout: Duration,
    pub channel: ChannelConfig,
}

impl Default for DialOptions {
    fn default() -> Self {
        WebRTCDirectConfig::default().dial_options()
    }
}

impl DialOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// Options for a listener; every inbound channel is a responder with
/// trickle disabled
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    pub channel: ChannelConfig,
}

impl ListenerOptions {
    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WebRTCDirectConfig::default();
        assert_eq!(config.dial_timeout_ms, DEFAULT_DIAL_TIMEOUT_MS);
        assert!(!config.channel.stun_servers.is_empty());
        assert_eq!(config.channel.data_channel_label, "webrtc-direct");

        let opts = config.dial_options();
        assert!(opts.cancel.is_none());
        assert_eq!(opts.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: WebRTCDirectConfig =
            serde_json::from_str(r#"{"dial_timeout_ms": 500, "channel": {"stun_servers": []}}"#)
                .unwrap();
        assert_eq!(config.dial_timeout_ms, 500);
        assert!(config.channel.stun_servers.is_empty());
        assert_eq!(config.channel.gather_timeout_ms, DEFAULT_GATHER_TIMEOUT_MS);
    }

    #[test]
    fn test_local_only_has_no_stun() {
        let channel = ChannelConfig::local_only();
        assert!(channel.stun_servers.is_empty());
        assert_eq!(channel.gather_timeout(), Duration::from_secs(10));
    }
}
