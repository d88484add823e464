//! Configuration for the feed handler.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MOLDFEED_CONFIG (explicit override)
//!   2. config/config.toml (relative to the working directory)
//!
//! The file must exist; running without a feed to join makes no sense.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::layout::{LayoutError, MessageTable};

/// Rerequest chunk size used when none (or zero) is configured.
pub const DEFAULT_RECOVERY_CHUNK: u16 = 5000;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// JSON message layout file.
    pub layout_path: PathBuf,
    pub feed_channels: FeedChannelsConfig,
    pub recovery_settings: RecoverySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedChannelsConfig {
    /// Multicast group carrying the live feed.
    pub mcast_ip: Option<Ipv4Addr>,
    pub mcast_port: u16,
    /// Source address for a source-specific join. Unset = any-source.
    pub mcast_source_ip: Option<Ipv4Addr>,
    /// Local interface address used to join the group.
    pub interface_ip: Option<Ipv4Addr>,
    /// Unicast rerequest server.
    pub mcast_rerequester_ip: Option<Ipv4Addr>,
    pub mcast_rerequester_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Messages requested per rerequest. 0 = default (5000).
    pub max_recovery_message_count: u16,
    /// Per-receive deadline while waiting for replies.
    pub reply_timeout_ms: u64,
    /// How long to wait for a live header to learn the session. 0 = forever.
    pub session_timeout_ms: u64,
    /// SO_RCVBUF for both the multicast and the unicast socket.
    pub receive_buffer_bytes: usize,
}

/// Everything needed to join the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastTarget {
    pub group: Ipv4Addr,
    pub port: u16,
    pub interface: Ipv4Addr,
    pub source: Option<Ipv4Addr>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            layout_path: PathBuf::from("config/layout.json"),
            feed_channels: FeedChannelsConfig::default(),
            recovery_settings: RecoverySettings::default(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_recovery_message_count: DEFAULT_RECOVERY_CHUNK,
            reply_timeout_ms: 1000,
            session_timeout_ms: 0,
            receive_buffer_bytes: 4 * 1024 * 1024,
        }
    }
}

impl RecoverySettings {
    /// Messages per rerequest, never zero.
    pub fn chunk_size(&self) -> u16 {
        match self.max_recovery_message_count {
            0 => DEFAULT_RECOVERY_CHUNK,
            n => n,
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms.max(1))
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        match self.session_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1:?}")]
    InvalidOverride(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FeedConfig {
    /// Load config: env vars → file. The file is mandatory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load `path`, taking overrides from `lookup` instead of the process env.
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: FeedConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MOLDFEED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("config.toml"))
    }

    /// Live feed settings. Group, port and interface are mandatory.
    pub fn multicast(&self) -> Result<MulticastTarget, ConfigError> {
        let channels = &self.feed_channels;
        let group = channels
            .mcast_ip
            .ok_or(ConfigError::Missing("feed_channels.mcast_ip"))?;
        if channels.mcast_port == 0 {
            return Err(ConfigError::Missing("feed_channels.mcast_port"));
        }
        let interface = channels
            .interface_ip
            .ok_or(ConfigError::Missing("feed_channels.interface_ip"))?;
        Ok(MulticastTarget {
            group,
            port: channels.mcast_port,
            interface,
            source: channels.mcast_source_ip,
        })
    }

    /// Rerequest server address. Only needed in recovery mode.
    pub fn rerequester(&self) -> Result<SocketAddrV4, ConfigError> {
        let channels = &self.feed_channels;
        let ip = channels
            .mcast_rerequester_ip
            .ok_or(ConfigError::Missing("feed_channels.mcast_rerequester_ip"))?;
        if channels.mcast_rerequester_port == 0 {
            return Err(ConfigError::Missing("feed_channels.mcast_rerequester_port"));
        }
        Ok(SocketAddrV4::new(ip, channels.mcast_rerequester_port))
    }

    /// Load the message layout table named by `layout_path`.
    pub fn load_layout(&self) -> Result<MessageTable, LayoutError> {
        MessageTable::load(&self.layout_path)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(key: &'static str, v: String) -> Result<T, ConfigError> {
            v.trim().parse().map_err(|_| ConfigError::InvalidOverride(key, v))
        }

        if let Some(v) = lookup("MOLDFEED_LAYOUT_PATH") {
            self.layout_path = PathBuf::from(v);
        }
        let channels = &mut self.feed_channels;
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__MCAST_IP") {
            channels.mcast_ip = Some(parsed("MOLDFEED_FEED_CHANNELS__MCAST_IP", v)?);
        }
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__MCAST_PORT") {
            channels.mcast_port = parsed("MOLDFEED_FEED_CHANNELS__MCAST_PORT", v)?;
        }
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__MCAST_SOURCE_IP") {
            channels.mcast_source_ip = Some(parsed("MOLDFEED_FEED_CHANNELS__MCAST_SOURCE_IP", v)?);
        }
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__INTERFACE_IP") {
            channels.interface_ip = Some(parsed("MOLDFEED_FEED_CHANNELS__INTERFACE_IP", v)?);
        }
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__MCAST_REREQUESTER_IP") {
            channels.mcast_rerequester_ip =
                Some(parsed("MOLDFEED_FEED_CHANNELS__MCAST_REREQUESTER_IP", v)?);
        }
        if let Some(v) = lookup("MOLDFEED_FEED_CHANNELS__MCAST_REREQUESTER_PORT") {
            channels.mcast_rerequester_port =
                parsed("MOLDFEED_FEED_CHANNELS__MCAST_REREQUESTER_PORT", v)?;
        }
        let recovery = &mut self.recovery_settings;
        if let Some(v) = lookup("MOLDFEED_RECOVERY_SETTINGS__MAX_RECOVERY_MESSAGE_COUNT") {
            recovery.max_recovery_message_count =
                parsed("MOLDFEED_RECOVERY_SETTINGS__MAX_RECOVERY_MESSAGE_COUNT", v)?;
        }
        if let Some(v) = lookup("MOLDFEED_RECOVERY_SETTINGS__REPLY_TIMEOUT_MS") {
            recovery.reply_timeout_ms = parsed("MOLDFEED_RECOVERY_SETTINGS__REPLY_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("MOLDFEED_RECOVERY_SETTINGS__SESSION_TIMEOUT_MS") {
            recovery.session_timeout_ms =
                parsed("MOLDFEED_RECOVERY_SETTINGS__SESSION_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("MOLDFEED_RECOVERY_SETTINGS__RECEIVE_BUFFER_BYTES") {
            recovery.receive_buffer_bytes =
                parsed("MOLDFEED_RECOVERY_SETTINGS__RECEIVE_BUFFER_BYTES", v)?;
        }
        Ok(())
    }
}
