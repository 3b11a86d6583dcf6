//! Daemon configuration loaded from environment variables.
//!
//! All settings have sensible defaults so an instance can start with zero
//! configuration on a local network.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use signet_net::{DiscoveryConfig, GuardConfig, HandshakeConfig};
use signet_shared::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_SECS, DEFAULT_FUZZY_THRESHOLD, DEFAULT_LIVENESS_WINDOW_SECS,
    DEFAULT_PORT, DEFAULT_SESSION_TTL_SECS, SYNC_TIMEOUT_SECS,
};
use signet_shared::Capabilities;
use signet_sync::{MergeConfig, ShareMode, SyncConfig};

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address the TCP listener binds to.
    /// Env: `SIGNET_LISTEN_ADDR`
    /// Default: `0.0.0.0`
    pub listen_addr: IpAddr,

    /// TCP sync port; also the UDP discovery port.
    /// Env: `SIGNET_PORT`
    /// Default: `8765`
    pub port: u16,

    /// Human-readable name broadcast in announcements.
    /// Env: `SIGNET_INSTANCE_NAME`
    /// Default: `"Signet Node"`
    pub instance_name: String,

    /// Path of the hex-encoded identity key file. Created on first run.
    /// Env: `SIGNET_KEY_FILE`
    /// Default: `./signet.key`
    pub key_file: PathBuf,

    /// Discovery broadcast interval in seconds.
    /// Env: `SIGNET_ANNOUNCE_INTERVAL_SECS`
    pub announce_interval_secs: u64,

    /// Peers silent for longer than this are evicted, in seconds.
    /// Env: `SIGNET_LIVENESS_WINDOW_SECS`
    pub liveness_window_secs: u64,

    /// Session time-to-live in seconds.
    /// Env: `SIGNET_SESSION_TTL_SECS`
    pub session_ttl_secs: u64,

    /// Rate-limit burst capacity per source address.
    /// Env: `SIGNET_RATE_CAPACITY`
    pub rate_capacity: f64,

    /// Rate-limit refill per second.
    /// Env: `SIGNET_RATE_REFILL`
    pub rate_refill: f64,

    /// Strikes within the window before an address is blacklisted.
    /// Env: `SIGNET_STRIKE_THRESHOLD`
    pub strike_threshold: u32,

    /// Blacklist duration in seconds.
    /// Env: `SIGNET_BLACKLIST_SECS`
    pub blacklist_secs: u64,

    /// Total concurrent session cap.
    /// Env: `SIGNET_MAX_SESSIONS`
    pub max_sessions: usize,

    /// Concurrent session cap per address.
    /// Env: `SIGNET_MAX_SESSIONS_PER_ADDR`
    pub max_sessions_per_addr: usize,

    /// Fuzzy similarity threshold for duplicate candidates.
    /// Env: `SIGNET_FUZZY_THRESHOLD`
    pub fuzzy_threshold: f64,

    /// Default share mode offered to the UI (`all` or `selected`).
    /// Env: `SIGNET_SHARE_MODE`
    pub share_mode: ShareMode,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            instance_name: "Signet Node".to_string(),
            key_file: PathBuf::from("./signet.key"),
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            liveness_window_secs: DEFAULT_LIVENESS_WINDOW_SECS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            rate_capacity: 30.0,
            rate_refill: 10.0,
            strike_threshold: 5,
            blacklist_secs: 30 * 60,
            max_sessions: 10,
            max_sessions_per_addr: 2,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            share_mode: ShareMode::All,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults and warning on unparseable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SIGNET_LISTEN_ADDR") {
            match addr.parse::<IpAddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid SIGNET_LISTEN_ADDR, using default"),
            }
        }

        parse_env("SIGNET_PORT", &mut config.port);
        parse_env("SIGNET_ANNOUNCE_INTERVAL_SECS", &mut config.announce_interval_secs);
        parse_env("SIGNET_LIVENESS_WINDOW_SECS", &mut config.liveness_window_secs);
        parse_env("SIGNET_SESSION_TTL_SECS", &mut config.session_ttl_secs);
        parse_env("SIGNET_RATE_CAPACITY", &mut config.rate_capacity);
        parse_env("SIGNET_RATE_REFILL", &mut config.rate_refill);
        parse_env("SIGNET_STRIKE_THRESHOLD", &mut config.strike_threshold);
        parse_env("SIGNET_BLACKLIST_SECS", &mut config.blacklist_secs);
        parse_env("SIGNET_MAX_SESSIONS", &mut config.max_sessions);
        parse_env("SIGNET_MAX_SESSIONS_PER_ADDR", &mut config.max_sessions_per_addr);
        parse_env("SIGNET_FUZZY_THRESHOLD", &mut config.fuzzy_threshold);

        if let Ok(name) = std::env::var("SIGNET_INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Ok(path) = std::env::var("SIGNET_KEY_FILE") {
            config.key_file = PathBuf::from(path);
        }

        if let Ok(mode) = std::env::var("SIGNET_SHARE_MODE") {
            match mode.to_lowercase().as_str() {
                "all" => config.share_mode = ShareMode::All,
                "selected" => config.share_mode = ShareMode::Selected,
                other => {
                    tracing::warn!(value = %other, "Invalid SIGNET_SHARE_MODE, using default")
                }
            }
        }

        config
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            rate_capacity: self.rate_capacity,
            rate_refill_per_sec: self.rate_refill,
            strike_threshold: self.strike_threshold,
            blacklist_duration: Duration::from_secs(self.blacklist_secs),
            max_sessions: self.max_sessions,
            max_sessions_per_addr: self.max_sessions_per_addr,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            liveness_window: Duration::from_secs(self.liveness_window_secs),
            ..GuardConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.port,
            advertised_port: self.port,
            instance_name: self.instance_name.clone(),
            capabilities: Capabilities::all(),
            announce_interval: Duration::from_secs(self.announce_interval_secs),
            liveness_window: Duration::from_secs(self.liveness_window_secs),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            listen_addr: self.listen_addr,
            listen_port: self.port,
            handshake: HandshakeConfig {
                session_ttl: Duration::from_secs(self.session_ttl_secs),
                ..HandshakeConfig::default()
            },
            sync_timeout: Duration::from_secs(SYNC_TIMEOUT_SECS),
            merge: MergeConfig {
                fuzzy_threshold: self.fuzzy_threshold,
                ..MergeConfig::default()
            },
            ..SyncConfig::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = name, value = %value, "Invalid value, using default"),
        }
    }
}
