//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Which transport to use and where to find the daemon
    #[serde(default)]
    pub transport: TransportSettings,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Bot action queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Admission control for outgoing requests
    #[serde(default)]
    pub limits: LimitConfig,
}

/// Transport kind selector
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawn the daemon as a child process and talk over stdio
    #[default]
    Stdio,
    /// Connect to a daemon listening on a local socket
    UnixSocket,
    /// Connect to a daemon listening on TCP
    Tcp,
    /// Stateless HTTP POST per request (no notifications)
    Http,
}

/// Where and how to reach the daemon
#[derive(Debug, Deserialize, Clone)]
pub struct TransportSettings {
    /// Selected transport kind
    #[serde(default)]
    pub kind: TransportKind,

    /// Path to the daemon executable (stdio mode). Searched on PATH
    /// when not set
    pub daemon_path: Option<PathBuf>,

    /// Extra arguments passed to the daemon (stdio mode)
    #[serde(default)]
    pub daemon_args: Vec<String>,

    /// Account identifier passed to the daemon (stdio mode)
    pub account: Option<String>,

    /// Local socket path (unix_socket mode)
    pub socket_path: Option<PathBuf>,

    /// host:port address (tcp mode)
    pub tcp_address: Option<String>,

    /// Endpoint URL (http mode)
    pub http_url: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            daemon_path: None,
            daemon_args: Vec::new(),
            account: None,
            socket_path: None,
            tcp_address: None,
            http_url: None,
        }
    }
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout applied to every JSON-RPC call
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Grace period to wait for the first line of daemon output before
    /// declaring the connection established anyway
    #[serde(default = "default_connect_grace")]
    pub connect_grace_ms: u64,

    /// How long to wait between terminate and force-kill on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: default_request(),
            connect_grace_ms: default_connect_grace(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

fn default_request() -> u64 {
    30
}
fn default_connect_grace() -> u64 {
    500
}
fn default_shutdown_grace() -> u64 {
    2000
}

impl Timeouts {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.connect_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Reconnection settings
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff, doubled on each attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    1000
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Bot action queue settings
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Fixed delay inserted between dispatched actions
    #[serde(default = "default_action_delay")]
    pub action_delay_ms: u64,

    /// Grace period before deleting temporary attachment files, so the
    /// daemon has finished reading them
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,

    /// Per-user command cooldown window
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            action_delay_ms: default_action_delay(),
            cleanup_grace_secs: default_cleanup_grace(),
            cooldown_secs: default_cooldown(),
        }
    }
}

fn default_action_delay() -> u64 {
    500
}
fn default_cleanup_grace() -> u64 {
    30
}
fn default_cooldown() -> u64 {
    3
}

impl QueueConfig {
    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Admission control settings for the request limiter
#[derive(Debug, Deserialize, Clone)]
pub struct LimitConfig {
    /// Maximum number of concurrently outstanding requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Minimum spacing between request starts
    #[serde(default = "default_min_interval")]
    pub min_request_interval_ms: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            min_request_interval_ms: default_min_interval(),
        }
    }
}

fn default_max_concurrent() -> usize {
    8
}
fn default_min_interval() -> u64 {
    0
}

impl LimitConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }

    /// Resolve the daemon executable path for stdio mode
    ///
    /// Falls back to searching PATH for `relayd` if not explicitly set
    pub fn daemon_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.transport.daemon_path {
            return Some(path.clone());
        }
        which::which("relayd").ok()
    }
}
