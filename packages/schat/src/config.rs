use anyhow::{Context, Result};
use schat_protocol::MAX_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / schat.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   schat.toml:      [server]
//                    idle_timeout_secs = 120
//
//   env var:         SCHAT_SERVER__IDLE_TIMEOUT_SECS=120   (double underscore = nesting)
//
//   CLI:             `schat server <port>` overrides server.port

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "schat.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Server tuning knobs (lives under `[server]` in schat.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 0 disables the idle timeout.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            write_timeout_ms: default_write_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Client knobs (lives under `[client]` in schat.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4500
}
fn default_max_connections() -> usize {
    256
}
fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_write_timeout_ms() -> u64 {
    10_000
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("download")
}

/// Build a figment that layers: defaults → schat.toml → SCHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SCHAT_SERVER__PORT=5000`  →  `server.port = 5000`
///   `SCHAT_CLIENT__DOWNLOAD_DIR=/tmp/dl`  →  `client.download_dir = "/tmp/dl"`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SCHAT_").split("__"))
}

/// Load and extract the layered configuration.
pub fn read_config(config_path: Option<&Path>) -> Result<FileConfig> {
    load_config(config_path)
        .extract()
        .context("Failed to load schat configuration")
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions allowed to run at once; further connections wait.
    pub max_connections: usize,
    /// Close sessions that send nothing for this long (None = disabled)
    pub idle_timeout: Option<Duration>,
    /// Bound on any single write to a client
    pub write_timeout: Duration,
    /// Bound on waiting for a recipient's write lock
    pub lock_timeout: Duration,
    /// Raw payload copy chunk, 1..=MAX_CHUNK_SIZE
    pub chunk_size: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
            max_connections: fc.max_connections.max(1),
            idle_timeout: if fc.idle_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.idle_timeout_secs))
            },
            write_timeout: Duration::from_millis(fc.write_timeout_ms),
            lock_timeout: Duration::from_millis(fc.lock_timeout_ms),
            chunk_size: fc.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(&ServerFileConfig::default())
    }
}

/// Client configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Received files land in `<download_dir>/<username>/`
    pub download_dir: PathBuf,
}

impl ClientConfig {
    pub fn from_file(fc: &ClientFileConfig) -> Self {
        Self {
            download_dir: fc.download_dir.clone(),
        }
    }

    pub fn user_download_dir(&self, username: &str) -> PathBuf {
        self.download_dir.join(username)
    }
}
