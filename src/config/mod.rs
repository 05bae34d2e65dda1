//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`MINREVIEW_*`)
//! - CLI arguments (applied by the binary on top of the above)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewError};
use crate::transport::Endpoint;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broadcast hub configuration
    #[serde(default)]
    pub hub: HubConfig,

    /// Review client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Download configuration
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ReviewError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| ReviewError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Hub settings
        if let Ok(host) = std::env::var("MINREVIEW_HUB_HOST") {
            config.hub.host = host;
        }
        if let Ok(port) = std::env::var("MINREVIEW_HUB_PORT") {
            if let Ok(port) = port.parse() {
                config.hub.port = port;
            }
        }
        if let Ok(prefix) = std::env::var("MINREVIEW_RESULT_PREFIX") {
            config.hub.result_prefix = prefix;
        }

        // Client settings
        if let Ok(endpoints) = std::env::var("MINREVIEW_ENDPOINTS") {
            let parsed: Vec<Endpoint> = endpoints
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                config.client.endpoints = parsed;
            }
        }
        if let Ok(dir) = std::env::var("MINREVIEW_CACHE_DIR") {
            config.client.cache_dir = PathBuf::from(dir);
        }

        // Download settings
        if let Ok(val) = std::env::var("MINREVIEW_DOWNLOAD_WORKERS") {
            if let Ok(val) = val.parse() {
                config.download.workers = Some(val);
            }
        }

        config
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let hub_default = HubConfig::default();
        let client_default = ClientConfig::default();
        Self {
            hub: HubConfig {
                host: if other.hub.host != hub_default.host {
                    other.hub.host
                } else {
                    self.hub.host
                },
                port: if other.hub.port != hub_default.port {
                    other.hub.port
                } else {
                    self.hub.port
                },
                result_prefix: if other.hub.result_prefix != hub_default.result_prefix {
                    other.hub.result_prefix
                } else {
                    self.hub.result_prefix
                },
                ..self.hub
            },
            client: ClientConfig {
                endpoints: if other.client.endpoints != client_default.endpoints {
                    other.client.endpoints
                } else {
                    self.client.endpoints
                },
                cache_dir: if other.client.cache_dir != client_default.cache_dir {
                    other.client.cache_dir
                } else {
                    self.client.cache_dir
                },
                ..self.client
            },
            download: DownloadConfig {
                workers: other.download.workers.or(self.download.workers),
                ..self.download
            },
        }
    }
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Keepalive ping period in seconds
    pub ping_period_secs: u64,

    /// Prefix stripped from the `address` query parameter of `/tasks`
    pub result_prefix: String,

    /// Wrap the router in a request tracing layer
    pub request_logging: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8194,
            ping_period_secs: 54,
            result_prefix: "/home/aoi/aoi".to_string(),
            request_logging: true,
        }
    }
}

impl HubConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Keepalive ping period
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }
}

/// Review client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hubs to keep a session with
    pub endpoints: Vec<Endpoint>,

    /// WebSocket handshake path
    pub handshake_path: String,

    /// Fixed delay between reconnect attempts in seconds
    pub reconnect_delay_secs: u64,

    /// Port used for report fetches from an inspector host
    pub report_port: u16,

    /// Relative prefix that marks an asset living under the shared project tree
    pub project_prefix: String,

    /// Root of the URL-derived download cache
    pub cache_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![Endpoint::new("127.0.0.1", 8194)],
            handshake_path: "/ws".to_string(),
            reconnect_delay_secs: 5,
            report_port: 80,
            project_prefix: "../../../../../program/projects/".to_string(),
            cache_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".cache"),
        }
    }
}

impl ClientConfig {
    /// Delay between reconnect attempts
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Connect/read timeout in seconds
    pub timeout_secs: u64,

    /// Body chunk size handed to sinks
    pub chunk_size: usize,

    /// Worker pool size (defaults to available parallelism)
    pub workers: Option<usize>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            chunk_size: 8 * 1024,
            workers: None,
        }
    }
}

impl DownloadConfig {
    /// Connect/read timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get()))
    }
}

/// Default on-disk location for a config file, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("minreview").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.hub.port, 8194);
        assert_eq!(config.hub.ping_period(), Duration::from_secs(54));
        assert_eq!(config.client.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.download.chunk_size, 8192);
        assert_eq!(config.download.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_hub_listen_addr() {
        let config = HubConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8194");
    }

    #[test]
    fn test_worker_count_fallback() {
        let config = DownloadConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert!(config.worker_count() >= 1);

        let config = DownloadConfig {
            workers: Some(3),
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [hub]
            host = "127.0.0.1"
            port = 9000
            result_prefix = "/data/results"

            [client]
            endpoints = [{ host = "10.0.0.5", port = 8194 }, { host = "10.0.0.6", port = 8195 }]
            reconnect_delay_secs = 2

            [download]
            workers = 2
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hub.port, 9000);
        assert_eq!(config.hub.ping_period_secs, 54);
        assert_eq!(config.hub.result_prefix, "/data/results");
        assert_eq!(config.client.endpoints.len(), 2);
        assert_eq!(config.client.endpoints[1], Endpoint::new("10.0.0.6", 8195));
        assert_eq!(config.client.handshake_path, "/ws");
        assert_eq!(config.download.worker_count(), 2);
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let base: Config = toml::from_str("[hub]\nport = 9100\n").unwrap();
        let over: Config = toml::from_str("[hub]\nresult_prefix = \"/x\"\n").unwrap();
        let merged = base.merge(over);
        assert_eq!(merged.hub.port, 9100);
        assert_eq!(merged.hub.result_prefix, "/x");
    }

    #[test]
    fn test_merge_keeps_base_only_fields() {
        let file: Config = toml::from_str("[hub]\nping_period_secs = 10\n[download]\nchunk_size = 1024\n").unwrap();
        let merged = file.merge(Config::default());
        assert_eq!(merged.hub.ping_period_secs, 10);
        assert_eq!(merged.download.chunk_size, 1024);
    }
}
