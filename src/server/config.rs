//! Hub server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::HubConfig;
use crate::error::{Result, ReviewError};

/// Hub server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Keepalive ping period for hub sessions
    pub ping_period: Duration,
    /// Prefix stripped from the `/tasks` address parameter
    pub result_prefix: String,
    /// Enable request logging
    pub logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8194)),
            ping_period: Duration::from_secs(54),
            result_prefix: "/home/aoi/aoi".to_string(),
            logging: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `[hub]` section of the file/env configuration
    pub fn from_hub(hub: &HubConfig) -> Result<Self> {
        let addr = hub
            .listen_addr()
            .parse()
            .map_err(|e| ReviewError::Config(format!("invalid hub address {}: {e}", hub.listen_addr())))?;

        let config = Self {
            addr,
            ping_period: hub.ping_period(),
            result_prefix: hub.result_prefix.clone(),
            logging: hub.request_logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the hub cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ping_period.is_zero() {
            return Err(ReviewError::Config("ping period must be greater than zero".into()));
        }
        Ok(())
    }

    /// Keep the current host, change the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to loopback only
    pub fn localhost(mut self) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], self.addr.port()));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set keepalive ping period
    pub fn with_ping_period(mut self, period: Duration) -> Self {
        self.ping_period = period;
        self
    }

    /// Set the `/tasks` address prefix
    pub fn with_result_prefix(mut self, prefix: &str) -> Self {
        self.result_prefix = prefix.to_string();
        self
    }

    /// Disable logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hub_section() {
        let hub = HubConfig {
            host: "127.0.0.1".into(),
            port: 9000,
            ping_period_secs: 10,
            result_prefix: "/data".into(),
            request_logging: false,
        };
        let config = ServerConfig::from_hub(&hub).unwrap();
        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.ping_period, Duration::from_secs(10));
        assert_eq!(config.result_prefix, "/data");
        assert!(!config.logging);
    }

    #[test]
    fn test_from_hub_rejects_hostname() {
        let hub = HubConfig {
            host: "not an ip".into(),
            ..HubConfig::default()
        };
        assert!(matches!(ServerConfig::from_hub(&hub), Err(ReviewError::Config(_))));
    }

    #[test]
    fn test_from_hub_rejects_zero_ping_period() {
        let hub = HubConfig {
            ping_period_secs: 0,
            ..HubConfig::default()
        };
        assert!(matches!(ServerConfig::from_hub(&hub), Err(ReviewError::Config(_))));
        assert!(ServerConfig::default()
            .with_ping_period(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::default().with_port(0).localhost().without_logging();
        assert_eq!(config.addr.port(), 0);
        assert!(config.addr.ip().is_loopback());
        assert!(!config.logging);
    }
}
