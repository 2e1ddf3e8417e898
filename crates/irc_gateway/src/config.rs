//! Engine-wide tunables that aren't per-account data (reconnect backoff, keepalive timing, hub
//! buffer sizing). Per-network configuration (server address, identity, channels) comes from the
//! external account store, not from this file.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway: Gateway,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Gateway {
    pub reconnect_backoff_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub subscriber_buffer: usize,
    /// How many times `connect_and_register` retries a failed TCP/TLS connect, waiting
    /// `reconnect_backoff_secs` between attempts, before giving up. 1 means "try once, don't
    /// retry".
    pub connect_attempts: u32,
}

impl Default for Gateway {
    fn default() -> Self {
        Gateway {
            reconnect_backoff_secs: 30,
            ping_interval_secs: 60,
            pong_timeout_secs: 60,
            subscriber_buffer: 64,
            connect_attempts: 3,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            gateway: Gateway::default(),
        }
    }
}

impl GatewayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.gateway.reconnect_backoff_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.pong_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_with_no_file() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.gateway.subscriber_buffer, 64);
        assert_eq!(cfg.ping_interval(), Duration::from_secs(60));
    }

    #[test]
    fn parses_partial_toml_with_defaults_filled_in() {
        let cfg: GatewayConfig = toml::from_str("[gateway]\nping_interval_secs = 120\n").unwrap();
        assert_eq!(cfg.gateway.ping_interval_secs, 120);
        assert_eq!(cfg.gateway.pong_timeout_secs, 60);
        assert_eq!(cfg.gateway.connect_attempts, 3);
    }
}
