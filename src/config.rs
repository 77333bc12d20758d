//! Process configuration from environment variables.
//!
//! Both binaries read their addresses from the environment with the
//! defaults below; unset or unparsable values fall back silently, so a
//! bare `ship` / `offshore` invocation works on one machine out of the
//! box.

use std::time::Duration;

/// Default offshore relay target for the ship.
pub const DEFAULT_OFFSHORE_HOST: &str = "127.0.0.1";
/// Default offshore relay port.
pub const DEFAULT_OFFSHORE_PORT: u16 = 9999;
/// Default ship proxy listener host.
pub const DEFAULT_PROXY_HOST: &str = "0.0.0.0";
/// Default ship proxy listener port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;
/// Default offshore relay listener host.
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
/// Default offshore relay listener port.
pub const DEFAULT_LISTEN_PORT: u16 = 9999;

/// Relay dial attempts before the ship gives up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Delay between relay dial attempts.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Ship process configuration.
#[derive(Debug, Clone)]
pub struct ShipConfig {
    /// Offshore relay host to dial.
    pub offshore_host: String,
    /// Offshore relay port to dial.
    pub offshore_port: u16,
    /// Local proxy listener host.
    pub proxy_host: String,
    /// Local proxy listener port.
    pub proxy_port: u16,
    /// Relay dial attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between relay dial attempts.
    pub connect_backoff: Duration,
}

impl ShipConfig {
    /// Read configuration from `OFFSHORE_HOST`, `OFFSHORE_PORT`,
    /// `PROXY_HOST` and `PROXY_PORT`.
    pub fn from_env() -> Self {
        Self {
            offshore_host: env_or("OFFSHORE_HOST", DEFAULT_OFFSHORE_HOST),
            offshore_port: env_port("OFFSHORE_PORT", DEFAULT_OFFSHORE_PORT),
            proxy_host: env_or("PROXY_HOST", DEFAULT_PROXY_HOST),
            proxy_port: env_port("PROXY_PORT", DEFAULT_PROXY_PORT),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
        }
    }

    /// `host:port` of the offshore relay.
    pub fn offshore_addr(&self) -> String {
        format!("{}:{}", self.offshore_host, self.offshore_port)
    }

    /// `host:port` the proxy listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

/// Offshore process configuration.
#[derive(Debug, Clone)]
pub struct OffshoreConfig {
    /// Relay listener host.
    pub listen_host: String,
    /// Relay listener port.
    pub listen_port: u16,
}

impl OffshoreConfig {
    /// Read configuration from `LISTEN_HOST` and `LISTEN_PORT`.
    pub fn from_env() -> Self {
        Self {
            listen_host: env_or("LISTEN_HOST", DEFAULT_LISTEN_HOST),
            listen_port: env_port("LISTEN_PORT", DEFAULT_LISTEN_PORT),
        }
    }

    /// `host:port` the relay listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_port(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_env_unset() {
        // Use variable names no other test touches.
        assert_eq!(env_or("SHOREWIRE_TEST_UNSET_HOST", "fallback"), "fallback");
        assert_eq!(env_port("SHOREWIRE_TEST_UNSET_PORT", 1234), 1234);
    }

    #[test]
    fn test_unparsable_port_falls_back() {
        std::env::set_var("SHOREWIRE_TEST_BAD_PORT", "not-a-port");
        assert_eq!(env_port("SHOREWIRE_TEST_BAD_PORT", 4321), 4321);
        std::env::remove_var("SHOREWIRE_TEST_BAD_PORT");
    }

    #[test]
    fn test_addr_formatting() {
        let config = ShipConfig {
            offshore_host: "10.0.0.1".into(),
            offshore_port: 9999,
            proxy_host: "0.0.0.0".into(),
            proxy_port: 8080,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
        };
        assert_eq!(config.offshore_addr(), "10.0.0.1:9999");
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }
}
