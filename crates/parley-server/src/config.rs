//! Server settings read from `PARLEY_*` environment variables.
//!
//! Everything has a default so a bare `parley` starts for local development.

use std::path::PathBuf;
use std::time::Duration;

use parley_gateway::GatewayConfig;
use parley_gateway::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `PARLEY_HOST`
    pub host: String,

    /// Env: `PARLEY_PORT`
    pub port: u16,

    /// SQLite file. Env: `PARLEY_DB_PATH`
    pub db_path: PathBuf,

    /// Shared HS256 secret of the sign-in service. Env: `PARLEY_JWT_SECRET`
    pub jwt_secret: String,

    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("parley.db"),
            jwt_secret: "dev-secret-change-me".into(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// unparsable numbers are an error rather than a silent fallback.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("PARLEY_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PARLEY_PORT") {
            config.port = parse_number("PARLEY_PORT", &port)?;
        }
        if let Some(path) = lookup("PARLEY_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secret) = lookup("PARLEY_JWT_SECRET") {
            config.jwt_secret = secret;
        }

        let gateway = &mut config.gateway;
        if let Some(v) = lookup("PARLEY_HEARTBEAT_SECS") {
            gateway.heartbeat_interval = Duration::from_secs(parse_number("PARLEY_HEARTBEAT_SECS", &v)?);
        }
        if let Some(v) = lookup("PARLEY_READ_DEADLINE_SECS") {
            gateway.read_deadline = Duration::from_secs(parse_number("PARLEY_READ_DEADLINE_SECS", &v)?);
        }
        if let Some(v) = lookup("PARLEY_WRITE_TIMEOUT_SECS") {
            gateway.write_timeout = Duration::from_secs(parse_number("PARLEY_WRITE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("PARLEY_OUTBOUND_CAPACITY") {
            gateway.outbound_capacity = parse_number("PARLEY_OUTBOUND_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("PARLEY_MAX_FRAME_BYTES") {
            gateway.max_frame_bytes = parse_number("PARLEY_MAX_FRAME_BYTES", &v)?;
        }

        config.gateway.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.gateway.read_deadline, Duration::from_secs(60));
        assert_eq!(config.gateway.outbound_capacity, 256);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PARLEY_PORT", "9000"),
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_HEARTBEAT_SECS", "10"),
            ("PARLEY_READ_DEADLINE_SECS", "25"),
            ("PARLEY_MAX_FRAME_BYTES", "8192"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.gateway.read_deadline, Duration::from_secs(25));
        assert_eq!(config.gateway.max_frame_bytes, 8192);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = load(&[("PARLEY_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "PARLEY_PORT", .. }));
    }

    #[test]
    fn deadline_shorter_than_two_heartbeats_is_rejected() {
        let err = load(&[("PARLEY_HEARTBEAT_SECS", "30"), ("PARLEY_READ_DEADLINE_SECS", "45")]).unwrap_err();
        assert!(matches!(err, ConfigError::DeadlineTooShort { .. }));
    }
}
