use std::time::Duration;

use crate::error::ConfigError;

/// Per-connection tuning for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How often the writer sends a WebSocket ping.
    pub heartbeat_interval: Duration,

    /// Longest the reader waits for any inbound frame (including pongs)
    /// before the connection is considered dead.
    pub read_deadline: Duration,

    /// Upper bound on a single socket write.
    pub write_timeout: Duration,

    /// Capacity of each endpoint's outbound queue. A full queue gets the
    /// endpoint dropped.
    pub outbound_capacity: usize,

    /// Largest inbound message accepted, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
            max_frame_bytes: 4096,
        }
    }
}

impl GatewayConfig {
    /// One missed pong must not evict a client; two in a row will.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero("heartbeat interval"));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Zero("write timeout"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound capacity"));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Zero("max frame size"));
        }
        if self.read_deadline < self.heartbeat_interval * 2 {
            return Err(ConfigError::DeadlineTooShort {
                read_deadline: self.read_deadline,
                heartbeat: self.heartbeat_interval,
            });
        }
        Ok(())
    }
}
