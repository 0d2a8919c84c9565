// src/config.rs

//! # Hub Configuration
//!
//! Listener address, queue sizes and liveness timings. Defaults match a
//! 60 second read deadline with keepalives every 54 seconds; every value can be
//! overridden through `HUB_*` environment variables.

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::services::pump::PumpTimings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Outbound queue slots per connection.
    pub queue_capacity: usize,
    /// Pending commands the hub accepts before callers wait.
    pub command_capacity: usize,
    /// Largest inbound message accepted from a client, in bytes.
    pub max_message_size: usize,
    /// How long a connection may go without a probe acknowledgment.
    pub pong_wait: Duration,
    /// Keepalive probe interval of the write pump. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for a single transport write.
    pub write_wait: Duration,
    /// How often the liveness monitor sweeps the registry.
    pub monitor_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            queue_capacity: 256,
            command_capacity: 1024,
            max_message_size: 4096,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            monitor_period: Duration::from_secs(30),
        }
    }
}

impl HubConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "HUB_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(capacity) = parse(&lookup, "HUB_QUEUE_CAPACITY")? {
            config.queue_capacity = capacity;
        }
        if let Some(capacity) = parse(&lookup, "HUB_COMMAND_CAPACITY")? {
            config.command_capacity = capacity;
        }
        if let Some(size) = parse(&lookup, "HUB_MAX_MESSAGE_SIZE")? {
            config.max_message_size = size;
        }
        if let Some(secs) = parse(&lookup, "HUB_PONG_WAIT_SECS")? {
            config.pong_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "HUB_PING_PERIOD_SECS")? {
            config.ping_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "HUB_WRITE_WAIT_SECS")? {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "HUB_MONITOR_PERIOD_SECS")? {
            config.monitor_period = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.command_capacity == 0 {
            return Err(ConfigError::Inconsistent(
                "queue and command capacities must be positive".to_string(),
            ));
        }
        if [self.pong_wait, self.ping_period, self.write_wait, self.monitor_period]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(ConfigError::Inconsistent(
                "durations must be non-zero".to_string(),
            ));
        }
        if self.ping_period >= self.pong_wait {
            return Err(ConfigError::Inconsistent(format!(
                "ping period {:?} must be shorter than pong wait {:?}",
                self.ping_period, self.pong_wait
            )));
        }
        Ok(())
    }

    pub fn pump_timings(&self) -> PumpTimings {
        PumpTimings {
            pong_wait: self.pong_wait,
            ping_period: self.ping_period,
            write_wait: self.write_wait,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
