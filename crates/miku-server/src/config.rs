//! Server configuration from environment variables.

use anyhow::Context;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Settings applied to every match task
#[derive(Debug, Clone, Copy)]
pub struct RoomConfig {
    /// Bound on queued commands per match
    pub queue_capacity: usize,
    /// How long a match with nobody connected survives
    pub idle_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub room: RoomConfig,
}

impl ServerConfig {
    /// Read `SERVER_ADDR`, `MATCH_QUEUE_CAPACITY` and `MATCH_IDLE_SECS`
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = RoomConfig::default();

        let addr = env_or("SERVER_ADDR", "0.0.0.0:8080".parse::<SocketAddr>()?)?;
        let queue_capacity = env_or("MATCH_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let idle_secs = env_or("MATCH_IDLE_SECS", defaults.idle_timeout.as_secs())?;

        anyhow::ensure!(queue_capacity > 0, "MATCH_QUEUE_CAPACITY must be positive");

        Ok(Self {
            addr,
            room: RoomConfig {
                queue_capacity,
                idle_timeout: Duration::from_secs(idle_secs),
            },
        })
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
