use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    /// 0 binds an ephemeral port.
    pub port: u16,
    pub backlog: i32,
    /// Scratch size for a single socket read.
    pub read_chunk: usize,
    /// First allocation of each connection buffer.
    pub buffer_seed: usize,
    pub events_capacity: usize,
    /// Create a wakeup primitive so other threads can interrupt the wait.
    pub wakeup: bool,
    /// Wait timeout used only when the wakeup primitive is unavailable.
    pub idle_poll_ms: u64,
    pub nodelay: bool,
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED,
            port: 0,
            backlog: 5,
            read_chunk: 4096,
            buffer_seed: 256,
            events_capacity: 1024,
            wakeup: true,
            idle_poll_ms: 100,
            nodelay: false,
            thread_name: "corral-worker".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_chunk == 0 {
            return Err(EngineError::Config("read_chunk must be non-zero".into()));
        }
        if self.buffer_seed == 0 {
            return Err(EngineError::Config("buffer_seed must be non-zero".into()));
        }
        if self.events_capacity == 0 {
            return Err(EngineError::Config("events_capacity must be non-zero".into()));
        }
        if !self.wakeup && self.idle_poll_ms == 0 {
            return Err(EngineError::Config(
                "idle_poll_ms must be non-zero when wakeup is disabled".into(),
            ));
        }
        Ok(())
    }
}
