use std::net::SocketAddr;

use serde::Deserialize;

use crosspath_core::correlator::CorrelatorConfig;
use crosspath_core::error::{Error, Result};

fn default_gc_interval_s() -> u64 {
    3600
}

fn default_retention_days() -> u64 {
    14
}

/// Static configuration of one worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Address the gRPC services listen on.
    pub listen_addr: String,

    /// Database directory; empty or absent allocates a temporary directory
    /// deleted on clean shutdown.
    #[serde(default)]
    pub db_path: Option<String>,

    /// Seconds between retention sweeps.
    #[serde(default = "default_gc_interval_s")]
    pub gc_interval_s: u64,

    /// Days of history kept by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default)]
    pub correlator: CorrelatorConfig,
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("can't read config file, path: {}, error: {}", path, e))
        })?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let config: WorkerConfig = toml::from_str(raw)
            .map_err(|e| Error::InvalidConfig(format!("can't parse config, error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            Error::InvalidConfig(format!(
                "bad listen address, addr: {}, error: {}",
                self.listen_addr, e
            ))
        })?;

        if self.gc_interval_s == 0 {
            return Err(Error::InvalidConfig("gc interval can't be zero".to_string()));
        }
        if self.retention_days == 0 {
            return Err(Error::InvalidConfig("retention can't be zero".to_string()));
        }

        Ok(())
    }

    /// Retention horizon in seconds.
    pub fn retention_s(&self) -> u64 {
        self.retention_days * 24 * 3600
    }
}
