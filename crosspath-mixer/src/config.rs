use std::collections::HashSet;
use std::net::SocketAddr;

use serde::Deserialize;

use crosspath_core::correlator::CorrelatorConfig;
use crosspath_core::crosspath::LocationSample;
use crosspath_core::error::{Error, Result};

/// Area name of the fallback shard accepting points no other shard claims.
pub const DEFAULT_AREA: &str = "default";

fn default_worker_timeout_ms() -> u64 {
    60_000
}

/// Config of a shard: a name and the workers sharing its state.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    pub name: String,
    pub workers: Vec<String>,
}

/// Config of a partition: a spatio-temporal rectangle owned by one shard.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    pub shard: String,
    pub area: String,

    /// Beginning of the covered time range, seconds since epoch.
    #[serde(default)]
    pub ts: u64,

    #[serde(default)]
    pub gps_longitude_begin: f32,
    #[serde(default)]
    pub gps_latitude_begin: f32,
    #[serde(default)]
    pub gps_longitude_end: f32,
    #[serde(default)]
    pub gps_latitude_end: f32,
}

impl PartitionConfig {
    pub fn is_default_area(&self) -> bool {
        self.area == DEFAULT_AREA
    }

    /// Explicit point-in-rectangle test used for write routing.
    pub fn contains(&self, location: &LocationSample) -> bool {
        location.timestamp >= self.ts
            && location.gps_longitude >= self.gps_longitude_begin
            && location.gps_longitude < self.gps_longitude_end
            && location.gps_latitude >= self.gps_latitude_begin
            && location.gps_latitude < self.gps_latitude_end
    }
}

/// Config for mixers.
#[derive(Debug, Clone, Deserialize)]
pub struct MixerConfig {
    /// Address the gRPC service listens on.
    pub listen_addr: String,

    /// Timeout applied to every worker call.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,

    #[serde(default)]
    pub correlator: CorrelatorConfig,

    #[serde(default, rename = "shard")]
    pub shards: Vec<ShardConfig>,

    #[serde(default, rename = "partition")]
    pub partitions: Vec<PartitionConfig>,
}

impl MixerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("can't read config file, path: {}, error: {}", path, e))
        })?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let config: MixerConfig = toml::from_str(raw)
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

        if self.shards.is_empty() {
            return Err(Error::InvalidConfig("empty shard set".to_string()));
        }

        let mut shard_names = HashSet::new();
        for shard in &self.shards {
            if shard.workers.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "shard without workers, shard: {}",
                    shard.name
                )));
            }
            if !shard_names.insert(shard.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate shard name, shard: {}",
                    shard.name
                )));
            }
        }

        let mut default_shards = HashSet::new();
        for partition in &self.partitions {
            if !shard_names.contains(partition.shard.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "partition references unknown shard, shard: {}",
                    partition.shard
                )));
            }

            if partition.is_default_area() {
                default_shards.insert(partition.shard.as_str());
                continue;
            }

            if partition.gps_longitude_end <= partition.gps_longitude_begin
                || partition.gps_latitude_end <= partition.gps_latitude_begin
            {
                return Err(Error::InvalidConfig(format!(
                    "inverted partition rectangle, shard: {}, area: {}",
                    partition.shard, partition.area
                )));
            }
        }

        if default_shards.len() > 1 {
            return Err(Error::InvalidConfig(
                "more than one default shard found in config".to_string(),
            ));
        }

        Ok(())
    }

    /// Partitions owned by one shard.
    pub fn partitions_for_shard(&self, name: &str) -> Vec<PartitionConfig> {
        self.partitions
            .iter()
            .filter(|p| p.shard == name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_shard_config() -> String {
        r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "dublin"
workers = ["127.0.0.1:7001"]

[[shard]]
name = "rest"
workers = ["127.0.0.1:7002", "127.0.0.1:7003"]

[[partition]]
shard = "dublin"
area = "dublin"
gps_longitude_begin = 10.0
gps_latitude_begin = 45.0
gps_longitude_end = 13.0
gps_latitude_end = 50.0

[[partition]]
shard = "rest"
area = "default"
"#
        .to_string()
    }

    #[test]
    fn test_parse_two_shard_config() {
        let config = MixerConfig::from_str(&two_shard_config()).unwrap();
        assert_eq!(config.worker_timeout_ms, 60_000);
        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.partitions.len(), 2);
        assert_eq!(config.partitions_for_shard("dublin").len(), 1);
        assert!(config.partitions_for_shard("rest")[0].is_default_area());
    }

    #[test]
    fn test_partition_containment() {
        let config = MixerConfig::from_str(&two_shard_config()).unwrap();
        let partition = &config.partitions_for_shard("dublin")[0];

        let mut location = LocationSample {
            user_id: 1,
            timestamp: 1_000_000,
            gps_longitude: 12.5,
            gps_latitude: 48.0,
            gps_altitude: 0.0,
        };
        assert!(partition.contains(&location));

        location.gps_longitude = 20.0;
        assert!(!partition.contains(&location));

        // The end of a range is exclusive.
        location.gps_longitude = 13.0;
        assert!(!partition.contains(&location));
    }

    #[test]
    fn test_empty_shard_set_rejected() {
        assert!(MixerConfig::from_str(r#"listen_addr = "127.0.0.1:8000""#).is_err());
    }

    #[test]
    fn test_shard_without_workers_rejected() {
        let raw = r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "empty"
workers = []
"#;
        assert!(MixerConfig::from_str(raw).is_err());
    }

    #[test]
    fn test_two_default_shards_rejected() {
        let raw = r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "a"
workers = ["127.0.0.1:7001"]

[[shard]]
name = "b"
workers = ["127.0.0.1:7002"]

[[partition]]
shard = "a"
area = "default"

[[partition]]
shard = "b"
area = "default"
"#;
        assert!(MixerConfig::from_str(raw).is_err());
    }

    #[test]
    fn test_unknown_shard_reference_rejected() {
        let raw = r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "a"
workers = ["127.0.0.1:7001"]

[[partition]]
shard = "ghost"
area = "default"
"#;
        assert!(MixerConfig::from_str(raw).is_err());
    }

    #[test]
    fn test_inverted_rectangle_rejected() {
        let raw = r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "a"
workers = ["127.0.0.1:7001"]

[[partition]]
shard = "a"
area = "area"
gps_longitude_begin = 13.0
gps_latitude_begin = 45.0
gps_longitude_end = 10.0
gps_latitude_end = 50.0
"#;
        assert!(MixerConfig::from_str(raw).is_err());
    }
}
