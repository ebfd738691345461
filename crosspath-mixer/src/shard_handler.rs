//! Client side of one shard: multiplexes requests over the shard's workers
//! and queues writes for the partitions the shard owns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};

use crosspath_core::crosspath::pusher_client::PusherClient;
use crosspath_core::crosspath::seeker_client::SeekerClient;
use crosspath_core::crosspath::{
    BuildBlockForUserRequest, BuildBlockForUserResponse, DeleteUserRequest,
    GetUserTimelineRequest, LocationSample, PutLocationRequest, TimelineKey, UserTimelinePoint,
};
use crosspath_core::error::{Error, Result};
use crosspath_core::grpc_util::status_to_error;
use crosspath_core::tool::MESSAGE_LIMIT;

use crate::config::{PartitionConfig, ShardConfig};

pub struct ShardHandler {
    config: ShardConfig,
    partitions: Vec<PartitionConfig>,
    is_default: bool,

    /// Lazily-connected channels, one per worker of the shard.
    channels: Vec<Channel>,
    next_worker: AtomicUsize,

    /// Locations queued for the next flush.
    queue: Mutex<Vec<LocationSample>>,
}

impl ShardHandler {
    pub fn new(
        config: ShardConfig,
        partitions: Vec<PartitionConfig>,
        worker_timeout: Duration,
    ) -> Result<Self> {
        if config.workers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "shard without workers, shard: {}",
                config.name
            )));
        }

        let is_default = partitions.iter().any(|p| p.is_default_area());

        let mut channels = Vec::with_capacity(config.workers.len());
        for worker in &config.workers {
            let endpoint = Endpoint::from_shared(format!("http://{}", worker))
                .map_err(|e| {
                    Error::InvalidConfig(format!(
                        "bad worker address, shard: {}, worker: {}, error: {}",
                        config.name, worker, e
                    ))
                })?
                .timeout(worker_timeout);
            channels.push(endpoint.connect_lazy());
        }

        Ok(Self {
            config,
            partitions,
            is_default,
            channels,
            next_worker: AtomicUsize::new(0),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_default_shard(&self) -> bool {
        self.is_default
    }

    fn pick_channel(&self) -> Channel {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed);
        self.channels[index % self.channels.len()].clone()
    }

    fn pusher_client(&self) -> PusherClient<Channel> {
        PusherClient::new(self.pick_channel())
            .max_decoding_message_size(MESSAGE_LIMIT)
            .max_encoding_message_size(MESSAGE_LIMIT)
    }

    fn seeker_client(&self) -> SeekerClient<Channel> {
        SeekerClient::new(self.pick_channel())
            .max_decoding_message_size(MESSAGE_LIMIT)
            .max_encoding_message_size(MESSAGE_LIMIT)
    }

    /// Accepts the location if one of the shard's partitions covers it; the
    /// default shard accepts anything.
    pub fn queue_location(&self, location: &LocationSample) -> bool {
        if !self.is_default && !self.partitions.iter().any(|p| p.contains(location)) {
            return false;
        }

        self.queue.lock().push(location.clone());
        true
    }

    /// Sends the queued locations to one of the shard's workers.
    pub async fn flush_locations(&self) -> Result<()> {
        let locations: Vec<LocationSample> = std::mem::take(&mut *self.queue.lock());
        if locations.is_empty() {
            return Ok(());
        }

        self.pusher_client()
            .put_location(PutLocationRequest { locations })
            .await
            .map(|_| ())
            .map_err(status_to_error)
    }

    pub async fn delete_user(&self, user_id: u64) -> Result<()> {
        self.pusher_client()
            .delete_user(DeleteUserRequest { user_id })
            .await
            .map(|_| ())
            .map_err(status_to_error)
    }

    pub async fn get_user_timeline(&self, user_id: u64) -> Result<Vec<UserTimelinePoint>> {
        let response = self
            .seeker_client()
            .get_user_timeline(GetUserTimelineRequest { user_id })
            .await
            .map_err(status_to_error)?;
        Ok(response.into_inner().point)
    }

    pub async fn build_block_for_user(
        &self,
        key: &TimelineKey,
        user_id: u64,
    ) -> Result<BuildBlockForUserResponse> {
        let response = self
            .seeker_client()
            .build_block_for_user(BuildBlockForUserRequest {
                key: Some(key.clone()),
                user_id,
            })
            .await
            .map_err(status_to_error)?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;

    fn handlers() -> Vec<ShardHandler> {
        let raw = r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "dublin"
workers = ["127.0.0.1:7001"]

[[shard]]
name = "rest"
workers = ["127.0.0.1:7002"]

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
"#;
        let config = MixerConfig::from_str(raw).unwrap();
        config
            .shards
            .iter()
            .map(|shard| {
                ShardHandler::new(
                    shard.clone(),
                    config.partitions_for_shard(&shard.name),
                    Duration::from_secs(1),
                )
                .unwrap()
            })
            .collect()
    }

    fn location(longitude: f32) -> LocationSample {
        LocationSample {
            user_id: 1,
            timestamp: 1_000_000,
            gps_longitude: longitude,
            gps_latitude: 48.0,
            gps_altitude: 0.0,
        }
    }

    #[test]
    fn test_queue_by_partition() {
        let handlers = handlers();
        let dublin = &handlers[0];
        let rest = &handlers[1];

        assert!(!dublin.is_default_shard());
        assert!(rest.is_default_shard());

        // Inside the dublin rectangle.
        assert!(dublin.queue_location(&location(12.5)));

        // Outside: dublin refuses, the default shard takes anything.
        assert!(!dublin.queue_location(&location(20.0)));
        assert!(rest.queue_location(&location(20.0)));

        assert_eq!(dublin.queue.lock().len(), 1);
        assert_eq!(rest.queue.lock().len(), 1);
    }
}
