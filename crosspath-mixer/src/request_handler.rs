use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{info, warn};
use tonic::{Request, Response, Status};

use crosspath_core::correlator::{is_nearby_folk, CorrelatorConfig};
use crosspath_core::crosspath::mixer_server::Mixer as MixerService;
use crosspath_core::crosspath::{
    DeleteUserRequest, DeleteUserResponse, GetMixerStatsRequest, GetMixerStatsResponse,
    GetUserNearbyFolksRequest, GetUserNearbyFolksResponse, GetUserTimelineRequest,
    GetUserTimelineResponse, NearbyUserFolk, PutLocationRequest, PutLocationResponse,
    UserTimelinePoint,
};
use crosspath_core::error::{Error, Result};
use crosspath_core::grpc_util::error_to_status;
use crosspath_core::keys::{
    build_keys_to_search_around_point, compare_timeline_points, dedup_entries, Entry,
};
use crosspath_core::rate_counter::RateCounter;

use crate::config::MixerConfig;
use crate::shard_handler::ShardHandler;

/// Routes writes to the shard owning each point and fans reads out to every
/// shard, merging the answers.
pub struct MixerImpl {
    area_handlers: Vec<Arc<ShardHandler>>,
    default_handler: Option<Arc<ShardHandler>>,
    all_handlers: Vec<Arc<ShardHandler>>,

    correlator: CorrelatorConfig,
    pushed_points_counter: RateCounter,
}

impl MixerImpl {
    pub fn new(config: &MixerConfig) -> Result<Self> {
        let worker_timeout = Duration::from_millis(config.worker_timeout_ms);

        let mut area_handlers = Vec::new();
        let mut default_handler: Option<Arc<ShardHandler>> = None;
        let mut all_handlers = Vec::new();

        for shard in &config.shards {
            let handler = Arc::new(ShardHandler::new(
                shard.clone(),
                config.partitions_for_shard(&shard.name),
                worker_timeout,
            )?);

            if handler.is_default_shard() {
                if default_handler.is_some() {
                    return Err(Error::InvalidConfig(
                        "more than one default handler found in config".to_string(),
                    ));
                }
                default_handler = Some(handler.clone());
            } else {
                area_handlers.push(handler.clone());
            }

            all_handlers.push(handler);
        }

        if default_handler.is_none() && area_handlers.is_empty() {
            return Err(Error::InvalidConfig("no area for handler".to_string()));
        }

        Ok(Self {
            area_handlers,
            default_handler,
            all_handlers,
            correlator: config.correlator.clone(),
            pushed_points_counter: RateCounter::new(3600),
        })
    }

    /// Handlers in probing order: area shards first, the default last.
    fn handlers_in_probe_order(&self) -> Vec<Arc<ShardHandler>> {
        let mut handlers = self.area_handlers.clone();
        if let Some(default_handler) = &self.default_handler {
            handlers.push(default_handler.clone());
        }
        handlers
    }

    async fn merged_timeline(
        &self,
        user_id: u64,
    ) -> std::result::Result<Vec<UserTimelinePoint>, Status> {
        let results = join_all(
            self.all_handlers
                .iter()
                .map(|handler| handler.get_user_timeline(user_id)),
        )
        .await;

        let mut points = Vec::new();
        for result in results {
            match result {
                Ok(shard_points) => points.extend(shard_points),
                Err(e) => {
                    warn!("unable to retrieve user timeline, error: {}", e);
                    return Err(error_to_status(&e));
                }
            }
        }

        points.sort_by(compare_timeline_points);
        points.dedup_by(|a, b| compare_timeline_points(a, b) == std::cmp::Ordering::Equal);

        Ok(points)
    }
}

#[tonic::async_trait]
impl MixerService for MixerImpl {
    async fn put_location(
        &self,
        request: Request<PutLocationRequest>,
    ) -> std::result::Result<Response<PutLocationResponse>, Status> {
        let req = request.into_inner();

        // The first matching area handler takes the point; anything left
        // over goes to the default shard.
        for location in &req.locations {
            let mut sent = false;
            for handler in &self.area_handlers {
                if handler.queue_location(location) {
                    sent = true;
                    break;
                }
            }

            if !sent {
                match &self.default_handler {
                    Some(handler) => {
                        handler.queue_location(location);
                    }
                    None => {
                        warn!(
                            "no matching shard handler for point, user_id: {}",
                            location.user_id
                        );
                    }
                }
            }
        }

        let results = join_all(
            self.all_handlers
                .iter()
                .map(|handler| handler.flush_locations()),
        )
        .await;

        let mut failed = None;
        for (handler, result) in self.all_handlers.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "unable to flush locations, shard: {}, error: {}",
                    handler.name(),
                    e
                );
                failed = Some(e);
            }
        }

        match failed {
            Some(e) => Err(error_to_status(&e)),
            None => {
                self.pushed_points_counter
                    .increment(req.locations.len() as u64);
                Ok(Response::new(PutLocationResponse {}))
            }
        }
    }

    async fn delete_user(
        &self,
        request: Request<DeleteUserRequest>,
    ) -> std::result::Result<Response<DeleteUserResponse>, Status> {
        let req = request.into_inner();

        let results = join_all(
            self.all_handlers
                .iter()
                .map(|handler| handler.delete_user(req.user_id)),
        )
        .await;

        let mut failed = None;
        for (handler, result) in self.all_handlers.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "unable to delete user in a shard, shard: {}, error: {}",
                    handler.name(),
                    e
                );
                failed = Some(e);
            }
        }

        match failed {
            Some(e) => Err(error_to_status(&e)),
            None => {
                info!("user deleted in all shards, user_id: {}", req.user_id);
                Ok(Response::new(DeleteUserResponse {}))
            }
        }
    }

    async fn get_user_timeline(
        &self,
        request: Request<GetUserTimelineRequest>,
    ) -> std::result::Result<Response<GetUserTimelineResponse>, Status> {
        let req = request.into_inner();
        let point = self.merged_timeline(req.user_id).await?;
        Ok(Response::new(GetUserTimelineResponse { point }))
    }

    async fn get_user_nearby_folks(
        &self,
        request: Request<GetUserNearbyFolksRequest>,
    ) -> std::result::Result<Response<GetUserNearbyFolksResponse>, Status> {
        let req = request.into_inner();

        let timeline = self.merged_timeline(req.user_id).await?;
        let handlers = self.handlers_in_probe_order();

        let mut scores: BTreeMap<u64, u64> = BTreeMap::new();

        for point in &timeline {
            let keys = build_keys_to_search_around_point(req.user_id, point);

            let mut user_entries: Vec<Entry> = Vec::new();
            let mut folk_entries: Vec<Entry> = Vec::new();

            // Order matters: the default handler is the fallback when no
            // area shard has the cell.
            for key in &keys {
                for handler in &handlers {
                    let block = match handler.build_block_for_user(key, req.user_id).await {
                        Ok(block) => block,
                        Err(e) => {
                            warn!(
                                "unable to get internal block for user, shard: {}, error: {}",
                                handler.name(),
                                e
                            );
                            return Err(Status::internal("unable to get internal block for user"));
                        }
                    };

                    if !block.found {
                        continue;
                    }

                    for entry in block.user_entries.into_iter().chain(block.folk_entries) {
                        let (Some(key), Some(value)) = (entry.key, entry.value) else {
                            continue;
                        };
                        if key.user_id == req.user_id {
                            user_entries.push((key, value));
                        } else {
                            folk_entries.push((key, value));
                        }
                    }
                    break;
                }
            }

            dedup_entries(&mut user_entries);
            dedup_entries(&mut folk_entries);

            for (user_key, user_value) in &user_entries {
                for (folk_key, folk_value) in &folk_entries {
                    if is_nearby_folk(&self.correlator, user_key, user_value, folk_key, folk_value)
                    {
                        *scores.entry(folk_key.user_id).or_insert(0) += 1;
                    }
                }
            }
        }

        let folk: Vec<NearbyUserFolk> = scores
            .into_iter()
            .filter(|(_, score)| *score >= self.correlator.minutes_to_match)
            .map(|(user_id, score)| NearbyUserFolk { user_id, score })
            .collect();

        Ok(Response::new(GetUserNearbyFolksResponse { folk }))
    }

    async fn get_mixer_stats(
        &self,
        _request: Request<GetMixerStatsRequest>,
    ) -> std::result::Result<Response<GetMixerStatsResponse>, Status> {
        Ok(Response::new(GetMixerStatsResponse {
            insert_rate_60s: self.pushed_points_counter.rate_for_last_n_seconds(60),
            insert_rate_10m: self.pushed_points_counter.rate_for_last_n_seconds(60 * 10),
            insert_rate_1h: self.pushed_points_counter.rate_for_last_n_seconds(60 * 60),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(raw: &str) -> MixerConfig {
        MixerConfig::from_str(raw).unwrap()
    }

    #[test]
    fn test_new_splits_handlers() {
        let mixer = MixerImpl::new(&config(
            r#"
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
"#,
        ))
        .unwrap();

        assert_eq!(mixer.area_handlers.len(), 1);
        assert!(mixer.default_handler.is_some());
        assert_eq!(mixer.all_handlers.len(), 2);
        assert_eq!(mixer.handlers_in_probe_order().len(), 2);
        assert_eq!(mixer.handlers_in_probe_order().last().unwrap().name(), "rest");
    }

    #[test]
    fn test_new_without_any_handler() {
        // Bypasses config validation to exercise the handler check.
        let config = MixerConfig {
            listen_addr: "127.0.0.1:8000".to_string(),
            worker_timeout_ms: 1000,
            correlator: CorrelatorConfig::default(),
            shards: Vec::new(),
            partitions: Vec::new(),
        };
        assert!(MixerImpl::new(&config).is_err());
    }

    #[test]
    fn test_partitionless_shard_is_an_area_handler() {
        // A shard with no partitions never accepts a point but still serves
        // reads.
        let mixer = MixerImpl::new(&config(
            r#"
listen_addr = "127.0.0.1:8000"

[[shard]]
name = "a"
workers = ["127.0.0.1:7001"]
"#,
        ))
        .unwrap();

        assert_eq!(mixer.area_handlers.len(), 1);
        assert!(mixer.default_handler.is_none());
    }
}
