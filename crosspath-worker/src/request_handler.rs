use std::sync::Arc;

use log::error;
use tonic::{Request, Response, Status};

use crosspath_core::crosspath::pusher_server::Pusher as PusherService;
use crosspath_core::crosspath::seeker_server::Seeker as SeekerService;
use crosspath_core::crosspath::{
    BlockEntry, BuildBlockForUserRequest, BuildBlockForUserResponse, DeleteUserRequest,
    DeleteUserResponse, GetUserNearbyFolksRequest, GetUserNearbyFolksResponse,
    GetUserTimelineRequest, GetUserTimelineResponse, PutLocationRequest, PutLocationResponse,
};
use crosspath_core::grpc_util::{error_to_status, send_bad_request_error};
use crosspath_core::keys::Entry;

use crate::pusher::Pusher;
use crate::seeker::Seeker;

/// Write service of a worker.
pub struct PusherImpl {
    pusher: Arc<Pusher>,
}

impl PusherImpl {
    pub fn new(pusher: Arc<Pusher>) -> Self {
        Self { pusher }
    }
}

#[tonic::async_trait]
impl PusherService for PusherImpl {
    async fn put_location(
        &self,
        request: Request<PutLocationRequest>,
    ) -> Result<Response<PutLocationResponse>, Status> {
        let req = request.into_inner();

        match self.pusher.put_location(&req.locations) {
            Ok(()) => Ok(Response::new(PutLocationResponse {})),
            Err(e) => {
                error!(
                    "unable to put locations, count: {}, error: {}",
                    req.locations.len(),
                    e
                );
                Err(error_to_status(&e))
            }
        }
    }

    async fn delete_user(
        &self,
        request: Request<DeleteUserRequest>,
    ) -> Result<Response<DeleteUserResponse>, Status> {
        let req = request.into_inner();

        match self.pusher.delete_user(req.user_id) {
            Ok(()) => Ok(Response::new(DeleteUserResponse {})),
            Err(e) => {
                error!("unable to delete user, user_id: {}, error: {}", req.user_id, e);
                Err(error_to_status(&e))
            }
        }
    }
}

/// Read service of a worker.
pub struct SeekerImpl {
    seeker: Arc<Seeker>,
}

impl SeekerImpl {
    pub fn new(seeker: Arc<Seeker>) -> Self {
        Self { seeker }
    }
}

fn to_block_entries(entries: Vec<Entry>) -> Vec<BlockEntry> {
    entries
        .into_iter()
        .map(|(key, value)| BlockEntry {
            key: Some(key),
            value: Some(value),
        })
        .collect()
}

#[tonic::async_trait]
impl SeekerService for SeekerImpl {
    async fn get_user_timeline(
        &self,
        request: Request<GetUserTimelineRequest>,
    ) -> Result<Response<GetUserTimelineResponse>, Status> {
        let req = request.into_inner();

        match self.seeker.get_user_timeline(req.user_id) {
            Ok(point) => Ok(Response::new(GetUserTimelineResponse { point })),
            Err(e) => {
                error!(
                    "can't build timeline for user, user_id: {}, error: {}",
                    req.user_id, e
                );
                Err(error_to_status(&e))
            }
        }
    }

    async fn get_user_nearby_folks(
        &self,
        request: Request<GetUserNearbyFolksRequest>,
    ) -> Result<Response<GetUserNearbyFolksResponse>, Status> {
        let req = request.into_inner();

        match self.seeker.get_user_nearby_folks(req.user_id) {
            Ok(folk) => Ok(Response::new(GetUserNearbyFolksResponse { folk })),
            Err(e) => {
                error!(
                    "can't correlate nearby folks, user_id: {}, error: {}",
                    req.user_id, e
                );
                Err(error_to_status(&e))
            }
        }
    }

    async fn build_block_for_user(
        &self,
        request: Request<BuildBlockForUserRequest>,
    ) -> Result<Response<BuildBlockForUserResponse>, Status> {
        let req = request.into_inner();

        let Some(key) = req.key else {
            return send_bad_request_error("key", "block key is required");
        };

        match self.seeker.build_block_for_user(&key, req.user_id) {
            Ok((user_entries, folk_entries, found)) => {
                Ok(Response::new(BuildBlockForUserResponse {
                    user_entries: to_block_entries(user_entries),
                    folk_entries: to_block_entries(folk_entries),
                    found,
                }))
            }
            Err(e) => {
                error!(
                    "can't build block for user, user_id: {}, error: {}",
                    req.user_id, e
                );
                Err(error_to_status(&e))
            }
        }
    }
}
