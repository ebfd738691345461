use anyhow::{bail, Result};
use log::error;

use crosspath_core::crosspath::mixer_client::MixerClient;
use crosspath_core::crosspath::{
    DeleteUserRequest, GetMixerStatsRequest, GetMixerStatsResponse, GetUserNearbyFolksRequest,
    GetUserTimelineRequest, LocationSample, NearbyUserFolk, PutLocationRequest, UserTimelinePoint,
};
use crosspath_core::error_bail;
use crosspath_core::tool::MESSAGE_LIMIT;

/// Connect to a mixer endpoint, `host:port`.
pub async fn get_mixer_client(
    mixer_endpoint: &str,
) -> Result<MixerClient<tonic::transport::Channel>> {
    match MixerClient::connect(format!("http://{}", mixer_endpoint)).await {
        Ok(client) => Ok(client
            .max_decoding_message_size(MESSAGE_LIMIT)
            .max_encoding_message_size(MESSAGE_LIMIT)),
        Err(err) => Err(err.into()),
    }
}

/// Wrapper of the grpc mixer client.
///
/// `Client` hides the request plumbing behind typed calls for tools and
/// tests.
pub struct Client {
    mixer_client: MixerClient<tonic::transport::Channel>,
}

impl Client {
    pub async fn new(mixer_endpoint: &str) -> Result<Self> {
        match get_mixer_client(mixer_endpoint).await {
            Ok(mixer_client) => Ok(Self { mixer_client }),
            Err(e) => {
                error_bail!(
                    "Failed to connect to mixer, endpoint: {}, error: {}",
                    mixer_endpoint,
                    e
                );
            }
        }
    }

    pub async fn put_location(&mut self, locations: Vec<LocationSample>) -> Result<()> {
        self.mixer_client
            .put_location(PutLocationRequest { locations })
            .await?;
        Ok(())
    }

    pub async fn delete_user(&mut self, user_id: u64) -> Result<()> {
        self.mixer_client
            .delete_user(DeleteUserRequest { user_id })
            .await?;
        Ok(())
    }

    pub async fn get_user_timeline(&mut self, user_id: u64) -> Result<Vec<UserTimelinePoint>> {
        let response = self
            .mixer_client
            .get_user_timeline(GetUserTimelineRequest { user_id })
            .await?;
        Ok(response.into_inner().point)
    }

    pub async fn get_user_nearby_folks(&mut self, user_id: u64) -> Result<Vec<NearbyUserFolk>> {
        let response = self
            .mixer_client
            .get_user_nearby_folks(GetUserNearbyFolksRequest { user_id })
            .await?;
        Ok(response.into_inner().folk)
    }

    pub async fn get_mixer_stats(&mut self) -> Result<GetMixerStatsResponse> {
        let response = self
            .mixer_client
            .get_mixer_stats(GetMixerStatsRequest {})
            .await?;
        Ok(response.into_inner())
    }
}
