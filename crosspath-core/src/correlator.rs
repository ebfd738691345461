//! Co-presence predicate shared by the worker seeker and the mixer.

use serde::Deserialize;

use crate::crosspath::{TimelineKey, TimelineValue};
use crate::zones::{
    GPS_NEARBY_ALTITUDE, GPS_NEARBY_APPROXIMATION, MINUTES_TO_MATCH, TIME_NEARBY_APPROXIMATION,
};

/// Thresholds of the correlation scan, built from the static config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Maximum time delta in seconds for two samples to be co-present.
    pub duration_nearby_s: u64,

    /// Maximum longitude/latitude delta in decimal degrees.
    pub gps_nearby: f32,

    /// Maximum altitude delta in meters.
    pub altitude_nearby: f32,

    /// Minimum score for a folk to be reported as a match.
    pub minutes_to_match: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            duration_nearby_s: TIME_NEARBY_APPROXIMATION,
            gps_nearby: GPS_NEARBY_APPROXIMATION,
            altitude_nearby: GPS_NEARBY_ALTITUDE,
            minutes_to_match: MINUTES_TO_MATCH,
        }
    }
}

/// Whether two timeline rows count as one co-present sample pair.
pub fn is_nearby_folk(
    config: &CorrelatorConfig,
    user_key: &TimelineKey,
    user_value: &TimelineValue,
    folk_key: &TimelineKey,
    folk_value: &TimelineValue,
) -> bool {
    user_key.timestamp.abs_diff(folk_key.timestamp) <= config.duration_nearby_s
        && (user_value.gps_longitude - folk_value.gps_longitude).abs() <= config.gps_nearby
        && (user_value.gps_latitude - folk_value.gps_latitude).abs() <= config.gps_nearby
        && (user_value.gps_altitude - folk_value.gps_altitude).abs() <= config.altitude_nearby
}
