//! Quantisation of timestamps and GPS coordinates into discrete zones.
//!
//! Entries are grouped in the database by zone: 1000 seconds of time and
//! 0.001 degree of longitude/latitude (about 100m x 100m). Changing any of
//! these constants implies re-creating the database.

/// Seconds covered by one time zone.
pub const TIME_PRECISION: u64 = 1000;

/// Distance in seconds from a zone boundary considered near.
///
/// We implicitly rely on the GPS input data to be roughly aligned; if it is
/// not, this is a loose approximation which works if users aren't moving.
pub const TIME_NEARBY_APPROXIMATION: u64 = 30;

/// Number of digits of GPS precision kept when quantising coordinates.
pub const GPS_ZONE_PRECISION: f32 = 1000.0;

/// Width of one GPS zone in decimal degrees.
pub const GPS_ZONE_DISTANCE: f32 = 0.001;

/// About 4.4 meters, which corresponds to GPS precision.
pub const GPS_NEARBY_APPROXIMATION: f32 = 4.0 * 0.000001;

/// About 2 meters of altitude.
pub const GPS_NEARBY_ALTITUDE: f32 = 2.0;

/// Default number of co-present sample pairs for two users to match over the
/// retention window; it does not have to be consecutive.
pub const MINUTES_TO_MATCH: u64 = 30;

/// Whether a location is adjacent to a neighbouring zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocIsNearZone {
    /// Not near any other zone.
    None,
    /// Adjacent to the previous zone.
    Previous,
    /// Adjacent to the next zone.
    Next,
}

/// Converts a timestamp to its time zone.
pub fn ts_to_zone(timestamp: u64) -> u64 {
    timestamp / TIME_PRECISION
}

/// Next time zone for the given timestamp.
pub fn ts_next_zone(timestamp: u64) -> u64 {
    ts_to_zone(timestamp) + 1
}

/// Previous time zone for the given timestamp, saturating at zero.
pub fn ts_previous_zone(timestamp: u64) -> u64 {
    ts_to_zone(timestamp).saturating_sub(1)
}

/// Whether the timestamp is close enough to an adjacent zone that the
/// neighbour must also be scanned during correlation.
pub fn ts_is_near_zone(timestamp: u64) -> LocIsNearZone {
    let offset = timestamp % TIME_PRECISION;
    if offset < TIME_NEARBY_APPROXIMATION {
        LocIsNearZone::Previous
    } else if offset > TIME_PRECISION - TIME_NEARBY_APPROXIMATION {
        LocIsNearZone::Next
    } else {
        LocIsNearZone::None
    }
}

/// Converts a GPS position to its GPS zone, works for both latitude and
/// longitude.
pub fn gps_to_zone(gps_location: f32) -> f32 {
    (gps_location * GPS_ZONE_PRECISION).floor() / GPS_ZONE_PRECISION
}

/// Next GPS zone for the given location.
pub fn gps_next_zone(gps_location: f32) -> f32 {
    gps_to_zone(gps_location) + GPS_ZONE_DISTANCE
}

/// Previous GPS zone for the given location.
pub fn gps_previous_zone(gps_location: f32) -> f32 {
    gps_to_zone(gps_location) - GPS_ZONE_DISTANCE
}

/// Whether the GPS location is near a zone border.
pub fn gps_is_near_zone(gps_location: f32) -> LocIsNearZone {
    let zone = gps_to_zone(gps_location);
    if gps_location - zone < GPS_NEARBY_APPROXIMATION {
        LocIsNearZone::Previous
    } else if zone + GPS_ZONE_DISTANCE - gps_location < GPS_NEARBY_APPROXIMATION {
        LocIsNearZone::Next
    } else {
        LocIsNearZone::None
    }
}
