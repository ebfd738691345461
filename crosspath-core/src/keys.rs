//! Codec and helpers for the keys and values of the two column families.
//!
//! Keys and values are stored as the prost encoding of the corresponding
//! proto message; the encoded layout is frozen together with the comparator
//! names and must not change once a database has been released.

use std::cmp::Ordering;

use prost::Message;

use crate::crosspath::{
    LocationSample, ReverseKey, ReverseValue, TimelineKey, TimelineValue, UserTimelinePoint,
};
use crate::error::{Error, Result};
use crate::zones::{
    gps_is_near_zone, gps_next_zone, gps_previous_zone, gps_to_zone, ts_is_near_zone,
    ts_next_zone, ts_previous_zone, ts_to_zone, LocIsNearZone, TIME_PRECISION,
};

/// A timeline row as manipulated by the seeker and the mixer.
pub type Entry = (TimelineKey, TimelineValue);

/// Timeline key for one location sample.
pub fn timeline_key_for_sample(location: &LocationSample) -> TimelineKey {
    TimelineKey {
        timestamp: location.timestamp,
        user_id: location.user_id,
        gps_longitude_zone: gps_to_zone(location.gps_longitude),
        gps_latitude_zone: gps_to_zone(location.gps_latitude),
    }
}

/// Timeline value for one location sample, the exact coordinates.
pub fn timeline_value_for_sample(location: &LocationSample) -> TimelineValue {
    TimelineValue {
        gps_longitude: location.gps_longitude,
        gps_latitude: location.gps_latitude,
        gps_altitude: location.gps_altitude,
    }
}

/// Reverse key for one location sample.
pub fn reverse_key_for_sample(location: &LocationSample) -> ReverseKey {
    ReverseKey {
        user_id: location.user_id,
        timestamp_zone: ts_to_zone(location.timestamp),
        gps_longitude_zone: gps_to_zone(location.gps_longitude),
        gps_latitude_zone: gps_to_zone(location.gps_latitude),
    }
}

/// Reverse value for one location sample.
pub fn reverse_value_for_sample(location: &LocationSample) -> ReverseValue {
    ReverseValue {
        gps_longitude_zone: gps_to_zone(location.gps_longitude),
        gps_latitude_zone: gps_to_zone(location.gps_latitude),
    }
}

/// Timeline key addressing the cell recorded by a reverse row.
///
/// The timestamp is the beginning of the time zone; the resulting key
/// addresses a cell, not a single row.
pub fn timeline_key_from_reverse(key: &ReverseKey, value: &ReverseValue) -> TimelineKey {
    TimelineKey {
        timestamp: key.timestamp_zone * TIME_PRECISION,
        user_id: key.user_id,
        gps_longitude_zone: value.gps_longitude_zone,
        gps_latitude_zone: value.gps_latitude_zone,
    }
}

/// First possible key of the cell addressed by `cell`, across all users.
pub fn cell_start_key(cell: &TimelineKey) -> TimelineKey {
    TimelineKey {
        timestamp: ts_to_zone(cell.timestamp) * TIME_PRECISION,
        user_id: 0,
        gps_longitude_zone: cell.gps_longitude_zone,
        gps_latitude_zone: cell.gps_latitude_zone,
    }
}

pub fn encode_timeline_key(key: &TimelineKey) -> Vec<u8> {
    key.encode_to_vec()
}

pub fn encode_timeline_value(value: &TimelineValue) -> Vec<u8> {
    value.encode_to_vec()
}

pub fn encode_reverse_key(key: &ReverseKey) -> Vec<u8> {
    key.encode_to_vec()
}

pub fn encode_reverse_value(value: &ReverseValue) -> Vec<u8> {
    value.encode_to_vec()
}

pub fn decode_timeline_key(raw: &[u8]) -> Result<TimelineKey> {
    TimelineKey::decode(raw)
        .map_err(|e| Error::Serialization(format!("can't decode timeline key, error: {}", e)))
}

pub fn decode_timeline_value(raw: &[u8]) -> Result<TimelineValue> {
    TimelineValue::decode(raw)
        .map_err(|e| Error::Serialization(format!("can't decode timeline value, error: {}", e)))
}

pub fn decode_reverse_key(raw: &[u8]) -> Result<ReverseKey> {
    ReverseKey::decode(raw)
        .map_err(|e| Error::Serialization(format!("can't decode reverse key, error: {}", e)))
}

pub fn decode_reverse_value(raw: &[u8]) -> Result<ReverseValue> {
    ReverseValue::decode(raw)
        .map_err(|e| Error::Serialization(format!("can't decode reverse value, error: {}", e)))
}

/// Builds the set of cell keys to probe around a timeline point.
///
/// The point's own cell is always included; every dimension close to a zone
/// border adds its neighbouring zone, so up to 2x2x2 cells are probed.
pub fn build_keys_to_search_around_point(
    user_id: u64,
    point: &UserTimelinePoint,
) -> Vec<TimelineKey> {
    let mut timestamp_zones = vec![ts_to_zone(point.timestamp)];
    match ts_is_near_zone(point.timestamp) {
        LocIsNearZone::Previous => timestamp_zones.push(ts_previous_zone(point.timestamp)),
        LocIsNearZone::Next => timestamp_zones.push(ts_next_zone(point.timestamp)),
        LocIsNearZone::None => {}
    }

    let mut longitude_zones = vec![gps_to_zone(point.gps_longitude)];
    match gps_is_near_zone(point.gps_longitude) {
        LocIsNearZone::Previous => longitude_zones.push(gps_previous_zone(point.gps_longitude)),
        LocIsNearZone::Next => longitude_zones.push(gps_next_zone(point.gps_longitude)),
        LocIsNearZone::None => {}
    }

    let mut latitude_zones = vec![gps_to_zone(point.gps_latitude)];
    match gps_is_near_zone(point.gps_latitude) {
        LocIsNearZone::Previous => latitude_zones.push(gps_previous_zone(point.gps_latitude)),
        LocIsNearZone::Next => latitude_zones.push(gps_next_zone(point.gps_latitude)),
        LocIsNearZone::None => {}
    }

    let mut keys =
        Vec::with_capacity(timestamp_zones.len() * longitude_zones.len() * latitude_zones.len());
    for ts_zone in &timestamp_zones {
        for long_zone in &longitude_zones {
            for lat_zone in &latitude_zones {
                keys.push(TimelineKey {
                    timestamp: ts_zone * TIME_PRECISION,
                    user_id,
                    gps_longitude_zone: *long_zone,
                    gps_latitude_zone: *lat_zone,
                });
            }
        }
    }

    keys
}

/// Canonical order on timeline points used when merging shard responses.
pub fn compare_timeline_points(a: &UserTimelinePoint, b: &UserTimelinePoint) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.gps_longitude.total_cmp(&b.gps_longitude))
        .then_with(|| a.gps_latitude.total_cmp(&b.gps_latitude))
        .then_with(|| a.gps_altitude.total_cmp(&b.gps_altitude))
}

/// Canonical order on block entries, used to keep set semantics while
/// accumulating entries across cells and shards.
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    a.0.timestamp
        .cmp(&b.0.timestamp)
        .then_with(|| a.0.user_id.cmp(&b.0.user_id))
        .then_with(|| a.0.gps_longitude_zone.total_cmp(&b.0.gps_longitude_zone))
        .then_with(|| a.0.gps_latitude_zone.total_cmp(&b.0.gps_latitude_zone))
        .then_with(|| a.1.gps_longitude.total_cmp(&b.1.gps_longitude))
        .then_with(|| a.1.gps_latitude.total_cmp(&b.1.gps_latitude))
        .then_with(|| a.1.gps_altitude.total_cmp(&b.1.gps_altitude))
}

/// Sorts entries in canonical order and drops duplicates.
pub fn dedup_entries(entries: &mut Vec<Entry>) {
    entries.sort_by(compare_entries);
    entries.dedup_by(|a, b| compare_entries(a, b) == Ordering::Equal);
}
