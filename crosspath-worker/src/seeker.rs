//! Read path of a worker: timeline reconstruction and the nearby-folk
//! correlation scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crosspath_core::correlator::{is_nearby_folk, CorrelatorConfig};
use crosspath_core::crosspath::{NearbyUserFolk, ReverseKey, TimelineKey, UserTimelinePoint};
use crosspath_core::db::Db;
use crosspath_core::error::Result;
use crosspath_core::keys::{
    build_keys_to_search_around_point, cell_start_key, decode_reverse_key, decode_reverse_value,
    decode_timeline_key, decode_timeline_value, dedup_entries, encode_reverse_key,
    encode_timeline_key, timeline_key_from_reverse, Entry,
};
use crosspath_core::zones::TIME_PRECISION;

pub struct Seeker {
    db: Arc<Db>,
    correlator: CorrelatorConfig,
}

impl Seeker {
    pub fn new(db: Arc<Db>, correlator: CorrelatorConfig) -> Self {
        Self { db, correlator }
    }

    /// Lists the cells a user was seen in, as timeline keys ready to seek at.
    pub fn build_timeline_keys_for_user(&self, user_id: u64) -> Result<Vec<TimelineKey>> {
        let reverse_handle = self.db.reverse_handle()?;

        let seek_key = ReverseKey {
            user_id,
            timestamp_zone: 0,
            gps_longitude_zone: 0.0,
            gps_latitude_zone: 0.0,
        };

        let mut keys = Vec::new();
        let mut it = self.db.rocks().raw_iterator_cf(reverse_handle);
        it.seek(encode_reverse_key(&seek_key));
        while it.valid() {
            let Some(raw_key) = it.key() else {
                break;
            };
            let reverse_key = decode_reverse_key(raw_key)?;

            // A different user id means we are done scanning keys for this
            // user.
            if reverse_key.user_id != user_id {
                break;
            }

            let Some(raw_value) = it.value() else {
                break;
            };
            let reverse_value = decode_reverse_value(raw_value)?;

            keys.push(timeline_key_from_reverse(&reverse_key, &reverse_value));

            it.next();
        }

        Ok(keys)
    }

    /// Reconstructs the user's timeline from the cells listed in the reverse
    /// table.
    pub fn get_user_timeline(&self, user_id: u64) -> Result<Vec<UserTimelinePoint>> {
        let keys = self.build_timeline_keys_for_user(user_id)?;
        info!(
            "retrieved reverse keys, user_id: {}, reverse_keys_count: {}",
            user_id,
            keys.len()
        );

        self.build_timeline_for_user(&keys)
    }

    fn build_timeline_for_user(&self, keys: &[TimelineKey]) -> Result<Vec<UserTimelinePoint>> {
        let timeline_handle = self.db.timeline_handle()?;

        let mut points = Vec::new();
        let mut it = self.db.rocks().raw_iterator_cf(timeline_handle);

        for key_it in keys {
            let timestamp_end = key_it.timestamp + TIME_PRECISION;
            it.seek(encode_timeline_key(key_it));
            while it.valid() {
                let Some(raw_key) = it.key() else {
                    break;
                };
                let key = decode_timeline_key(raw_key)?;

                let end_of_cell = key.timestamp > timestamp_end
                    || key.gps_longitude_zone != key_it.gps_longitude_zone
                    || key.gps_latitude_zone != key_it.gps_latitude_zone
                    || key.user_id != key_it.user_id;
                if end_of_cell {
                    break;
                }

                let Some(raw_value) = it.value() else {
                    break;
                };
                let value = decode_timeline_value(raw_value)?;

                points.push(UserTimelinePoint {
                    timestamp: key.timestamp,
                    gps_longitude: value.gps_longitude,
                    gps_latitude: value.gps_latitude,
                    gps_altitude: value.gps_altitude,
                });

                it.next();
            }
        }

        Ok(points)
    }

    /// Materialises the block of one cell: every row of the cell, split into
    /// the target user's entries and everyone else's.
    ///
    /// `found` is true iff the cell holds at least one row here; the mixer
    /// uses it to stop probing other shards for the cell.
    pub fn build_block_for_user(
        &self,
        cell: &TimelineKey,
        user_id: u64,
    ) -> Result<(Vec<Entry>, Vec<Entry>, bool)> {
        let timeline_handle = self.db.timeline_handle()?;

        let start = cell_start_key(cell);
        let timestamp_end = start.timestamp + TIME_PRECISION;

        let mut user_entries = Vec::new();
        let mut folk_entries = Vec::new();
        let mut found = false;

        let mut it = self.db.rocks().raw_iterator_cf(timeline_handle);
        it.seek(encode_timeline_key(&start));
        while it.valid() {
            let Some(raw_key) = it.key() else {
                break;
            };
            let key = decode_timeline_key(raw_key)?;

            let end_of_cell = key.timestamp > timestamp_end
                || key.gps_longitude_zone != cell.gps_longitude_zone
                || key.gps_latitude_zone != cell.gps_latitude_zone;
            if end_of_cell {
                break;
            }

            let Some(raw_value) = it.value() else {
                break;
            };
            let value = decode_timeline_value(raw_value)?;

            found = true;
            if key.user_id == user_id {
                user_entries.push((key, value));
            } else {
                folk_entries.push((key, value));
            }

            it.next();
        }

        Ok((user_entries, folk_entries, found))
    }

    /// Runs the correlation scan: for every timeline point of the user,
    /// probes the surrounding cells and scores other users' co-present
    /// samples.
    pub fn get_user_nearby_folks(&self, user_id: u64) -> Result<Vec<NearbyUserFolk>> {
        let timeline = self.get_user_timeline(user_id)?;

        let mut scores: BTreeMap<u64, u64> = BTreeMap::new();

        for point in &timeline {
            let keys = build_keys_to_search_around_point(user_id, point);

            let mut user_entries = Vec::new();
            let mut folk_entries = Vec::new();
            for key in &keys {
                let (mut user_part, mut folk_part, _found) =
                    self.build_block_for_user(key, user_id)?;
                user_entries.append(&mut user_part);
                folk_entries.append(&mut folk_part);
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

        Ok(scores
            .into_iter()
            .filter(|(_, score)| *score >= self.correlator.minutes_to_match)
            .map(|(user_id, score)| NearbyUserFolk { user_id, score })
            .collect())
    }
}
