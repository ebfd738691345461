//! Write path of a worker: batched ingestion and user deletion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rocksdb::WriteBatch;

use crosspath_core::crosspath::LocationSample;
use crosspath_core::db::Db;
use crosspath_core::error::Result;
use crosspath_core::keys::{
    decode_reverse_key, decode_reverse_value, decode_timeline_key, encode_reverse_key,
    encode_reverse_value, encode_timeline_key, encode_timeline_value, reverse_key_for_sample,
    reverse_value_for_sample, timeline_key_for_sample, timeline_key_from_reverse,
    timeline_value_for_sample,
};
use crosspath_core::zones::TIME_PRECISION;

/// Writes each accepted sample to both column families.
pub struct Pusher {
    db: Arc<Db>,

    /// Samples dropped because their coordinates were unusable.
    skipped_samples: AtomicU64,
}

impl Pusher {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            skipped_samples: AtomicU64::new(0),
        }
    }

    /// Stores a batch of location samples.
    ///
    /// Each sample becomes one timeline row and one reverse row, written in
    /// a single engine batch so readers never observe half a sample.
    /// Unusable samples are skipped and counted without failing the batch;
    /// an engine write failure fails the whole request.
    pub fn put_location(&self, locations: &[LocationSample]) -> Result<()> {
        let timeline_handle = self.db.timeline_handle()?;
        let reverse_handle = self.db.reverse_handle()?;

        for location in locations {
            if !is_valid_sample(location) {
                warn!(
                    "skipping sample with unusable coordinates, user_id: {}, timestamp: {}",
                    location.user_id, location.timestamp
                );
                self.skipped_samples.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let mut batch = WriteBatch::default();
            batch.put_cf(
                timeline_handle,
                encode_timeline_key(&timeline_key_for_sample(location)),
                encode_timeline_value(&timeline_value_for_sample(location)),
            );
            batch.put_cf(
                reverse_handle,
                encode_reverse_key(&reverse_key_for_sample(location)),
                encode_reverse_value(&reverse_value_for_sample(location)),
            );
            self.db.rocks().write(batch)?;
        }

        Ok(())
    }

    /// Removes every row of a user from both column families.
    ///
    /// The reverse table lists the cells the user visited; each cell is then
    /// swept for the user's timeline rows. The reconstructed cell key has the
    /// zone-begin timestamp, so a point delete would miss rows further into
    /// the zone.
    pub fn delete_user(&self, user_id: u64) -> Result<()> {
        let reverse_handle = self.db.reverse_handle()?;

        let seek_key = crosspath_core::crosspath::ReverseKey {
            user_id,
            timestamp_zone: 0,
            gps_longitude_zone: 0.0,
            gps_latitude_zone: 0.0,
        };

        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;

        let mut reverse_it = self.db.rocks().raw_iterator_cf(reverse_handle);
        reverse_it.seek(encode_reverse_key(&seek_key));
        while reverse_it.valid() {
            let Some(raw_key) = reverse_it.key() else {
                break;
            };
            let reverse_key = decode_reverse_key(raw_key)?;
            if reverse_key.user_id != user_id {
                break;
            }

            let Some(raw_value) = reverse_it.value() else {
                break;
            };
            let reverse_value = decode_reverse_value(raw_value)?;

            let cell = timeline_key_from_reverse(&reverse_key, &reverse_value);
            deleted += self.sweep_user_rows_in_cell(&cell, user_id, &mut batch)?;

            batch.delete_cf(reverse_handle, raw_key);

            reverse_it.next();
        }
        drop(reverse_it);

        self.db.rocks().write(batch)?;

        info!("deleted user rows, user_id: {}, timeline_rows: {}", user_id, deleted);

        Ok(())
    }

    /// Queues deletes for the user's timeline rows inside one cell.
    fn sweep_user_rows_in_cell(
        &self,
        cell: &crosspath_core::crosspath::TimelineKey,
        user_id: u64,
        batch: &mut WriteBatch,
    ) -> Result<u64> {
        let timeline_handle = self.db.timeline_handle()?;
        let timestamp_end = cell.timestamp + TIME_PRECISION;
        let mut deleted = 0u64;

        let mut it = self.db.rocks().raw_iterator_cf(timeline_handle);
        it.seek(encode_timeline_key(cell));
        while it.valid() {
            let Some(raw_key) = it.key() else {
                break;
            };
            let key = decode_timeline_key(raw_key)?;

            let end_of_cell = key.timestamp > timestamp_end
                || key.gps_longitude_zone != cell.gps_longitude_zone
                || key.gps_latitude_zone != cell.gps_latitude_zone
                || key.user_id != user_id;
            if end_of_cell {
                break;
            }

            batch.delete_cf(timeline_handle, raw_key);
            deleted += 1;

            it.next();
        }

        Ok(deleted)
    }

    pub fn skipped_samples(&self) -> u64 {
        self.skipped_samples.load(Ordering::Relaxed)
    }
}

fn is_valid_sample(location: &LocationSample) -> bool {
    location.gps_longitude.is_finite()
        && location.gps_latitude.is_finite()
        && location.gps_altitude.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspath_core::tool::setup_log;

    fn open_db() -> Arc<Db> {
        Arc::new(Db::open(None).unwrap())
    }

    fn sample(user_id: u64, timestamp: u64, longitude: f32, latitude: f32) -> LocationSample {
        LocationSample {
            user_id,
            timestamp,
            gps_longitude: longitude,
            gps_latitude: latitude,
            gps_altitude: 100.0,
        }
    }

    fn count_rows(db: &Db, column: &str) -> usize {
        let handle = db.rocks().cf_handle(column).unwrap();
        let mut it = db.rocks().raw_iterator_cf(handle);
        it.seek_to_first();
        let mut count = 0;
        while it.valid() {
            count += 1;
            it.next();
        }
        count
    }

    #[test]
    fn test_put_location_writes_both_tables() {
        setup_log();

        let db = open_db();
        let pusher = Pusher::new(db.clone());

        pusher
            .put_location(&[sample(1, 1_000_000, 12.345, 48.765)])
            .unwrap();

        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_TIMELINE), 1);
        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_REVERSE), 1);
    }

    #[test]
    fn test_put_location_skips_unusable_samples() {
        setup_log();

        let db = open_db();
        let pusher = Pusher::new(db.clone());

        let mut bad = sample(1, 1_000_000, 12.345, 48.765);
        bad.gps_longitude = f32::NAN;

        pusher
            .put_location(&[bad, sample(2, 1_000_100, 12.345, 48.765)])
            .unwrap();

        assert_eq!(pusher.skipped_samples(), 1);
        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_TIMELINE), 1);
    }

    #[test]
    fn test_delete_user_removes_all_rows() {
        setup_log();

        let db = open_db();
        let pusher = Pusher::new(db.clone());

        // Several samples across cells, plus another user that must survive.
        pusher
            .put_location(&[
                sample(1, 1_000_000, 12.345, 48.765),
                sample(1, 1_000_500, 12.345, 48.765),
                sample(1, 1_002_000, 12.347, 48.766),
                sample(2, 1_000_500, 12.345, 48.765),
            ])
            .unwrap();

        pusher.delete_user(1).unwrap();

        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_TIMELINE), 1);
        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_REVERSE), 1);
    }

    #[test]
    fn test_delete_missing_user_is_ok() {
        setup_log();

        let db = open_db();
        let pusher = Pusher::new(db.clone());
        pusher.delete_user(404).unwrap();
    }
}
