//! Embedded rocksdb database with the two custom-ordered column families.
//!
//! The timeline family orders rows so that a single sequential read yields
//! all users in a 100m x 100m zone for a period of 1000 seconds; the reverse
//! family yields all zones a user visited in a single prefix scan. Both
//! orders are frozen by their comparator names and must never change without
//! a version bump, otherwise existing databases are corrupted.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use log::info;
use prost::Message;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Options, DB,
};
use tempfile::TempDir;

use crate::crosspath::{ReverseKey, TimelineKey};
use crate::error::{Error, Result};
use crate::zones::TIME_PRECISION;

/// Name of the timeline column family.
pub const COLUMN_TIMELINE: &str = "by-timeline";

/// Name of the reverse column family.
pub const COLUMN_REVERSE: &str = "by-user";

/// Persisted with the database; bump the version on any ordering change.
pub const TIMELINE_COMPARATOR_NAME: &str = "timeline-comparator-0.1";

/// Persisted with the database; bump the version on any ordering change.
pub const REVERSE_COMPARATOR_NAME: &str = "reverse-comparator-0.1";

/// Used for GPS float comparisons inside the comparators.
const GPS_COMPARE_EPSILON: f32 = 0.0000001;

/// Compares two GPS zones the way the persisted schema does: equal within
/// [`GPS_COMPARE_EPSILON`], otherwise in descending order of magnitude. The
/// direction is part of the frozen schema and must be preserved.
fn compare_gps_zones(left: f32, right: f32) -> Ordering {
    let fdiff = left - right;
    if fdiff > GPS_COMPARE_EPSILON {
        Ordering::Less
    } else if fdiff < -GPS_COMPARE_EPSILON {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Total order of the timeline column family.
///
/// The leading timestamp zone keeps writes concentrated near the end of the
/// keyspace; zones before user ids make a cell scan yield all users
/// co-located in time and space. Malformed keys decode to default fields and
/// sort before everything else.
pub fn compare_timeline_keys(a: &[u8], b: &[u8]) -> Ordering {
    let left = TimelineKey::decode(a).unwrap_or_default();
    let right = TimelineKey::decode(b).unwrap_or_default();

    (left.timestamp / TIME_PRECISION)
        .cmp(&(right.timestamp / TIME_PRECISION))
        .then_with(|| compare_gps_zones(left.gps_longitude_zone, right.gps_longitude_zone))
        .then_with(|| compare_gps_zones(left.gps_latitude_zone, right.gps_latitude_zone))
        .then_with(|| left.user_id.cmp(&right.user_id))
        .then_with(|| (left.timestamp % TIME_PRECISION).cmp(&(right.timestamp % TIME_PRECISION)))
}

/// Total order of the reverse column family: all zones of a user are
/// adjacent, ordered by time zone.
pub fn compare_reverse_keys(a: &[u8], b: &[u8]) -> Ordering {
    let left = ReverseKey::decode(a).unwrap_or_default();
    let right = ReverseKey::decode(b).unwrap_or_default();

    left.user_id
        .cmp(&right.user_id)
        .then_with(|| left.timestamp_zone.cmp(&right.timestamp_zone))
        .then_with(|| compare_gps_zones(left.gps_longitude_zone, right.gps_longitude_zone))
        .then_with(|| compare_gps_zones(left.gps_latitude_zone, right.gps_latitude_zone))
}

/// Owner of the engine handle and its column families.
///
/// Shared read-only by every subsystem after init; if no path is configured
/// the database lives in a temporary directory removed on drop.
pub struct Db {
    db: DB,
    path: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl Db {
    /// Opens the database, creating it and its column families if missing.
    ///
    /// Reopening an existing database presents the same comparator names;
    /// the engine refuses mismatched names as a fatal error.
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        let (path, temp_dir) = match db_path {
            Some(p) if !p.as_os_str().is_empty() => (p.to_path_buf(), None),
            _ => {
                let temp_dir = TempDir::new().map_err(|e| {
                    Error::Internal(format!("can't create temporary db directory, error: {}", e))
                })?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };

        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        options.set_compression_type(DBCompressionType::Lz4);
        options.set_max_background_jobs(8);
        options.set_write_buffer_size(512 << 20);
        options.set_max_write_buffer_number(8);
        options.set_min_write_buffer_number_to_merge(2);
        options.set_max_open_files(-1);

        let cache = Cache::new_lru_cache(512 << 20);
        let mut table_options = BlockBasedOptions::default();
        table_options.set_block_cache(&cache);
        options.set_block_based_table_factory(&table_options);

        let mut timeline_options = Options::default();
        timeline_options.set_comparator(TIMELINE_COMPARATOR_NAME, Box::new(compare_timeline_keys));
        timeline_options.set_compression_type(DBCompressionType::Lz4);

        let mut reverse_options = Options::default();
        reverse_options.set_comparator(REVERSE_COMPARATOR_NAME, Box::new(compare_reverse_keys));
        reverse_options.set_compression_type(DBCompressionType::Lz4);

        let columns = vec![
            ColumnFamilyDescriptor::new(rocksdb::DEFAULT_COLUMN_FAMILY_NAME, Options::default()),
            ColumnFamilyDescriptor::new(COLUMN_TIMELINE, timeline_options),
            ColumnFamilyDescriptor::new(COLUMN_REVERSE, reverse_options),
        ];

        let db = DB::open_cf_descriptors(&options, &path, columns).map_err(|e| {
            Error::Internal(format!(
                "unable to init database, path: {}, error: {}",
                path.display(),
                e
            ))
        })?;

        info!("initialized database, path: {}", path.display());

        Ok(Self {
            db,
            path,
            _temp_dir: temp_dir,
        })
    }

    pub fn rocks(&self) -> &DB {
        &self.db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeline_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(COLUMN_TIMELINE)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", COLUMN_TIMELINE)))
    }

    pub fn reverse_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(COLUMN_REVERSE)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", COLUMN_REVERSE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{encode_reverse_key, encode_timeline_key};

    fn timeline_key(
        timestamp: u64,
        user_id: u64,
        gps_longitude_zone: f32,
        gps_latitude_zone: f32,
    ) -> Vec<u8> {
        encode_timeline_key(&TimelineKey {
            timestamp,
            user_id,
            gps_longitude_zone,
            gps_latitude_zone,
        })
    }

    fn reverse_key(
        user_id: u64,
        timestamp_zone: u64,
        gps_longitude_zone: f32,
        gps_latitude_zone: f32,
    ) -> Vec<u8> {
        encode_reverse_key(&ReverseKey {
            user_id,
            timestamp_zone,
            gps_longitude_zone,
            gps_latitude_zone,
        })
    }

    #[test]
    fn test_timeline_comparator_timestamp_zone_first() {
        let a = timeline_key(1_000_000, 5, 12.345, 48.765);
        let b = timeline_key(1_001_000, 1, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&a, &b), Ordering::Less);
        assert_eq!(compare_timeline_keys(&b, &a), Ordering::Greater);

        // Same time zone: ordered by the remaining fields, not the raw
        // timestamp.
        let c = timeline_key(1_000_999, 1, 12.345, 48.765);
        let d = timeline_key(1_000_000, 2, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&c, &d), Ordering::Less);
    }

    #[test]
    fn test_timeline_comparator_zones_descend() {
        // Larger longitude zones sort first; the descending direction is
        // part of the persisted schema.
        let a = timeline_key(1_000_000, 1, 12.346, 48.765);
        let b = timeline_key(1_000_000, 1, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&a, &b), Ordering::Less);

        let c = timeline_key(1_000_000, 1, 12.345, 48.766);
        let d = timeline_key(1_000_000, 1, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&c, &d), Ordering::Less);
    }

    #[test]
    fn test_timeline_comparator_epsilon_band() {
        // Zones closer than the epsilon compare equal. Small magnitudes so
        // the difference survives the f32 representation.
        let a = timeline_key(1_000_000, 1, 0.00000001, 48.765);
        let b = timeline_key(1_000_000, 1, 0.00000003, 48.765);
        assert_eq!(compare_timeline_keys(&a, &b), Ordering::Equal);

        // Past the epsilon: descending.
        let c = timeline_key(1_000_000, 1, 0.00000050, 48.765);
        assert_eq!(compare_timeline_keys(&c, &a), Ordering::Less);
    }

    #[test]
    fn test_timeline_comparator_user_then_timestamp_hi() {
        let a = timeline_key(1_000_500, 1, 12.345, 48.765);
        let b = timeline_key(1_000_400, 2, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&a, &b), Ordering::Less);

        let c = timeline_key(1_000_400, 1, 12.345, 48.765);
        let d = timeline_key(1_000_500, 1, 12.345, 48.765);
        assert_eq!(compare_timeline_keys(&c, &d), Ordering::Less);
    }

    #[test]
    fn test_timeline_comparator_reference_order() {
        // Reference ordering vector: any change here is a corruption bug,
        // not a refactoring opportunity.
        let ordered = vec![
            timeline_key(999_999, 7, 12.345, 48.765),
            timeline_key(1_000_000, 1, 12.346, 48.765),
            timeline_key(1_000_000, 1, 12.345, 48.766),
            timeline_key(1_000_000, 1, 12.345, 48.765),
            timeline_key(1_000_100, 1, 12.345, 48.765),
            timeline_key(1_000_100, 2, 12.345, 48.765),
            timeline_key(1_000_000, 1, 12.344, 48.765),
            timeline_key(1_001_000, 1, 12.999, 48.765),
        ];

        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(
                    compare_timeline_keys(a, b),
                    expected,
                    "position {} vs {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_reverse_comparator_reference_order() {
        let ordered = vec![
            reverse_key(1, 1000, 12.346, 48.765),
            reverse_key(1, 1000, 12.345, 48.766),
            reverse_key(1, 1000, 12.345, 48.765),
            reverse_key(1, 1001, 12.999, 48.765),
            reverse_key(2, 0, 12.345, 48.765),
        ];

        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(
                    compare_reverse_keys(a, b),
                    expected,
                    "position {} vs {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_comparators_tolerate_garbage() {
        let garbage: &[u8] = &[0xff, 0xff, 0xff];
        let key = timeline_key(1_000_000, 1, 12.345, 48.765);

        // Garbage decodes to default fields and lands before real keys.
        assert_eq!(compare_timeline_keys(garbage, &key), Ordering::Less);
        assert_eq!(compare_timeline_keys(garbage, garbage), Ordering::Equal);
    }

    #[test]
    fn test_open_creates_families() {
        let db = Db::open(None).unwrap();
        assert!(db.timeline_handle().is_ok());
        assert!(db.reverse_handle().is_ok());
    }

    #[test]
    fn test_temp_dir_removed_on_drop() {
        let db = Db::open(None).unwrap();
        let path = db.path().to_path_buf();
        assert!(path.exists());

        drop(db);
        assert!(!path.exists());
    }

    #[test]
    fn test_engine_iterates_in_comparator_order() {
        let db = Db::open(None).unwrap();
        let handle = db.timeline_handle().unwrap();

        // Insert out of order.
        let keys = vec![
            timeline_key(1_001_000, 1, 12.345, 48.765),
            timeline_key(1_000_000, 1, 12.344, 48.765),
            timeline_key(1_000_000, 2, 12.345, 48.765),
            timeline_key(1_000_000, 1, 12.346, 48.765),
            timeline_key(1_000_500, 1, 12.345, 48.765),
        ];
        for key in &keys {
            db.rocks().put_cf(handle, key, b"").unwrap();
        }

        let mut scanned = Vec::new();
        let mut it = db.rocks().raw_iterator_cf(handle);
        it.seek_to_first();
        while it.valid() {
            scanned.push(it.key().unwrap().to_vec());
            it.next();
        }

        let mut expected = keys.clone();
        expected.sort_by(|a, b| compare_timeline_keys(a, b));
        assert_eq!(scanned, expected);
    }
}
