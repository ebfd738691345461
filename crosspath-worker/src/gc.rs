//! Retention sweep: periodically drops rows older than the horizon from
//! both column families.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use rocksdb::WriteBatch;
use tokio_graceful_shutdown::SubsystemHandle;

use crosspath_core::crosspath::ReverseKey;
use crosspath_core::db::Db;
use crosspath_core::keys::{decode_timeline_key, encode_reverse_key};
use crosspath_core::zones::{ts_to_zone, TIME_PRECISION};

use crate::config::WorkerConfig;

pub struct Gc {
    db: Arc<Db>,
    interval: Duration,
    retention_s: u64,
}

impl Gc {
    pub fn new(db: Arc<Db>, config: &WorkerConfig) -> Self {
        Self {
            db,
            interval: Duration::from_secs(config.gc_interval_s),
            retention_s: config.retention_s(),
        }
    }

    /// Runs sweeps on a timer until shutdown is requested. Failures are
    /// logged and retried on the next tick; the sweep is not on the critical
    /// path.
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    info!("gc shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.collect() {
                        Ok(deleted) => {
                            info!("gc pass done, deleted_rows: {}", deleted);
                        }
                        Err(e) => {
                            error!("gc pass failed, will retry on next tick, error: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// One sweep against the current wall clock.
    pub fn collect(&self) -> crosspath_core::error::Result<u64> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.collect_older_than(now.saturating_sub(self.retention_s))
    }

    /// Deletes every row in a time zone strictly older than the horizon's
    /// zone, in both column families.
    ///
    /// Old rows are contiguous at the low end of the timeline order, so the
    /// sweep never visits live data. Whole-zone granularity keeps cells
    /// intact; rows in the horizon's own zone wait for a later tick.
    pub fn collect_older_than(&self, horizon: u64) -> crosspath_core::error::Result<u64> {
        let timeline_handle = self.db.timeline_handle()?;
        let reverse_handle = self.db.reverse_handle()?;

        let horizon_zone = ts_to_zone(horizon);

        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;

        let mut it = self.db.rocks().raw_iterator_cf(timeline_handle);
        it.seek_to_first();
        while it.valid() {
            let Some(raw_key) = it.key() else {
                break;
            };
            let key = decode_timeline_key(raw_key)?;

            if ts_to_zone(key.timestamp) >= horizon_zone {
                break;
            }

            batch.delete_cf(timeline_handle, raw_key);
            batch.delete_cf(
                reverse_handle,
                encode_reverse_key(&ReverseKey {
                    user_id: key.user_id,
                    timestamp_zone: key.timestamp / TIME_PRECISION,
                    gps_longitude_zone: key.gps_longitude_zone,
                    gps_latitude_zone: key.gps_latitude_zone,
                }),
            );
            deleted += 1;

            it.next();
        }
        drop(it);

        self.db.rocks().write(batch)?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::Pusher;
    use crosspath_core::crosspath::LocationSample;
    use crosspath_core::tool::setup_log;

    fn config() -> WorkerConfig {
        WorkerConfig::from_str(r#"listen_addr = "127.0.0.1:7001""#).unwrap()
    }

    fn sample(user_id: u64, timestamp: u64) -> LocationSample {
        LocationSample {
            user_id,
            timestamp,
            gps_longitude: 12.345,
            gps_latitude: 48.765,
            gps_altitude: 0.0,
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
    fn test_collect_drops_expired_zones() {
        setup_log();

        let db = Arc::new(Db::open(None).unwrap());
        let pusher = Pusher::new(db.clone());
        let gc = Gc::new(db.clone(), &config());

        pusher
            .put_location(&[
                sample(1, 1_000_000),
                sample(1, 1_000_900),
                sample(2, 1_500_000),
                sample(3, 2_000_000),
            ])
            .unwrap();

        // Horizon inside zone 1500: zones 1000 are dropped, 1500 survives
        // because the sweep works in whole zones.
        let deleted = gc.collect_older_than(1_500_500).unwrap();
        assert_eq!(deleted, 2);

        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_TIMELINE), 2);
        assert_eq!(count_rows(&db, crosspath_core::db::COLUMN_REVERSE), 2);
    }

    #[test]
    fn test_collect_on_empty_database() {
        setup_log();

        let db = Arc::new(Db::open(None).unwrap());
        let gc = Gc::new(db, &config());
        assert_eq!(gc.collect_older_than(1_000_000).unwrap(), 0);
    }
}
