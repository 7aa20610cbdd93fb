//! CLI config for the sharded write pipelines and the backend health monitor.

use std::time::Duration;

/// A shard logs a warning when its queue holds at least `capacity - QUEUE_WARNING_MARGIN`
/// requests after a timed flush.
pub const QUEUE_WARNING_MARGIN: usize = 10;

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} ({value}) must be larger than the queue warning margin ({QUEUE_WARNING_MARGIN})")]
    CapacityBelowMargin { name: &'static str, value: usize },
}

/// Configuration of the write path
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct IngestConfig {
    /// Number of buffered records that forces an immediate commit of a shard's open
    /// transaction.
    #[clap(
        long = "bulk-threshold",
        env = "INGEST_BULK_THRESHOLD",
        default_value = "10000",
        action
    )]
    pub bulk_threshold: usize,

    /// Interval at which each shard commits whatever it has buffered. Writes that never reach
    /// the bulk threshold wait at most this long for their commit.
    #[clap(
        long = "flush-interval",
        env = "INGEST_FLUSH_INTERVAL",
        default_value = "1s",
        action
    )]
    pub flush_interval: humantime::Duration,

    /// Number of shards writing time series records.
    #[clap(
        long = "time-series-shards",
        env = "INGEST_TIME_SERIES_SHARDS",
        default_value = "4",
        action
    )]
    pub time_series_shards: usize,

    /// Number of shards writing sample records.
    #[clap(
        long = "sample-shards",
        env = "INGEST_SAMPLE_SHARDS",
        default_value = "4",
        action
    )]
    pub sample_shards: usize,

    /// Number of write requests each time series shard can queue before producers wait.
    #[clap(
        long = "time-series-queue-capacity",
        env = "INGEST_TIME_SERIES_QUEUE_CAPACITY",
        default_value = "20000",
        action
    )]
    pub time_series_queue_capacity: usize,

    /// Number of write requests each sample shard can queue before producers wait.
    #[clap(
        long = "sample-queue-capacity",
        env = "INGEST_SAMPLE_QUEUE_CAPACITY",
        default_value = "20000",
        action
    )]
    pub sample_queue_capacity: usize,

    /// Interval between liveness probes of the backend nodes.
    #[clap(
        long = "health-check-interval",
        env = "INGEST_HEALTH_CHECK_INTERVAL",
        default_value = "5s",
        action
    )]
    pub health_check_interval: humantime::Duration,
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval.into()
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval.into()
    }

    /// Check the settings that the pipelines cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("bulk-threshold", self.bulk_threshold),
            ("time-series-shards", self.time_series_shards),
            ("sample-shards", self.sample_shards),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.flush_interval().is_zero() {
            return Err(ConfigError::Zero("flush-interval"));
        }

        for (name, value) in [
            ("time-series-queue-capacity", self.time_series_queue_capacity),
            ("sample-queue-capacity", self.sample_queue_capacity),
        ] {
            if value <= QUEUE_WARNING_MARGIN {
                return Err(ConfigError::CapacityBelowMargin { name, value });
            }
        }

        Ok(())
    }
}
