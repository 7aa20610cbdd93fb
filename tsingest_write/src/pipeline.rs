//! Pools of shards per record kind and the entry points producers write through.

use std::{sync::Arc, time::Duration};

use observability_deps::tracing::info;
use tokio::{sync::mpsc, task::JoinHandle};
use tsingest_backend::{health::HealthMonitor, node::NodeRegistry};
use tsingest_clap_blocks::ingest::{ConfigError, IngestConfig};
use tsingest_types::{Record, Sample, TimeSeries};

use crate::{
    Result, WriteError, WriteRequest, WriteResponse,
    router::Router,
    shard::{Shard, ShardConfig, ShardStats},
};

/// A fixed set of shards writing one record kind
#[derive(Debug)]
pub struct ShardPool<R> {
    router: Router<mpsc::Sender<WriteRequest<R>>>,
    stats: Vec<Arc<ShardStats>>,
}

impl<R: Record> ShardPool<R> {
    /// Spawn `shards` shard tasks on the current tokio runtime
    pub(crate) fn spawn(shards: usize, config: ShardConfig, registry: &Arc<NodeRegistry>) -> Self {
        let mut senders = Vec::with_capacity(shards);
        let mut stats = Vec::with_capacity(shards);

        for id in 0..shards {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            let shard = Shard::new(id, config, Arc::clone(registry), rx);
            stats.push(shard.stats());
            tokio::spawn(shard.run());
            senders.push(tx);
        }

        info!(
            kind = %R::KIND,
            shards,
            bulk_threshold = config.bulk_threshold,
            flush_interval = ?config.flush_interval,
            queue_capacity = config.queue_capacity,
            "started shard pool"
        );

        Self {
            router: Router::new(senders),
            stats,
        }
    }

    /// Enqueue `records` on a randomly chosen shard.
    ///
    /// Returns once the request is queued, waiting for queue capacity if the shard is backed
    /// up. The returned response resolves with the outcome of the commit that includes the
    /// records.
    pub async fn submit(&self, records: Vec<R>) -> Result<WriteResponse> {
        let shard = self.router.random().ok_or(WriteError::NoShards)?;
        Self::enqueue(shard, records).await
    }

    /// Enqueue `records` on the shard owning `fingerprint`, so writes for one series commit in
    /// submission order
    pub async fn submit_keyed(&self, fingerprint: u64, records: Vec<R>) -> Result<WriteResponse> {
        let shard = self
            .router
            .for_fingerprint(fingerprint)
            .ok_or(WriteError::NoShards)?;
        Self::enqueue(shard, records).await
    }

    async fn enqueue(
        shard: &mpsc::Sender<WriteRequest<R>>,
        records: Vec<R>,
    ) -> Result<WriteResponse> {
        let (request, response) = WriteRequest::new(records);
        shard
            .send(request)
            .await
            .map_err(|_| WriteError::ShardUnavailable)?;
        Ok(response)
    }

    pub fn shard_count(&self) -> usize {
        self.router.len()
    }

    /// Counters of each shard, indexed by shard id
    pub fn stats(&self) -> &[Arc<ShardStats>] {
        &self.stats
    }

    /// Requests currently queued across all shards
    pub fn queued(&self) -> usize {
        self.router
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }

    #[cfg(test)]
    fn shard(&self, id: usize) -> Option<&mpsc::Sender<WriteRequest<R>>> {
        self.router.get(id)
    }
}

/// The write path: one shard pool for time series records and one for samples, both writing
/// to the current node of a shared registry.
#[derive(Debug)]
pub struct IngestPipeline {
    time_series: ShardPool<TimeSeries>,
    samples: ShardPool<Sample>,
    registry: Arc<NodeRegistry>,
    health_check_interval: Duration,
}

impl IngestPipeline {
    /// Validate `config` and spawn every shard. Must be called from within a tokio runtime.
    pub fn new(config: &IngestConfig, registry: Arc<NodeRegistry>) -> Result<Self, ConfigError> {
        config.validate()?;

        let time_series = ShardPool::spawn(
            config.time_series_shards,
            ShardConfig {
                bulk_threshold: config.bulk_threshold,
                flush_interval: config.flush_interval(),
                queue_capacity: config.time_series_queue_capacity,
            },
            &registry,
        );
        let samples = ShardPool::spawn(
            config.sample_shards,
            ShardConfig {
                bulk_threshold: config.bulk_threshold,
                flush_interval: config.flush_interval(),
                queue_capacity: config.sample_queue_capacity,
            },
            &registry,
        );

        Ok(Self {
            time_series,
            samples,
            registry,
            health_check_interval: config.health_check_interval(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_pools(
        time_series: ShardPool<TimeSeries>,
        samples: ShardPool<Sample>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            time_series,
            samples,
            registry,
            health_check_interval: Duration::from_secs(5),
        }
    }

    pub async fn submit_time_series(&self, records: Vec<TimeSeries>) -> Result<WriteResponse> {
        self.time_series.submit(records).await
    }

    pub async fn submit_samples(&self, records: Vec<Sample>) -> Result<WriteResponse> {
        self.samples.submit(records).await
    }

    pub fn time_series(&self) -> &ShardPool<TimeSeries> {
        &self.time_series
    }

    pub fn samples(&self) -> &ShardPool<Sample> {
        &self.samples
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Start the background health checks of every registered node
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        Arc::new(HealthMonitor::new(Arc::clone(&self.registry))).spawn(self.health_check_interval)
    }
}
