//! A single shard of a write pipeline.
//!
//! Each shard is one task that owns a request queue, a flush timer and at most one open backend
//! transaction. Records from incoming requests are executed against the open transaction as
//! they arrive, and the transaction is committed once the number of buffered records reaches
//! the bulk threshold, or when the flush timer fires with records pending. The commit outcome is
//! sent to every request that contributed records to it.
//!
//! A shard only opens a transaction while the current backend node is online. A request that
//! arrives while it is offline is parked, unacknowledged, and written on the first timer tick
//! that finds the node back. Until then the shard takes nothing more from its queue, so once the
//! queue is full producers wait.

use std::{
    collections::VecDeque,
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use observability_deps::tracing::{debug, error, info, warn};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tsingest_backend::{BackendError, Statement, Transaction, node::NodeRegistry};
use tsingest_clap_blocks::ingest::QUEUE_WARNING_MARGIN;
use tsingest_types::{Record, insert_statement};

use crate::{CommitOutcome, WriteRequest};

/// Settings shared by every shard of a pool
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShardConfig {
    pub(crate) bulk_threshold: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) queue_capacity: usize,
}

/// Counters published by a shard
#[derive(Debug, Default)]
pub struct ShardStats {
    commits: AtomicU64,
    failed_commits: AtomicU64,
    committed_records: AtomicU64,
    parked_requests: AtomicUsize,
}

impl ShardStats {
    /// Number of batches that were committed successfully
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of batches whose commit (or transaction setup) failed
    pub fn failed_commits(&self) -> u64 {
        self.failed_commits.load(Ordering::Relaxed)
    }

    /// Number of records in successfully committed batches
    pub fn committed_records(&self) -> u64 {
        self.committed_records.load(Ordering::Relaxed)
    }

    /// Requests waiting for the backend node to come back online
    pub fn parked_requests(&self) -> usize {
        self.parked_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Threshold,
    Timer,
    QueueClosed,
}

impl Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Threshold => "threshold",
            Self::Timer => "timer",
            Self::QueueClosed => "queue_closed",
        })
    }
}

/// Where the records of an open batch go
#[derive(Debug)]
enum BatchWriter {
    Ready {
        transaction: Box<dyn Transaction>,
        statement: Box<dyn Statement>,
    },
    /// The transaction could not be set up. Records are still counted so the batch flushes on
    /// schedule, and this error becomes the batch outcome.
    Failed(Arc<BackendError>),
}

/// The state of a shard between opening a transaction and committing it
#[derive(Debug)]
struct OpenBatch {
    writer: BatchWriter,
    records: usize,
    responses: Vec<oneshot::Sender<CommitOutcome>>,
}

impl OpenBatch {
    async fn append<R: Record>(&mut self, shard_id: usize, records: &[R]) {
        for record in records {
            if let BatchWriter::Ready { statement, .. } = &mut self.writer {
                if let Err(e) = statement.exec(&record.values()).await {
                    error!(shard_id, kind = %R::KIND, %e, "failed to execute insert");
                }
            }
            self.records += 1;
        }
    }

    /// Commit the batch, returning its outcome along with the responses waiting on it
    async fn commit(self) -> (CommitOutcome, Vec<oneshot::Sender<CommitOutcome>>, usize) {
        let outcome = match self.writer {
            BatchWriter::Ready {
                transaction,
                statement,
            } => {
                drop(statement);
                transaction.commit().await.map_err(Arc::new)
            }
            BatchWriter::Failed(e) => Err(e),
        };
        (outcome, self.responses, self.records)
    }
}

#[derive(Debug)]
pub(crate) struct Shard<R> {
    id: usize,
    config: ShardConfig,
    registry: Arc<NodeRegistry>,
    requests: mpsc::Receiver<WriteRequest<R>>,
    batch: Option<OpenBatch>,
    /// Requests received while no transaction could be opened, in arrival order
    parked: VecDeque<WriteRequest<R>>,
    /// Set while requests are held for an offline node
    holding: bool,
    stats: Arc<ShardStats>,
}

impl<R: Record> Shard<R> {
    pub(crate) fn new(
        id: usize,
        config: ShardConfig,
        registry: Arc<NodeRegistry>,
        requests: mpsc::Receiver<WriteRequest<R>>,
    ) -> Self {
        Self {
            id,
            config,
            registry,
            requests,
            batch: None,
            parked: VecDeque::new(),
            holding: false,
            stats: Default::default(),
        }
    }

    pub(crate) fn stats(&self) -> Arc<ShardStats> {
        Arc::clone(&self.stats)
    }

    /// Process requests and timer ticks until the request queue is closed
    pub(crate) async fn run(mut self) {
        let timer = tokio::time::sleep_until(Instant::now() + self.config.flush_interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                // while writes are held, leave new requests in the queue so producers wait
                request = self.requests.recv(), if self.parked.is_empty() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        error!(shard_id = self.id, kind = %R::KIND, "shard request queue closed");
                        self.shutdown().await;
                        return;
                    }
                },
                () = &mut timer => {
                    let next = timer.deadline() + self.config.flush_interval;
                    timer.as_mut().reset(next);
                    self.handle_timer().await;

                    if !self.parked.is_empty() && self.requests.is_closed() {
                        error!(shard_id = self.id, kind = %R::KIND, "shard request queue closed");
                        self.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_request(&mut self, request: WriteRequest<R>) {
        if request.records.is_empty() {
            // nothing to commit, so nothing to wait for
            let _ = request.response.send(Ok(()));
            return;
        }
        self.parked.push_back(request);
        self.write_parked().await;
    }

    async fn handle_timer(&mut self) {
        self.write_parked().await;

        let pending = self.batch.as_ref().is_some_and(|b| b.records > 0);
        if pending {
            self.flush(FlushTrigger::Timer).await;
        }
        if pending || !self.parked.is_empty() {
            self.check_queue_depth();
        }
    }

    /// Warn if the request queue is within [`QUEUE_WARNING_MARGIN`] of its capacity
    fn check_queue_depth(&self) {
        let depth = self.requests.len();
        if depth >= self
            .config
            .queue_capacity
            .saturating_sub(QUEUE_WARNING_MARGIN)
        {
            warn!(
                shard_id = self.id,
                kind = %R::KIND,
                depth,
                capacity = self.config.queue_capacity,
                "shard queue is close to capacity"
            );
        }
    }

    /// Move parked requests into the open batch, opening one if needed, and commit whenever the
    /// bulk threshold is reached. Stops early if no transaction can be opened.
    async fn write_parked(&mut self) {
        while let Some(request) = self.parked.pop_front() {
            let mut batch = match self.batch.take() {
                Some(batch) => batch,
                None => match self.open_batch().await {
                    Some(batch) => batch,
                    None => {
                        self.parked.push_front(request);
                        break;
                    }
                },
            };

            batch.append(self.id, &request.records).await;
            batch.responses.push(request.response);

            let full = batch.records >= self.config.bulk_threshold;
            self.batch = Some(batch);
            if full {
                self.flush(FlushTrigger::Threshold).await;
            }
        }
        self.stats
            .parked_requests
            .store(self.parked.len(), Ordering::Relaxed);
    }

    /// Open a transaction against the current node. Returns `None` if the node is offline.
    async fn open_batch(&mut self) -> Option<OpenBatch> {
        let node = self.registry.current();
        if !node.is_online() {
            if !self.holding {
                self.holding = true;
                warn!(
                    shard_id = self.id,
                    kind = %R::KIND,
                    node = %node.name(),
                    "backend node is offline, holding writes until it is back"
                );
            }
            return None;
        }
        if self.holding {
            self.holding = false;
            info!(
                shard_id = self.id,
                kind = %R::KIND,
                node = %node.name(),
                parked = self.parked.len() + 1,
                "backend node is online, writing held requests"
            );
        }

        let sql = insert_statement(node.table_for(R::KIND), R::COLUMNS);
        let writer = match node.backend().begin().await {
            Ok(mut transaction) => match transaction.prepare(&sql).await {
                Ok(statement) => BatchWriter::Ready {
                    transaction,
                    statement,
                },
                Err(e) => {
                    error!(shard_id = self.id, kind = %R::KIND, %e, %sql, "failed to prepare insert");
                    BatchWriter::Failed(Arc::new(e))
                }
            },
            Err(e) => {
                error!(shard_id = self.id, kind = %R::KIND, %e, "failed to begin transaction");
                BatchWriter::Failed(Arc::new(e))
            }
        };

        Some(OpenBatch {
            writer,
            records: 0,
            responses: vec![],
        })
    }

    /// Commit the open batch, if any, and send the outcome to every request in it
    async fn flush(&mut self, trigger: FlushTrigger) {
        let Some(batch) = self.batch.take() else {
            return;
        };

        let (outcome, responses, records) = batch.commit().await;
        match &outcome {
            Ok(()) => {
                debug!(
                    shard_id = self.id,
                    kind = %R::KIND,
                    %trigger,
                    records,
                    requests = responses.len(),
                    "committed batch"
                );
                self.stats.commits.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .committed_records
                    .fetch_add(records as u64, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    shard_id = self.id,
                    kind = %R::KIND,
                    %trigger,
                    %e,
                    records,
                    requests = responses.len(),
                    "failed to commit batch"
                );
                self.stats.failed_commits.fetch_add(1, Ordering::Relaxed);
            }
        }

        for response in responses {
            // the caller may have stopped waiting
            let _ = response.send(outcome.clone());
        }
    }

    async fn shutdown(&mut self) {
        self.flush(FlushTrigger::QueueClosed).await;
        if !self.parked.is_empty() {
            warn!(
                shard_id = self.id,
                kind = %R::KIND,
                dropped = self.parked.len(),
                "dropping writes held for an offline backend node"
            );
            self.parked.clear();
            self.stats.parked_requests.store(0, Ordering::Relaxed);
        }
    }
}
