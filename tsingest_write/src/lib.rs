//! The sharded write path of the ingestion service.
//!
//! Producers hand batches of records to an [`IngestPipeline`][pipeline::IngestPipeline], which
//! routes each call to one shard of the pool for that record kind. A shard accumulates the
//! records of many calls into one open backend transaction and commits it when either the bulk
//! threshold is reached or its flush timer fires. Every caller whose records were part of a
//! commit receives that commit's outcome through its [`WriteResponse`].
//!
//! Shards only open a new transaction while the current backend node is online; the node's
//! online flag is maintained by the [`HealthMonitor`][tsingest_backend::health::HealthMonitor].

pub mod label_cache;
pub mod pipeline;
mod router;
pub mod shard;
pub mod stream;

use std::sync::Arc;

use tokio::sync::oneshot;
use tsingest_backend::BackendError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteError {
    /// The batch the request was part of failed. Every request in the batch sees the same
    /// error.
    #[error("batch write failed: {0}")]
    Backend(Arc<BackendError>),

    #[error("shard is no longer accepting writes")]
    ShardUnavailable,

    #[error("no shards to write to")]
    NoShards,
}

pub type Result<T, E = WriteError> = std::result::Result<T, E>;

/// The outcome of one commit, shared by every request in it
pub(crate) type CommitOutcome = std::result::Result<(), Arc<BackendError>>;

/// Records bound for one shard, along with the channel used to report the outcome of the
/// commit that includes them
#[derive(Debug)]
pub(crate) struct WriteRequest<R> {
    pub(crate) records: Vec<R>,
    pub(crate) response: oneshot::Sender<CommitOutcome>,
}

impl<R> WriteRequest<R> {
    pub(crate) fn new(records: Vec<R>) -> (Self, WriteResponse) {
        let (response, rx) = oneshot::channel();
        (Self { records, response }, WriteResponse { rx })
    }
}

/// Handle to the outcome of a submitted write.
///
/// Resolves once the commit that includes the write completes, or with
/// [`WriteError::ShardUnavailable`] if the shard went away before committing it.
#[derive(Debug)]
pub struct WriteResponse {
    rx: oneshot::Receiver<CommitOutcome>,
}

impl WriteResponse {
    /// Wait for the commit outcome
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(outcome) => outcome.map_err(WriteError::Backend),
            Err(_) => Err(WriteError::ShardUnavailable),
        }
    }

    /// Check for the outcome without waiting; `None` while the write is still pending
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome.map_err(WriteError::Backend)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WriteError::ShardUnavailable)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;
