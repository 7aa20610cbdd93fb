//! Storage backend abstraction for the ingestion write path.
//!
//! The write path only needs a handful of operations from a storage node: open a transaction,
//! prepare an insert inside it, execute the insert once per row, commit, and a cheap liveness
//! probe. Those are modelled by the [`Backend`], [`Transaction`] and [`Statement`] traits so the
//! driver layer can live elsewhere.
//!
//! The [`node`] module holds the registry of configured nodes and the handle to the node that is
//! currently targeted, and [`health`] keeps the nodes' online flags up to date.

pub mod health;
pub mod mock;
pub mod node;

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tsingest_types::ColumnValue;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// An exception raised by the storage server, with its diagnostics
    #[error("server exception [{code}]: {message}")]
    Server {
        code: i32,
        message: String,
        stack_trace: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;

/// A distinct (fingerprint, labels) pair persisted in a node's time series table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRow {
    pub fingerprint: u64,
    /// JSON object of label name to label value
    pub labels: String,
}

/// A session against one storage node
#[async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Lightweight liveness probe
    async fn ping(&self) -> Result<()>;

    /// Stream the distinct series persisted in `table`. An error on an individual row does not
    /// end the stream.
    async fn scan_series(&self, table: &str) -> Result<BoxStream<'static, Result<SeriesRow>>>;
}

/// An open transaction. Dropping it without calling [`Transaction::commit`] discards any rows
/// written through its statements.
#[async_trait]
pub trait Transaction: Debug + Send {
    /// Prepare a parameterized statement bound to this transaction
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn Statement>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// A prepared statement belonging to an open [`Transaction`]
#[async_trait]
pub trait Statement: Debug + Send {
    async fn exec(&mut self, args: &[ColumnValue]) -> Result<()>;
}
