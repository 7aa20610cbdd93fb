//! An in-memory [`Backend`] that records every call made against it.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tsingest_types::ColumnValue;

use crate::{Backend, BackendError, Result, SeriesRow, Statement, Transaction};

/// The rows of one committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBatch {
    /// Statements prepared in the transaction, in order
    pub statements: Vec<String>,
    pub rows: Vec<Vec<ColumnValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ping {
    Ok,
    Unreachable,
}

#[derive(Debug, Default)]
struct Inner {
    commits: Vec<CommittedBatch>,
    prepared: Vec<String>,
    commit_errors: VecDeque<BackendError>,
    ping_exception: Option<(i32, String)>,
    series: Vec<std::result::Result<SeriesRow, String>>,
}

#[derive(Debug)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
    ping: Mutex<Ping>,
    fail_begin: AtomicBool,
    fail_prepare: AtomicBool,
    fail_exec: Arc<AtomicBool>,
    fail_scan: AtomicBool,
    begins: AtomicUsize,
    pings: AtomicUsize,
    execs: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            inner: Default::default(),
            ping: Mutex::new(Ping::Ok),
            fail_begin: AtomicBool::new(false),
            fail_prepare: AtomicBool::new(false),
            fail_exec: Arc::new(AtomicBool::new(false)),
            fail_scan: AtomicBool::new(false),
            begins: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            execs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockBackend {
    /// Make pings fail with a connection error while `reachable` is false
    pub fn set_reachable(&self, reachable: bool) {
        *self.ping.lock() = if reachable { Ping::Ok } else { Ping::Unreachable };
        if reachable {
            self.inner.lock().ping_exception = None;
        }
    }

    /// Make pings fail with a server exception
    pub fn set_ping_exception(&self, code: i32, message: impl Into<String>) {
        self.inner.lock().ping_exception = Some((code, message.into()));
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_exec(&self, fail: bool) {
        self.fail_exec.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Queue an error to be returned by the next commit
    pub fn fail_next_commit(&self, error: BackendError) {
        self.inner.lock().commit_errors.push_back(error);
    }

    /// Rows returned from [`Backend::scan_series`]; an `Err` becomes a per-row scan error
    pub fn with_series(self, series: Vec<std::result::Result<SeriesRow, String>>) -> Self {
        self.inner.lock().series = series;
        self
    }

    pub fn commits(&self) -> Vec<CommittedBatch> {
        self.inner.lock().commits.clone()
    }

    pub fn prepared(&self) -> Vec<String> {
        self.inner.lock().prepared.clone()
    }

    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("begin refused".to_string()));
        }
        Ok(Box::new(MockTransaction {
            backend: Arc::clone(&self.inner),
            fail_prepare: self.fail_prepare.load(Ordering::SeqCst),
            fail_exec: Arc::clone(&self.fail_exec),
            execs: Arc::clone(&self.execs),
            statements: vec![],
            rows: Default::default(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if let Some((code, message)) = self.inner.lock().ping_exception.clone() {
            return Err(BackendError::Server {
                code,
                message,
                stack_trace: "mock stack trace".to_string(),
            });
        }
        match *self.ping.lock() {
            Ping::Ok => Ok(()),
            Ping::Unreachable => Err(BackendError::Connection("connection refused".to_string())),
        }
    }

    async fn scan_series(&self, _table: &str) -> Result<BoxStream<'static, Result<SeriesRow>>> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(BackendError::Server {
                code: 60,
                message: "table does not exist".to_string(),
                stack_trace: String::new(),
            });
        }
        let rows = self
            .inner
            .lock()
            .series
            .iter()
            .map(|r| r.clone().map_err(BackendError::Connection))
            .collect::<Vec<_>>();
        Ok(stream::iter(rows).boxed())
    }
}

#[derive(Debug)]
struct MockTransaction {
    backend: Arc<Mutex<Inner>>,
    fail_prepare: bool,
    fail_exec: Arc<AtomicBool>,
    execs: Arc<AtomicUsize>,
    statements: Vec<String>,
    rows: Arc<Mutex<Vec<Vec<ColumnValue>>>>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn Statement>> {
        if self.fail_prepare {
            return Err(BackendError::Server {
                code: 62,
                message: format!("syntax error in: {sql}"),
                stack_trace: String::new(),
            });
        }
        self.statements.push(sql.to_string());
        self.backend.lock().prepared.push(sql.to_string());
        Ok(Box::new(MockStatement {
            fail_exec: Arc::clone(&self.fail_exec),
            execs: Arc::clone(&self.execs),
            rows: Arc::clone(&self.rows),
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            backend,
            statements,
            rows,
            ..
        } = *self;
        let mut backend = backend.lock();
        if let Some(e) = backend.commit_errors.pop_front() {
            return Err(e);
        }
        let rows = std::mem::take(&mut *rows.lock());
        backend.commits.push(CommittedBatch { statements, rows });
        Ok(())
    }
}

#[derive(Debug)]
struct MockStatement {
    fail_exec: Arc<AtomicBool>,
    execs: Arc<AtomicUsize>,
    rows: Arc<Mutex<Vec<Vec<ColumnValue>>>>,
}

#[async_trait]
impl Statement for MockStatement {
    async fn exec(&mut self, args: &[ColumnValue]) -> Result<()> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        if self.fail_exec.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("exec failed".to_string()));
        }
        self.rows.lock().push(args.to_vec());
        Ok(())
    }
}
