//! Fixtures shared by the tests of this crate.

use std::{fmt, sync::Arc};

use observability_deps::tracing::{
    self, Event, Metadata,
    field::{Field, Visit},
    span::{Attributes, Id, Record},
    subscriber::{DefaultGuard, Subscriber},
};
use parking_lot::Mutex;
use tsingest_backend::{
    mock::MockBackend,
    node::{BackendNode, NodeRegistry, NodeTables},
};
use tsingest_types::Sample;

pub(crate) const TIME_SERIES_TABLE: &str = "time_series";
pub(crate) const SAMPLES_TABLE: &str = "samples_v2";

/// A registry with a single node backed by `backend`, marked online
pub(crate) fn online_registry(backend: &Arc<MockBackend>) -> Arc<NodeRegistry> {
    let node = BackendNode::new(
        "node-0",
        NodeTables::new(TIME_SERIES_TABLE, SAMPLES_TABLE),
        Arc::clone(backend) as _,
    );
    node.set_online(true);
    Arc::new(NodeRegistry::new([node]).unwrap())
}

pub(crate) fn sample(fingerprint: u64) -> Sample {
    Sample {
        fingerprint,
        timestamp_ms: 1_700_000_000_000 + fingerprint as i64,
        value: fingerprint as f64,
        string: String::new(),
    }
}

/// Captures the events logged on the current thread while it is alive, one line per event in
/// the form `level = WARN; message = ...; field = value; `.
///
/// Only sees events from tasks polled on the creating thread, so use it with the single
/// threaded test runtime.
#[derive(Debug)]
pub(crate) struct TracingCapture {
    logs: Arc<Mutex<Vec<String>>>,
    _guard: DefaultGuard,
}

impl TracingCapture {
    pub(crate) fn new() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let guard = tracing::subscriber::set_default(CaptureSubscriber {
            logs: Arc::clone(&logs),
        });
        Self {
            logs,
            _guard: guard,
        }
    }
}

impl fmt::Display for TracingCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.logs.lock().join("\n"))
    }
}

struct CaptureSubscriber {
    logs: Arc<Mutex<Vec<String>>>,
}

impl Subscriber for CaptureSubscriber {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut line = EventLine::default();
        line.push("level", &event.metadata().level().to_string());
        event.record(&mut line);
        self.logs.lock().push(line.0);
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

#[derive(Default)]
struct EventLine(String);

impl EventLine {
    fn push(&mut self, key: &str, value: &str) {
        self.0.push_str(&format!("{key} = {value}; "));
    }
}

impl Visit for EventLine {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field.name(), &format!("{value:?}"));
    }
}
