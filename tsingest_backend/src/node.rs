//! The registry of storage nodes and the handle to the currently targeted node.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use observability_deps::tracing::info;
use parking_lot::RwLock;
use tsingest_types::RecordKind;

use crate::Backend;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("backend node registry must contain at least one node")]
    EmptyRegistry,

    #[error("unknown backend node: {0}")]
    UnknownNode(String),
}

/// Destination table names a node serves, per record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTables {
    pub time_series: String,
    pub samples: String,
}

impl NodeTables {
    pub fn new(time_series: impl Into<String>, samples: impl Into<String>) -> Self {
        Self {
            time_series: time_series.into(),
            samples: samples.into(),
        }
    }

    pub fn for_kind(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::TimeSeries => &self.time_series,
            RecordKind::Sample => &self.samples,
        }
    }
}

/// One storage endpoint.
///
/// The online flag is flipped by the health monitor and read by writers without any further
/// coordination, so it may change between two reads.
#[derive(Debug)]
pub struct BackendNode {
    name: Arc<str>,
    tables: NodeTables,
    online: AtomicBool,
    backend: Arc<dyn Backend>,
}

impl BackendNode {
    /// Create a node. It starts offline until a liveness probe succeeds.
    pub fn new(name: impl Into<Arc<str>>, tables: NodeTables, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            tables,
            online: AtomicBool::new(false),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &NodeTables {
        &self.tables
    }

    pub fn table_for(&self, kind: RecordKind) -> &str {
        self.tables.for_kind(kind)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Set the online flag, returning the previous value
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }
}

/// All configured nodes, plus the one every writer currently targets
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: Vec<Arc<BackendNode>>,
    current: RwLock<Arc<BackendNode>>,
}

impl NodeRegistry {
    /// Create a registry; the first node becomes the current one
    pub fn new(nodes: impl IntoIterator<Item = BackendNode>) -> Result<Self, NodeError> {
        let nodes: Vec<Arc<BackendNode>> = nodes.into_iter().map(Arc::new).collect();
        let first = nodes.first().ok_or(NodeError::EmptyRegistry)?;
        let current = RwLock::new(Arc::clone(first));
        Ok(Self { nodes, current })
    }

    pub fn nodes(&self) -> &[Arc<BackendNode>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<Arc<BackendNode>> {
        self.nodes.iter().find(|n| n.name() == name).map(Arc::clone)
    }

    /// The node writers should target right now
    pub fn current(&self) -> Arc<BackendNode> {
        Arc::clone(&self.current.read())
    }

    /// Switch the current node. Transactions already open against the previous node are
    /// unaffected; new transactions go to `name`.
    pub fn set_current(&self, name: &str) -> Result<(), NodeError> {
        let node = self
            .node(name)
            .ok_or_else(|| NodeError::UnknownNode(name.to_string()))?;
        let previous = std::mem::replace(&mut *self.current.write(), node);
        if previous.name() != name {
            info!(from = %previous.name(), to = %name, "switched current backend node");
        }
        Ok(())
    }
}
