//! Background liveness checks for the registered backend nodes.

use std::{sync::Arc, time::Duration};

use observability_deps::tracing::{debug, error, info, warn};

use crate::{BackendError, node::NodeRegistry};

/// Pings every registered node and records whether it answered.
///
/// This is the only writer of [`BackendNode`][crate::node::BackendNode] online flags.
#[derive(Debug)]
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Probe each node once, in registration order, updating its online flag
    pub async fn check_nodes(&self) {
        for node in self.registry.nodes() {
            debug!(node = %node.name(), "checking backend node");

            match node.backend().ping().await {
                Ok(()) => {
                    debug!(node = %node.name(), "node is online");
                    if !node.set_online(true) {
                        info!(node = %node.name(), "backend node is back online");
                    }
                }
                Err(e) => {
                    debug!(node = %node.name(), "node is offline");
                    if node.set_online(false) {
                        warn!(node = %node.name(), "backend node went offline");
                    }
                    match &e {
                        BackendError::Server {
                            code,
                            message,
                            stack_trace,
                        } => error!(
                            node = %node.name(),
                            code,
                            %message,
                            %stack_trace,
                            "backend ping failed with server exception"
                        ),
                        _ => debug!(node = %node.name(), %e, "backend ping failed"),
                    }
                }
            }
        }
    }

    /// Run [`HealthMonitor::check_nodes`] on every tick of `interval`, starting immediately
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                self.check_nodes().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::MockBackend,
        node::{BackendNode, NodeTables},
    };

    fn registry(backends: &[Arc<MockBackend>]) -> Arc<NodeRegistry> {
        Arc::new(
            NodeRegistry::new(backends.iter().enumerate().map(|(i, b)| {
                BackendNode::new(
                    format!("node-{i}"),
                    NodeTables::new("time_series", "samples"),
                    Arc::clone(b) as _,
                )
            }))
            .unwrap(),
        )
    }

    #[test_log::test(tokio::test)]
    async fn marks_each_node_by_ping_result() {
        let up = Arc::new(MockBackend::default());
        let down = Arc::new(MockBackend::default());
        down.set_reachable(false);
        let exception = Arc::new(MockBackend::default());
        exception.set_ping_exception(210, "Connection refused");

        let registry = registry(&[Arc::clone(&up), Arc::clone(&down), Arc::clone(&exception)]);
        let monitor = HealthMonitor::new(Arc::clone(&registry));
        monitor.check_nodes().await;

        let online: Vec<bool> = registry.nodes().iter().map(|n| n.is_online()).collect();
        assert_eq!(online, vec![true, false, false]);
        assert_eq!(up.ping_count(), 1);
        assert_eq!(down.ping_count(), 1);
        assert_eq!(exception.ping_count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn node_recovers_on_next_check() {
        let backend = Arc::new(MockBackend::default());
        backend.set_reachable(false);
        let registry = registry(&[Arc::clone(&backend)]);
        let monitor = HealthMonitor::new(Arc::clone(&registry));

        monitor.check_nodes().await;
        assert!(!registry.current().is_online());

        backend.set_reachable(true);
        monitor.check_nodes().await;
        assert!(registry.current().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_checks_on_interval() {
        let backend = Arc::new(MockBackend::default());
        let registry = registry(&[Arc::clone(&backend)]);
        let monitor = Arc::new(HealthMonitor::new(Arc::clone(&registry)));

        let handle = Arc::clone(&monitor).spawn(Duration::from_secs(1));

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.ping_count(), 1);
        assert!(registry.current().is_online());

        backend.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.ping_count(), 2);
        assert!(!registry.current().is_online());

        handle.abort();
    }
}
