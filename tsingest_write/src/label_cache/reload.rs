//! Refilling the [`LabelCache`] from the series already persisted on the current node.

use futures::StreamExt;
use observability_deps::tracing::{error, info, warn};
use tsingest_backend::{BackendError, node::NodeRegistry};
use tsingest_types::{RecordKind, labels::labels_from_json};

use super::LabelCache;

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("backend node {node} is offline")]
    NodeOffline { node: String },

    #[error("failed to query persisted series: {0}")]
    Query(#[source] BackendError),
}

/// What one reload added to the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Rows read from the backend, including skipped ones
    pub rows: usize,
    /// Rows that could not be read or whose labels could not be parsed
    pub skipped: usize,
    pub new_fingerprints: usize,
}

impl LabelCache {
    /// Scan every persisted (fingerprint, labels) pair of the current node's time series table
    /// and merge them into the cache.
    ///
    /// Rows that fail to scan or parse are logged and skipped; everything merged before a
    /// failure stays in the cache.
    pub async fn reload(&self, registry: &NodeRegistry) -> Result<ReloadSummary, ReloadError> {
        let node = registry.current();
        if !node.is_online() {
            warn!(node = %node.name(), "not reloading label cache, backend node is offline");
            return Err(ReloadError::NodeOffline {
                node: node.name().to_string(),
            });
        }

        let table = node.table_for(RecordKind::TimeSeries);
        let mut rows = node.backend().scan_series(table).await.map_err(|e| {
            error!(node = %node.name(), %table, %e, "failed to query persisted series");
            ReloadError::Query(e)
        })?;

        let mut summary = ReloadSummary::default();
        while let Some(row) = rows.next().await {
            summary.rows += 1;

            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(node = %node.name(), %e, "failed to read series row");
                    summary.skipped += 1;
                    continue;
                }
            };
            let labels = match labels_from_json(&row.labels) {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(
                        node = %node.name(),
                        fingerprint = row.fingerprint,
                        %e,
                        "skipping series with unparsable labels"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            self.merge_labels(&labels);
            if self.insert_fingerprint(row.fingerprint) {
                summary.new_fingerprints += 1;
            }
        }

        info!(
            node = %node.name(),
            rows = summary.rows,
            skipped = summary.skipped,
            new_fingerprints = summary.new_fingerprints,
            "reloaded label cache"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::online_registry;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tsingest_backend::{SeriesRow, mock::MockBackend};

    fn row(fingerprint: u64, labels: &str) -> Result<SeriesRow, String> {
        Ok(SeriesRow {
            fingerprint,
            labels: labels.to_string(),
        })
    }

    #[test_log::test(tokio::test)]
    async fn merges_persisted_series() {
        let backend = Arc::new(MockBackend::default().with_series(vec![
            row(1, r#"{"job":"api","env":"prod"}"#),
            row(2, r#"{"job":"db","env":"prod"}"#),
        ]));
        let registry = online_registry(&backend);
        let cache = LabelCache::new();

        let summary = cache.reload(&registry).await.unwrap();
        assert_eq!(
            summary,
            ReloadSummary {
                rows: 2,
                skipped: 0,
                new_fingerprints: 2
            }
        );
        assert_eq!(cache.label_keys(), vec!["env", "job"]);
        assert_eq!(cache.label_values("job"), vec!["api", "db"]);
        assert_eq!(cache.label_values("env"), vec!["prod"]);
        assert!(cache.contains_fingerprint(1));
        assert!(cache.contains_fingerprint(2));
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let backend = Arc::new(
            MockBackend::default().with_series(vec![row(1, r#"{"job":"api"}"#)]),
        );
        let registry = online_registry(&backend);
        let cache = LabelCache::new();

        cache.reload(&registry).await.unwrap();
        let summary = cache.reload(&registry).await.unwrap();
        assert_eq!(summary.new_fingerprints, 0);
        assert_eq!(cache.label_values("job"), vec!["api"]);
        assert_eq!(cache.label_keys(), vec!["job"]);
    }

    #[test_log::test(tokio::test)]
    async fn bad_rows_are_skipped() {
        let backend = Arc::new(MockBackend::default().with_series(vec![
            row(1, r#"{"job":"api"}"#),
            Err("connection reset".to_string()),
            row(2, "not json"),
            row(3, r#"{"job":7}"#),
            row(4, r#"{"job":"web"}"#),
        ]));
        let registry = online_registry(&backend);
        let cache = LabelCache::new();

        let summary = cache.reload(&registry).await.unwrap();
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.new_fingerprints, 2);
        assert_eq!(cache.label_values("job"), vec!["api", "web"]);
        assert!(!cache.contains_fingerprint(2));
    }

    #[tokio::test]
    async fn offline_node_is_an_error() {
        let backend = Arc::new(
            MockBackend::default().with_series(vec![row(1, r#"{"job":"api"}"#)]),
        );
        let registry = online_registry(&backend);
        registry.current().set_online(false);
        let cache = LabelCache::new();

        let err = cache.reload(&registry).await.unwrap_err();
        assert!(matches!(err, ReloadError::NodeOffline { node } if node == "node-0"));
        assert!(cache.label_keys().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn query_failure_is_an_error() {
        let backend = Arc::new(MockBackend::default());
        backend.set_fail_scan(true);
        let registry = online_registry(&backend);
        let cache = LabelCache::new();

        let err = cache.reload(&registry).await.unwrap_err();
        assert!(matches!(
            err,
            ReloadError::Query(BackendError::Server { code: 60, .. })
        ));
    }
}
