//! Process-wide registry of the label keys, label values and series fingerprints seen so far.

pub mod reload;

use dashmap::{DashMap, DashSet};
use indexmap::IndexSet;
use parking_lot::RwLock;
use tsingest_types::labels::Label;

/// Deduplicating store of known labels and series.
///
/// Values are kept per label key in first-seen order. The set of all known label keys is held
/// separately from the per-key entries, so no label name can collide with it.
///
/// Labels are only ever added. Merging the same labels again is a no-op.
#[derive(Debug, Default)]
pub struct LabelCache {
    label_values: DashMap<String, IndexSet<String>>,
    label_keys: RwLock<IndexSet<String>>,
    fingerprints: DashSet<u64>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `values` into the entry for label `key`, returning how many were new
    pub fn merge_label_values<I, S>(&self, key: &str, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = match self.label_values.get_mut(key) {
            Some(entry) => entry,
            None => self.label_values.entry(key.to_string()).or_default(),
        };
        let mut added = 0;
        for value in values {
            if entry.insert(value.into()) {
                added += 1;
            }
        }
        added
    }

    /// Merge `keys` into the set of all known label keys, returning how many were new
    pub fn merge_label_keys<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys.into_iter().collect::<Vec<_>>();
        {
            let known = self.label_keys.read();
            if keys.iter().all(|k| known.contains(k.as_ref())) {
                return 0;
            }
        }

        let mut known = self.label_keys.write();
        keys.iter()
            .filter(|k| known.insert(k.as_ref().to_string()))
            .count()
    }

    /// Merge the keys and values of one label set
    pub fn merge_labels(&self, labels: &[Label]) {
        for label in labels {
            self.merge_label_values(&label.key, [label.value.as_str()]);
        }
        self.merge_label_keys(labels.iter().map(|l| l.key.as_str()));
    }

    /// Known values of label `key`, in the order they were first seen
    pub fn label_values(&self, key: &str) -> Vec<String> {
        self.label_values
            .get(key)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All known label keys, in the order they were first seen
    pub fn label_keys(&self) -> Vec<String> {
        self.label_keys.read().iter().cloned().collect()
    }

    /// Record a series fingerprint, returning `true` if it was not known before
    pub fn insert_fingerprint(&self, fingerprint: u64) -> bool {
        self.fingerprints.insert(fingerprint)
    }

    /// Forget a fingerprint whose series could not be queued for writing
    pub fn remove_fingerprint(&self, fingerprint: u64) -> bool {
        self.fingerprints.remove(&fingerprint).is_some()
    }

    pub fn contains_fingerprint(&self, fingerprint: u64) -> bool {
        self.fingerprints.contains(&fingerprint)
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn merge_values_keeps_first_seen_order() {
        let cache = LabelCache::new();
        assert_eq!(cache.merge_label_values("job", ["api", "db"]), 2);
        assert_eq!(cache.merge_label_values("job", ["db", "web", "api"]), 1);
        assert_eq!(cache.label_values("job"), vec!["api", "db", "web"]);
        assert!(cache.label_values("missing").is_empty());
    }

    #[test]
    fn label_keys_do_not_collide_with_values() {
        let cache = LabelCache::new();
        cache.merge_labels(&[Label::new("job", "api"), Label::new("instance", "a:1")]);
        cache.merge_label_values("__all_keys__", ["x"]);

        assert_eq!(cache.label_keys(), vec!["job", "instance"]);
        assert_eq!(cache.label_values("__all_keys__"), vec!["x"]);
        assert_eq!(cache.merge_label_keys(["job", "instance"]), 0);
        assert_eq!(cache.merge_label_keys(["job", "region"]), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let cache = LabelCache::new();
        let labels = [Label::new("job", "api"), Label::new("env", "prod")];
        cache.merge_labels(&labels);
        cache.merge_labels(&labels);

        assert_eq!(cache.label_keys(), vec!["job", "env"]);
        assert_eq!(cache.label_values("job"), vec!["api"]);
        assert_eq!(cache.label_values("env"), vec!["prod"]);
    }

    #[test]
    fn fingerprints() {
        let cache = LabelCache::new();
        assert!(cache.insert_fingerprint(7));
        assert!(!cache.insert_fingerprint(7));
        assert!(cache.contains_fingerprint(7));
        assert!(!cache.contains_fingerprint(8));
        assert_eq!(cache.fingerprint_count(), 1);

        assert!(cache.remove_fingerprint(7));
        assert!(!cache.remove_fingerprint(7));
        assert!(cache.insert_fingerprint(7));
    }

    #[test]
    fn concurrent_merges_lose_nothing() {
        let cache = Arc::new(LabelCache::new());

        let handles = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.merge_labels(&[
                            Label::new("job", format!("job-{}", i % 10)),
                            Label::new(format!("key-{t}"), i.to_string()),
                        ]);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.label_values("job").len(), 10);
        assert_eq!(cache.label_keys().len(), 9);
        for t in 0..8 {
            assert_eq!(cache.label_values(&format!("key-{t}")).len(), 100);
        }
    }
}
