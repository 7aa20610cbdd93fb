use rand::Rng;

/// Maps write calls onto one of a fixed set of shards.
///
/// Direct submissions carry no key and are spread uniformly at random over all shards, so a
/// producer's consecutive calls may land on different shards and commit in any relative order.
/// Keyed submissions always map the same fingerprint to the same shard, which preserves the
/// order of writes to a single series.
#[derive(Debug)]
pub(crate) struct Router<T> {
    shards: Vec<T>,
}

impl<T> Router<T> {
    pub(crate) fn new(shards: impl IntoIterator<Item = T>) -> Self {
        Self {
            shards: shards.into_iter().collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    /// A uniformly chosen shard, or `None` if there are none
    pub(crate) fn random(&self) -> Option<&T> {
        if self.shards.is_empty() {
            return None;
        }
        // the thread rng is not Send, keep it out of any await
        let idx = rand::thread_rng().gen_range(0..self.shards.len());
        self.shards.get(idx)
    }

    pub(crate) fn for_fingerprint(&self, fingerprint: u64) -> Option<&T> {
        if self.shards.is_empty() {
            return None;
        }
        let idx = (fingerprint % self.shards.len() as u64) as usize;
        self.shards.get(idx)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.shards.get(idx)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.shards.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn random_covers_every_shard() {
        let router = Router::new(0..4);

        let mut seen: HashMap<usize, usize> = HashMap::new();
        for _ in 0..10_000 {
            *seen.entry(*router.random().unwrap()).or_default() += 1;
        }

        // Each shard should get roughly 2500; 1500 is far outside any plausible variance
        assert_eq!(seen.len(), 4);
        for (shard, hits) in seen {
            assert!(hits > 1_500, "shard {shard} only hit {hits} times");
        }
    }

    #[test]
    fn single_shard_always_chosen() {
        let router = Router::new(["only"]);
        for _ in 0..100 {
            assert_eq!(router.random(), Some(&"only"));
        }
    }

    #[test]
    fn fingerprint_is_stable() {
        let router = Router::new(0..3);
        assert_eq!(router.for_fingerprint(7), Some(&1));
        assert_eq!(router.for_fingerprint(7), Some(&1));
        assert_eq!(router.for_fingerprint(u64::MAX), Some(&0));
    }

    #[test]
    fn empty_router() {
        let router = Router::<usize>::new([]);
        assert_eq!(router.len(), 0);
        assert_eq!(router.random(), None);
        assert_eq!(router.for_fingerprint(1), None);
    }
}
