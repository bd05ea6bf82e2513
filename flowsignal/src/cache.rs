use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{hash::Hash, time::Duration};
use tokio::time::Instant;

/// Small in-memory cache whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<FnvHashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Fresh value for `key`. Expired entries are removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((expires, value)) if Instant::now() < *expires => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires = Instant::now() + self.ttl;
        let mut entries = self.entries.lock();
        entries.retain(|_, (expires, _)| Instant::now() < *expires);
        entries.insert(key, (expires, value));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
