use std::{collections::HashMap, hash::Hash, time::Duration};
use tokio::{sync::RwLock, time::Instant};

/// Read-mostly map whose entries expire `ttl` after insertion.
///
/// Expired entries are never returned; they are dropped lazily on the next
/// write.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let read = self.entries.read().await;
        match read.get(key) {
            Some((loaded_at, value)) if loaded_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut write = self.entries.write().await;
        let ttl = self.ttl;
        write.retain(|_, (loaded_at, _)| loaded_at.elapsed() < ttl);
        write.insert(key, (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Entries held in memory, expired ones not yet dropped included.
    pub async fn stored_len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Number of entries that would still be served.
    pub async fn live_len(&self) -> usize {
        let read = self.entries.read().await;
        read.values()
            .filter(|(loaded_at, _)| loaded_at.elapsed() < self.ttl)
            .count()
    }
}
