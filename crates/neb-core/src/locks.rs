//! Keyed async locks.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A pool handing out one mutual-exclusion guard per key.
#[async_trait]
pub trait KeyedLocks: Send + Sync {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()>;
}

/// One lock per distinct key, created on first use and kept forever.
///
/// Grows with the number of keys ever seen; only suitable for low-cardinality
/// key spaces. Use [`StripedLocks`] otherwise.
#[derive(Default)]
pub struct UnboundedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UnboundedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl KeyedLocks for UnboundedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Fixed pool of locks; keys hash onto stripes.
///
/// Distinct keys may share a stripe and then serialize against each other.
pub struct StripedLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl StripedLocks {
    pub fn new(stripes: usize) -> Self {
        let n = stripes.max(1);
        Self {
            stripes: (0..n).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, key: &str) -> usize {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        (h.finish() % self.stripes.len() as u64) as usize
    }
}

#[async_trait]
impl KeyedLocks for StripedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.stripes[self.stripe(key)].clone().lock_owned().await
    }
}

/// `0` selects the unbounded map, anything else a striped pool of that size.
pub fn lock_pool(stripes: usize) -> Arc<dyn KeyedLocks> {
    if stripes == 0 {
        Arc::new(UnboundedLocks::new())
    } else {
        Arc::new(StripedLocks::new(stripes))
    }
}
