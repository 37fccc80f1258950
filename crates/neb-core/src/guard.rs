use std::{future::Future, sync::Arc};

use tracing::debug;

use crate::{domain::ServiceId, locks::KeyedLocks};

/// Serializes configuration of the same service id; other ids run in parallel.
#[derive(Clone)]
pub struct ServiceConfigGuard {
    locks: Arc<dyn KeyedLocks>,
}

impl ServiceConfigGuard {
    pub fn new(locks: Arc<dyn KeyedLocks>) -> Self {
        Self { locks }
    }

    /// Run `f` while holding the lock for `service_id`.
    pub async fn with_service_lock<F, Fut, T>(&self, service_id: &ServiceId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.locks.lock(service_id.as_str()).await;
        debug!(service_id = %service_id, "service config lock acquired");
        f().await
    }
}
