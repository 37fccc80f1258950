//! Live bot identities, created lazily and replaced atomically.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    dispatch::{Dispatcher, EntrySink},
    domain::{ClientConfig, UserId},
    errors::Error,
    ports::ClientFactory,
    session::SessionEntry,
    store::Store,
    Result,
};

/// Outcome of [`ClientRegistry::update`].
pub struct ClientUpdate {
    pub old: Option<ClientConfig>,
    pub new: ClientConfig,
    /// `None` when an unchanged send-only identity has not been built yet.
    pub entry: Option<Arc<SessionEntry>>,
}

pub struct ClientRegistry {
    store: Arc<dyn Store>,
    factory: Arc<dyn ClientFactory>,
    dispatcher: Arc<Dispatcher>,
    sync_retry: Duration,
    entries: RwLock<HashMap<UserId, Arc<SessionEntry>>>,
    // Held across every create and replace so each identity has one live entry.
    create_lock: Mutex<()>,
}

impl ClientRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        factory: Arc<dyn ClientFactory>,
        dispatcher: Arc<Dispatcher>,
        sync_retry: Duration,
    ) -> Self {
        Self {
            store,
            factory,
            dispatcher,
            sync_retry,
            entries: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Cached entry only; never touches the store.
    pub fn get(&self, user_id: &UserId) -> Option<Arc<SessionEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live entry for `user_id`, building it from the stored config on first use.
    pub async fn get_or_create(&self, user_id: &UserId) -> Result<Arc<SessionEntry>> {
        if let Some(entry) = self.get(user_id) {
            return Ok(entry);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(entry) = self.get(user_id) {
            return Ok(entry);
        }

        let config = self
            .store
            .load_client_config(user_id)
            .await?
            .ok_or_else(|| Error::NotConfigured {
                user_id: user_id.to_string(),
            })?;

        let entry = self.build(config).await?;
        if entry.config().sync {
            self.start(&entry);
        }
        self.insert(entry.clone());
        info!(user_id = %user_id, "client created");
        Ok(entry)
    }

    /// Replace the identity's config and live client.
    ///
    /// The new config is persisted before the old client stops and the cache only
    /// points at the new entry once it is running.
    pub async fn update(&self, config: ClientConfig) -> Result<ClientUpdate> {
        config.validate()?;
        let _guard = self.create_lock.lock().await;

        let current = self.get(&config.user_id);
        if let Some(entry) = current.as_ref() {
            if entry.config() == &config {
                return Ok(ClientUpdate {
                    old: Some(config.clone()),
                    new: config,
                    entry: Some(entry.clone()),
                });
            }
        } else if self.store.load_client_config(&config.user_id).await?.as_ref() == Some(&config) {
            // Stored but not live: keep the record, only bring up a syncing identity.
            let entry = if config.sync {
                let entry = self.build(config.clone()).await?;
                self.start(&entry);
                self.insert(entry.clone());
                info!(user_id = %config.user_id, "client created");
                Some(entry)
            } else {
                None
            };
            return Ok(ClientUpdate {
                old: Some(config.clone()),
                new: config,
                entry,
            });
        }

        let entry = self.build(config.clone()).await?;

        let old_name = current
            .as_ref()
            .and_then(|e| e.config().display_name.clone());
        if let Some(name) = config.display_name.as_deref() {
            if old_name.as_deref() != Some(name) {
                if let Err(e) = entry.client().set_display_name(name).await {
                    warn!(user_id = %config.user_id, error = %e, "failed to set display name");
                }
            }
        }

        let old = match self.store.store_client_config(config.clone()).await {
            Ok(old) => old,
            Err(e) => {
                error!(user_id = %config.user_id, error = %e, "failed to persist client config");
                entry.stop().await;
                return Err(e);
            }
        };

        if let Some(prev) = current.as_ref() {
            prev.stop().await;
        }
        if config.sync {
            self.start(&entry);
        }
        self.insert(entry.clone());

        info!(
            user_id = %config.user_id,
            replaced = current.is_some(),
            sync = config.sync,
            "client updated"
        );
        Ok(ClientUpdate {
            old,
            new: config,
            entry: Some(entry),
        })
    }

    /// Bring up every stored identity that syncs. Send-only identities are
    /// built on first use. One failure does not stop the rest.
    pub async fn start_all(&self) -> Result<usize> {
        let configs = self.store.load_client_configs().await?;
        let mut started = 0;
        for config in configs.into_iter().filter(|c| c.sync) {
            match self.get_or_create(&config.user_id).await {
                Ok(_) => started += 1,
                Err(e) => {
                    error!(user_id = %config.user_id, error = %e, "failed to start client")
                }
            }
        }
        Ok(started)
    }

    /// Stop every live entry and empty the cache.
    pub async fn shutdown(&self) {
        let _guard = self.create_lock.lock().await;
        let entries: Vec<Arc<SessionEntry>> = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, v)| v)
            .collect();
        for entry in entries {
            entry.stop().await;
        }
        info!("all clients stopped");
    }

    async fn build(&self, config: ClientConfig) -> Result<Arc<SessionEntry>> {
        let parts = self.factory.create(&config).await?;
        Ok(Arc::new(SessionEntry::new(config, parts)?))
    }

    fn start(&self, entry: &Arc<SessionEntry>) {
        let sink = Arc::new(EntrySink::new(entry, self.dispatcher.clone()));
        entry.start_sync(sink, self.sync_retry);
    }

    fn insert(&self, entry: Arc<SessionEntry>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.user_id().clone(), entry);
    }
}
