use std::sync::Mutex;

use async_trait::async_trait;

use super::{Records, Store};
use crate::{
    domain::{ClientConfig, ServiceId, ServiceRecord, UserId},
    Result,
};

/// Ephemeral store; everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Records) -> T) -> T {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_client_config(&self, user_id: &UserId) -> Result<Option<ClientConfig>> {
        Ok(self.with(|r| r.client(user_id)))
    }

    async fn store_client_config(&self, config: ClientConfig) -> Result<Option<ClientConfig>> {
        Ok(self.with(|r| r.put_client(config)))
    }

    async fn load_client_configs(&self) -> Result<Vec<ClientConfig>> {
        Ok(self.with(|r| r.clients.clone()))
    }

    async fn load_service(&self, id: &ServiceId) -> Result<Option<ServiceRecord>> {
        Ok(self.with(|r| r.service(id)))
    }

    async fn load_services_for_user(&self, user_id: &UserId) -> Result<Vec<ServiceRecord>> {
        Ok(self.with(|r| r.services_for(user_id)))
    }

    async fn store_service(&self, record: ServiceRecord) -> Result<Option<ServiceRecord>> {
        Ok(self.with(|r| r.put_service(record)))
    }

    async fn load_services(&self) -> Result<Vec<ServiceRecord>> {
        Ok(self.with(|r| r.services.clone()))
    }
}
