//! Persistence of identity and service configuration.

use async_trait::async_trait;

use crate::{
    domain::{ClientConfig, ServiceId, ServiceRecord, UserId},
    Result,
};

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Key/value storage of configuration records.
///
/// Every call is atomic on its own; callers never rely on cross-call
/// transactions. Services are returned in the order they were first stored.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_client_config(&self, user_id: &UserId) -> Result<Option<ClientConfig>>;

    /// Insert or replace, returning the previous record.
    async fn store_client_config(&self, config: ClientConfig) -> Result<Option<ClientConfig>>;

    async fn load_client_configs(&self) -> Result<Vec<ClientConfig>>;

    async fn load_service(&self, id: &ServiceId) -> Result<Option<ServiceRecord>>;

    async fn load_services_for_user(&self, user_id: &UserId) -> Result<Vec<ServiceRecord>>;

    /// Insert or replace, returning the previous record.
    async fn store_service(&self, record: ServiceRecord) -> Result<Option<ServiceRecord>>;

    async fn load_services(&self) -> Result<Vec<ServiceRecord>>;
}

/// The in-memory shape shared by both store implementations.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Records {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

impl Records {
    pub fn client(&self, user_id: &UserId) -> Option<ClientConfig> {
        self.clients.iter().find(|c| &c.user_id == user_id).cloned()
    }

    pub fn put_client(&mut self, config: ClientConfig) -> Option<ClientConfig> {
        match self.clients.iter_mut().find(|c| c.user_id == config.user_id) {
            Some(slot) => Some(std::mem::replace(slot, config)),
            None => {
                self.clients.push(config);
                None
            }
        }
    }

    pub fn service(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.services.iter().find(|s| &s.id == id).cloned()
    }

    pub fn services_for(&self, user_id: &UserId) -> Vec<ServiceRecord> {
        self.services
            .iter()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Replacing keeps the record's original position so registration order is stable.
    pub fn put_service(&mut self, record: ServiceRecord) -> Option<ServiceRecord> {
        match self.services.iter_mut().find(|s| s.id == record.id) {
            Some(slot) => Some(std::mem::replace(slot, record)),
            None => {
                self.services.push(record);
                None
            }
        }
    }
}
