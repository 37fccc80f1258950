//! Administrative operations: identity and service configuration, webhooks.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    domain::{ClientConfig, ServiceId, ServiceRecord},
    errors::Error,
    guard::ServiceConfigGuard,
    registry::ClientRegistry,
    service::{RoomSender, ServiceCatalog, WebhookRequest, WebhookResponse},
    store::Store,
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ClientChange {
    pub old: Option<ClientConfig>,
    pub new: ClientConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceChange {
    pub old: Option<ServiceRecord>,
    pub new: ServiceRecord,
}

pub struct Admin {
    store: Arc<dyn Store>,
    registry: Arc<ClientRegistry>,
    catalog: Arc<ServiceCatalog>,
    guard: ServiceConfigGuard,
}

impl Admin {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ClientRegistry>,
        catalog: Arc<ServiceCatalog>,
        guard: ServiceConfigGuard,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            guard,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub async fn configure_client(&self, config: ClientConfig) -> Result<ClientChange> {
        let update = self.registry.update(config).await?;
        Ok(ClientChange {
            old: update.old,
            new: update.new,
        })
    }

    /// Create or replace a service.
    ///
    /// The old and new variants are registered and persisted under the
    /// service's lock; a failed `register` leaves storage untouched.
    pub async fn configure_service(&self, record: ServiceRecord) -> Result<ServiceChange> {
        record.validate()?;
        let new_service = self.catalog.build(&record)?;

        self.guard
            .with_service_lock(&record.id, || async {
                let old_record = self.store.load_service(&record.id).await?;
                if let Some(old) = old_record.as_ref() {
                    if old.user_id != record.user_id {
                        return Err(Error::Validation(format!(
                            "service {} belongs to {}, cannot move it to {}",
                            record.id, old.user_id, record.user_id
                        )));
                    }
                }
                let old_service = match old_record.as_ref().map(|r| self.catalog.build(r)) {
                    Some(Ok(svc)) => Some(svc),
                    Some(Err(e)) => {
                        warn!(service_id = %record.id, error = %e, "previous variant unloadable");
                        None
                    }
                    None => None,
                };

                let entry = self.registry.get_or_create(&record.user_id).await?;
                let sender: &dyn RoomSender = &*entry;

                new_service
                    .register(old_service.as_deref(), sender)
                    .await
                    .map_err(|e| Error::Registration(format!("{e:#}")))?;

                self.store.store_service(record.clone()).await?;
                new_service
                    .post_register(old_service.as_deref(), sender)
                    .await;

                info!(
                    service_id = %record.id,
                    service_type = %record.service_type,
                    user_id = %record.user_id,
                    replaced = old_record.is_some(),
                    "service configured"
                );
                Ok(ServiceChange {
                    old: old_record,
                    new: record.clone(),
                })
            })
            .await
    }

    /// Route an inbound webhook to the service it is addressed to.
    pub async fn deliver_webhook(
        &self,
        service_id: &ServiceId,
        request: WebhookRequest,
    ) -> Result<WebhookResponse> {
        let record = self
            .store
            .load_service(service_id)
            .await?
            .ok_or_else(|| Error::UnknownService {
                service_id: service_id.to_string(),
            })?;
        let service = self.catalog.build(&record)?;
        let entry = self.registry.get_or_create(&record.user_id).await?;
        Ok(service.handle_webhook(request, &*entry).await)
    }

    pub async fn services(&self) -> Result<Vec<ServiceRecord>> {
        self.store.load_services().await
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
