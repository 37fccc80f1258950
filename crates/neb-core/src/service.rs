//! Pluggable services and the catalog that constructs them.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    domain::{Content, EventId, RoomId, ServiceId, ServiceRecord, UserId},
    errors::Error,
    matcher::{Command, Expansion},
    Result,
};

/// Outbound side of a bot identity, as seen by services.
#[async_trait]
pub trait RoomSender: Send + Sync {
    fn user_id(&self) -> &UserId;

    async fn send_content(&self, room: &RoomId, content: &Content) -> Result<EventId>;
}

/// A webhook delivery routed to one service.
#[derive(Clone, Debug, Default)]
pub struct WebhookRequest {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl WebhookResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "message": message.into() }),
        }
    }
}

/// Identity shared by every service variant. Variants embed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceBase {
    pub id: ServiceId,
    pub service_type: String,
    pub user_id: UserId,
    pub rooms: Vec<RoomId>,
}

impl ServiceBase {
    pub fn from_record(record: &ServiceRecord) -> Self {
        Self {
            id: record.id.clone(),
            service_type: record.service_type.clone(),
            user_id: record.user_id.clone(),
            rooms: record.rooms.clone(),
        }
    }

    pub fn is_bound_to(&self, room: &RoomId) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|r| r == room)
    }
}

/// A bot feature: any mix of commands, expansions and webhook handling.
///
/// Every hook has a no-op default so variants implement only what they use.
#[async_trait]
pub trait Service: Send + Sync {
    fn base(&self) -> &ServiceBase;

    fn id(&self) -> &ServiceId {
        &self.base().id
    }

    fn service_type(&self) -> &str {
        &self.base().service_type
    }

    fn commands(&self) -> Vec<Command> {
        Vec::new()
    }

    fn expansions(&self) -> Vec<Expansion> {
        Vec::new()
    }

    async fn handle_webhook(
        &self,
        _request: WebhookRequest,
        _sender: &dyn RoomSender,
    ) -> WebhookResponse {
        WebhookResponse::error(404, "service does not accept webhooks")
    }

    /// Called before the new variant is persisted. An error aborts the configuration.
    async fn register(
        &self,
        _old: Option<&dyn Service>,
        _sender: &dyn RoomSender,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the new variant is persisted; cleans up after `old`.
    async fn post_register(&self, _old: Option<&dyn Service>, _sender: &dyn RoomSender) {}
}

pub type ServiceConstructor = fn(&ServiceRecord) -> Result<Box<dyn Service>>;

/// Service type name → constructor. Built once at startup and never mutated.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    constructors: BTreeMap<&'static str, ServiceConstructor>,
}

impl ServiceCatalog {
    pub fn new(entries: impl IntoIterator<Item = (&'static str, ServiceConstructor)>) -> Self {
        Self {
            constructors: entries.into_iter().collect(),
        }
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    pub fn contains(&self, service_type: &str) -> bool {
        self.constructors.contains_key(service_type)
    }

    pub fn build(&self, record: &ServiceRecord) -> Result<Box<dyn Service>> {
        let ctor = self
            .constructors
            .get(record.service_type.as_str())
            .ok_or_else(|| Error::UnknownServiceType {
                service_type: record.service_type.clone(),
            })?;
        ctor(record)
    }
}
