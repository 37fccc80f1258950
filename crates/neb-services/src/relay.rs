//! Webhook relay: posts inbound webhook text as a notice into every bound room.

use async_trait::async_trait;
use neb_core::{
    domain::{Content, RoomId, ServiceRecord},
    errors::Error,
    service::{RoomSender, Service, ServiceBase, WebhookRequest, WebhookResponse},
    Result,
};
use serde::Deserialize;
use tracing::{info, warn};

pub const SERVICE_TYPE: &str = "relay";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelayConfig {
    /// Prepended to every relayed message, e.g. `"[ci]"`.
    #[serde(default)]
    pub prefix: Option<String>,
}

pub struct RelayService {
    base: ServiceBase,
    config: RelayConfig,
}

pub fn build(record: &ServiceRecord) -> Result<Box<dyn Service>> {
    let config = if record.config.is_null() {
        RelayConfig::default()
    } else {
        serde_json::from_value(record.config.clone())
            .map_err(|e| Error::Validation(format!("relay config: {e}")))?
    };
    Ok(Box::new(RelayService {
        base: ServiceBase::from_record(record),
        config,
    }))
}

impl RelayService {
    fn message(&self, request: &WebhookRequest) -> Option<String> {
        let text = match request.json() {
            Some(serde_json::Value::Object(map)) => map
                .get("text")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)?,
            _ => request.body_text(),
        };
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(match self.config.prefix.as_deref() {
            Some(p) if !p.is_empty() => format!("{p} {text}"),
            _ => text.to_string(),
        })
    }
}

#[async_trait]
impl Service for RelayService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    async fn handle_webhook(
        &self,
        request: WebhookRequest,
        sender: &dyn RoomSender,
    ) -> WebhookResponse {
        if !request.method.eq_ignore_ascii_case("POST") {
            return WebhookResponse::error(405, "relay only accepts POST");
        }
        let Some(text) = self.message(&request) else {
            return WebhookResponse::error(400, "nothing to relay");
        };

        let content = Content::notice(text);
        let mut delivered = 0usize;
        let mut failed = Vec::new();
        for room in &self.base.rooms {
            match sender.send_content(room, &content).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(service_id = %self.base.id, room_id = %room, error = %e, "relay delivery failed");
                    failed.push(room.to_string());
                }
            }
        }

        if delivered == 0 && !failed.is_empty() {
            return WebhookResponse::error(502, format!("delivery failed to {}", failed.join(", ")));
        }
        WebhookResponse::ok(serde_json::json!({ "delivered": delivered, "failed": failed }))
    }

    async fn register(
        &self,
        _old: Option<&dyn Service>,
        _sender: &dyn RoomSender,
    ) -> anyhow::Result<()> {
        if self.base.rooms.is_empty() {
            anyhow::bail!("relay needs at least one room");
        }
        Ok(())
    }

    async fn post_register(&self, old: Option<&dyn Service>, _sender: &dyn RoomSender) {
        let Some(old) = old else {
            return;
        };
        let dropped: Vec<&RoomId> = old
            .base()
            .rooms
            .iter()
            .filter(|r| !self.base.rooms.contains(r))
            .collect();
        if !dropped.is_empty() {
            info!(
                service_id = %self.base.id,
                dropped = ?dropped,
                "relay no longer posts to some rooms"
            );
        }
    }
}
