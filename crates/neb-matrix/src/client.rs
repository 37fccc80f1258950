use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use neb_core::{
    domain::{ClientConfig, EventId, RoomId, UserId},
    errors::Error,
    ports::{EventSink, ProtocolClient},
    Result,
};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sync::parse_sync;

const API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];

/// Client-server API connection for one bot identity.
pub struct MatrixClient {
    user_id: UserId,
    base: Url,
    access_token: String,
    http: reqwest::Client,
    sync_timeout: Duration,
    stop: CancellationToken,
    since: Mutex<Option<String>>,
    txn_prefix: u128,
    txn_counter: AtomicU64,
}

impl MatrixClient {
    pub fn new(config: &ClientConfig, http: reqwest::Client, sync_timeout: Duration) -> Result<Self> {
        let base = Url::parse(config.homeserver_url.trim_end_matches('/')).map_err(|e| {
            Error::Validation(format!(
                "invalid homeserver_url {:?}: {e}",
                config.homeserver_url
            ))
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::Validation(format!(
                "homeserver_url {:?} cannot be a base URL",
                config.homeserver_url
            )));
        }

        let txn_prefix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Ok(Self {
            user_id: config.user_id.clone(),
            base,
            access_token: config.access_token.clone(),
            http,
            sync_timeout,
            stop: CancellationToken::new(),
            since: Mutex::new(None),
            txn_prefix,
            txn_counter: AtomicU64::new(0),
        })
    }

    /// `<homeserver>/_matrix/client/v3/<segments...>`, each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        url
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("neb{}.{n}", self.txn_prefix)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<(StatusCode, Value)> {
        let what = format!("{method} {}", url.path());
        let mut req = self
            .http
            .request(method, url)
            .bearer_auth(self.access_token.trim());
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Protocol(format!("{what} failed: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let value = serde_json::from_str(&text).unwrap_or(Value::Null);
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok((status, value));
        }

        let detail = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| text.chars().take(300).collect());
        Err(Error::Protocol(format!("{what}: HTTP {status} {detail}")))
    }

    async fn request_ok(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        let what = format!("{method} {}", url.path());
        let (status, v) = self.request(method, url, body, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(Error::Protocol(format!("{what}: HTTP 404")));
        }
        Ok(v)
    }
}

#[async_trait]
impl ProtocolClient for MatrixClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn sync(&self, sink: Arc<dyn EventSink>) -> Result<()> {
        loop {
            let since = self.since.lock().await.clone();
            let initial = since.is_none();
            let timeout_ms = if initial {
                0
            } else {
                self.sync_timeout.as_millis() as u64
            };

            let mut url = self.endpoint(&["sync"]);
            url.query_pairs_mut()
                .append_pair("timeout", &timeout_ms.to_string());
            if let Some(since) = since.as_deref() {
                url.query_pairs_mut().append_pair("since", since);
            }

            let (status, payload) = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Ok(()),
                res = self.request(
                    Method::GET,
                    url,
                    None,
                    Some(self.sync_timeout + Duration::from_secs(30)),
                ) => res?,
            };
            if status == StatusCode::NOT_FOUND {
                return Err(Error::Protocol("sync endpoint not found".to_string()));
            }
            let batch = parse_sync(&payload, &self.user_id, initial)?;

            debug!(
                user_id = %self.user_id,
                events = batch.events.len(),
                initial,
                "sync batch"
            );
            for ev in batch.events {
                sink.on_event(ev).await;
            }
            *self.since.lock().await = Some(batch.next_batch);

            if self.stop.is_cancelled() {
                return Ok(());
            }
        }
    }

    fn stop_sync(&self) {
        self.stop.cancel();
    }

    async fn send_event(&self, room: &RoomId, event_type: &str, content: Value) -> Result<EventId> {
        let txn = self.next_txn_id();
        let url = self.endpoint(&["rooms", room.as_str(), "send", event_type, &txn]);
        let v = self
            .request_ok(Method::PUT, url, Some(&content))
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;
        v.get("event_id")
            .and_then(Value::as_str)
            .map(EventId::new)
            .ok_or_else(|| Error::Delivery("send response missing event_id".to_string()))
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>> {
        let url = self.endpoint(&["rooms", room.as_str(), "joined_members"]);
        let v = self.request_ok(Method::GET, url, None).await?;
        Ok(v.get("joined")
            .and_then(Value::as_object)
            .map(|m| m.keys().map(|k| UserId::new(k.as_str())).collect())
            .unwrap_or_default())
    }

    async fn is_encrypted(&self, room: &RoomId) -> Result<bool> {
        let url = self.endpoint(&["rooms", room.as_str(), "state", "m.room.encryption", ""]);
        let (status, v) = self.request(Method::GET, url, None, None).await?;
        Ok(status != StatusCode::NOT_FOUND && v.get("algorithm").is_some())
    }

    async fn join_room(&self, room: &RoomId) -> Result<()> {
        let url = self.endpoint(&["join", room.as_str()]);
        self.request_ok(Method::POST, url, Some(&serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn set_display_name(&self, name: &str) -> Result<()> {
        let url = self.endpoint(&["profile", self.user_id.as_str(), "displayname"]);
        self.request_ok(
            Method::PUT,
            url,
            Some(&serde_json::json!({ "displayname": name })),
        )
        .await?;
        Ok(())
    }
}
