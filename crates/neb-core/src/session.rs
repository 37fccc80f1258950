//! One live bot identity: protocol client, crypto handle, room cache, sync loop.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    domain::{ClientConfig, Content, EventId, RoomId, UserId, EVENT_ROOM_MESSAGE},
    outbound::EncryptedSender,
    ports::{ClientParts, EventSink, GroupCrypto, ProtocolClient},
    rooms::RoomStateCache,
    service::RoomSender,
    Result,
};

/// Lifecycle of a session's sync loop.
///
/// `Created` → `Running` → `Stopped`; a session built with `sync = false`
/// stays `Created` and only sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Created,
    Running,
    Stopped,
}

pub struct SessionEntry {
    config: ClientConfig,
    client: Arc<dyn ProtocolClient>,
    crypto: Arc<dyn GroupCrypto>,
    rooms: Arc<RoomStateCache>,
    sender: EncryptedSender,
    verification: Vec<Regex>,
    cancel: CancellationToken,
    state: Arc<Mutex<SyncState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    pub fn new(config: ClientConfig, parts: ClientParts) -> Result<Self> {
        let verification = config.verification_patterns()?;
        let rooms = Arc::new(RoomStateCache::new());
        let sender = EncryptedSender::new(parts.client.clone(), parts.crypto.clone(), rooms.clone());
        Ok(Self {
            config,
            client: parts.client,
            crypto: parts.crypto,
            rooms,
            sender,
            verification,
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(SyncState::Created)),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn crypto(&self) -> &Arc<dyn GroupCrypto> {
        &self.crypto
    }

    pub fn rooms(&self) -> &RoomStateCache {
        &self.rooms
    }

    pub fn sync_state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn accepts_verification_from(&self, user: &UserId) -> bool {
        self.verification.iter().any(|re| re.is_match(user.as_str()))
    }

    /// Send an event, encrypting it when the room requires it.
    pub async fn send(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<EventId> {
        self.sender.send(room, event_type, content).await
    }

    /// Spawn the sync loop. Only the first call has an effect.
    pub fn start_sync(&self, sink: Arc<dyn EventSink>, retry: Duration) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }

        set_state(&self.state, SyncState::Running);
        *task = Some(tokio::spawn(run_sync_loop(
            self.config.user_id.clone(),
            self.client.clone(),
            sink,
            self.cancel.clone(),
            self.state.clone(),
            retry,
        )));
    }

    /// Stop the sync loop and wait for it to finish. Idempotent.
    ///
    /// The client is told to stop first so an in-flight sync returns cleanly;
    /// the cancellation token only covers the retry back-off.
    pub async fn stop(&self) {
        self.client.stop_sync();
        self.cancel.cancel();

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(user_id = %self.config.user_id, error = %e, "sync task ended abnormally");
            }
        }
        set_state(&self.state, SyncState::Stopped);
    }
}

#[async_trait]
impl RoomSender for SessionEntry {
    fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    async fn send_content(&self, room: &RoomId, content: &Content) -> Result<EventId> {
        self.send(room, EVENT_ROOM_MESSAGE, content.to_value()?)
            .await
    }
}

fn set_state(state: &Mutex<SyncState>, next: SyncState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

async fn run_sync_loop(
    user_id: UserId,
    client: Arc<dyn ProtocolClient>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    state: Arc<Mutex<SyncState>>,
    retry: Duration,
) {
    info!(user_id = %user_id, "sync loop started");

    loop {
        let res = tokio::select! {
            biased;
            res = client.sync(sink.clone()) => res,
            _ = cancel.cancelled() => break,
        };

        match res {
            Ok(()) => {
                info!(user_id = %user_id, "sync stream ended");
                break;
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    retry_ms = retry.as_millis() as u64,
                    "sync failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }
    }

    set_state(&state, SyncState::Stopped);
    info!(user_id = %user_id, "sync loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SyncEvent;
    use crate::testing::{client_config, FakeClient, FakeCrypto};

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn on_event(&self, _event: SyncEvent) {}
    }

    fn entry(client: &Arc<FakeClient>) -> SessionEntry {
        SessionEntry::new(
            client_config("@bot:x"),
            ClientParts {
                client: client.clone(),
                crypto: Arc::new(FakeCrypto::default()),
            },
        )
        .unwrap()
    }

    async fn wait_for(mut f: impl FnMut() -> bool) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn retries_transient_failures_until_stopped() {
        let client = Arc::new(FakeClient::new("@bot:x"));
        client.fail_next_syncs(2);
        let e = entry(&client);
        assert_eq!(e.sync_state(), SyncState::Created);

        e.start_sync(Arc::new(NullSink), Duration::from_millis(10));
        assert_eq!(e.sync_state(), SyncState::Running);

        wait_for(|| client.running_syncs() == 1).await;
        assert_eq!(client.sync_calls(), 3);
        assert_eq!(e.sync_state(), SyncState::Running);

        e.stop().await;
        assert_eq!(e.sync_state(), SyncState::Stopped);
        assert!(client.is_stopped());
        assert_eq!(client.running_syncs(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_always_lets_the_running_sync_finish() {
        for _ in 0..50 {
            let client = Arc::new(FakeClient::new("@bot:x"));
            let e = entry(&client);
            e.start_sync(Arc::new(NullSink), Duration::from_millis(1));
            wait_for(|| client.running_syncs() == 1).await;

            e.stop().await;
            assert_eq!(client.running_syncs(), 0);
            assert_eq!(e.sync_state(), SyncState::Stopped);
        }
    }

    #[tokio::test]
    async fn clean_end_of_stream_stops_the_loop() {
        let client = Arc::new(FakeClient::new("@bot:x"));
        let e = entry(&client);
        e.start_sync(Arc::new(NullSink), Duration::from_millis(10));
        wait_for(|| client.running_syncs() == 1).await;

        client.stop_sync();
        wait_for(|| e.sync_state() == SyncState::Stopped).await;
        assert_eq!(client.sync_calls(), 1);
    }

    #[tokio::test]
    async fn stopped_entry_cannot_restart() {
        let client = Arc::new(FakeClient::new("@bot:x"));
        let e = entry(&client);
        e.stop().await;
        e.start_sync(Arc::new(NullSink), Duration::from_millis(10));
        assert_eq!(e.sync_state(), SyncState::Stopped);
        assert_eq!(client.sync_calls(), 0);
    }

    #[test]
    fn verification_acceptance_uses_configured_patterns() {
        let client = Arc::new(FakeClient::new("@bot:x"));
        let mut cfg = client_config("@bot:x");
        cfg.accept_verification_from_users = vec![r"@admin:x".to_string(), r"@ops-.*:x".to_string()];
        let e = SessionEntry::new(
            cfg,
            ClientParts {
                client,
                crypto: Arc::new(FakeCrypto::default()),
            },
        )
        .unwrap();

        assert!(e.accepts_verification_from(&UserId::from("@admin:x")));
        assert!(e.accepts_verification_from(&UserId::from("@ops-1:x")));
        assert!(!e.accepts_verification_from(&UserId::from("@eve:x")));
    }
}
