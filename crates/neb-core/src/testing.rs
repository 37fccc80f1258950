//! Hand-written fakes for the core ports.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ClientConfig, EventId, RoomId, UserId, MSGTYPE_TEXT},
    errors::Error,
    events::{EncryptedEvent, RoomMessage, SyncEvent},
    ports::{
        ClientFactory, ClientParts, EventSink, GroupCrypto, OutboundSession, ProtocolClient,
        RotationPolicy,
    },
    Result,
};

pub struct FakeClient {
    user_id: UserId,
    stop: CancellationToken,
    sent: Mutex<Vec<(RoomId, String, serde_json::Value)>>,
    encrypted: Mutex<HashMap<RoomId, bool>>,
    members: Mutex<HashMap<RoomId, Vec<UserId>>>,
    pending: Mutex<VecDeque<SyncEvent>>,
    joined: Mutex<Vec<RoomId>>,
    display_names: Mutex<Vec<String>>,
    fail_members: AtomicBool,
    fail_send: AtomicBool,
    fail_display_name: AtomicBool,
    sync_failures: AtomicUsize,
    sync_calls: AtomicUsize,
    running: AtomicUsize,
    next_event: AtomicUsize,
}

impl FakeClient {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: UserId::from(user_id),
            stop: CancellationToken::new(),
            sent: Mutex::new(Vec::new()),
            encrypted: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            joined: Mutex::new(Vec::new()),
            display_names: Mutex::new(Vec::new()),
            fail_members: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_display_name: AtomicBool::new(false),
            sync_failures: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            next_event: AtomicUsize::new(1),
        }
    }

    pub fn sent(&self) -> Vec<(RoomId, String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, _, c)| c["body"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn set_encrypted(&self, room: &RoomId, encrypted: bool) {
        self.encrypted
            .lock()
            .unwrap()
            .insert(room.clone(), encrypted);
    }

    pub fn set_members(&self, room: &RoomId, members: &[&str]) {
        self.members.lock().unwrap().insert(
            room.clone(),
            members.iter().map(|m| UserId::from(*m)).collect(),
        );
    }

    pub fn push_event(&self, event: SyncEvent) {
        self.pending.lock().unwrap().push_back(event);
    }

    pub fn joined(&self) -> Vec<RoomId> {
        self.joined.lock().unwrap().clone()
    }

    pub fn display_names(&self) -> Vec<String> {
        self.display_names.lock().unwrap().clone()
    }

    pub fn fail_members(&self, v: bool) {
        self.fail_members.store(v, Ordering::SeqCst);
    }

    pub fn fail_send(&self, v: bool) {
        self.fail_send.store(v, Ordering::SeqCst);
    }

    pub fn fail_display_name(&self, v: bool) {
        self.fail_display_name.store(v, Ordering::SeqCst);
    }

    /// The next `n` calls to `sync` fail with a protocol error.
    pub fn fail_next_syncs(&self, n: usize) {
        self.sync_failures.store(n, Ordering::SeqCst);
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn running_syncs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

// Counts a sync call as running until its future completes or is dropped.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn sync(&self, sink: Arc<dyn EventSink>) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .sync_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Protocol("sync connection reset".to_string()));
        }

        self.running.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            match next {
                Some(ev) => sink.on_event(ev).await,
                None => break,
            }
        }
        self.stop.cancelled().await;
        Ok(())
    }

    fn stop_sync(&self) {
        self.stop.cancel();
    }

    async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<EventId> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::Protocol("send refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((room.clone(), event_type.to_string(), content));
        let n = self.next_event.fetch_add(1, Ordering::SeqCst);
        Ok(EventId::new(format!("$ev{n}")))
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>> {
        if self.fail_members.load(Ordering::SeqCst) {
            return Err(Error::Protocol("members unavailable".to_string()));
        }
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_encrypted(&self, room: &RoomId) -> Result<bool> {
        Ok(self
            .encrypted
            .lock()
            .unwrap()
            .get(room)
            .copied()
            .unwrap_or(false))
    }

    async fn join_room(&self, room: &RoomId) -> Result<()> {
        self.joined.lock().unwrap().push(room.clone());
        Ok(())
    }

    async fn set_display_name(&self, name: &str) -> Result<()> {
        if self.fail_display_name.load(Ordering::SeqCst) {
            return Err(Error::Protocol("profile update refused".to_string()));
        }
        self.display_names.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCrypto {
    sessions: Mutex<HashMap<RoomId, OutboundSession>>,
    shares: AtomicUsize,
    last_shared: Mutex<Vec<UserId>>,
    fail_encrypt: AtomicBool,
    share_delay: Mutex<Duration>,
    accepted: Mutex<Vec<(UserId, String)>>,
}

impl FakeCrypto {
    pub fn share_calls(&self) -> usize {
        self.shares.load(Ordering::SeqCst)
    }

    pub fn last_shared_with(&self) -> Vec<UserId> {
        self.last_shared.lock().unwrap().clone()
    }

    pub fn fail_encrypt(&self, v: bool) {
        self.fail_encrypt.store(v, Ordering::SeqCst);
    }

    pub fn set_share_delay(&self, d: Duration) {
        *self.share_delay.lock().unwrap() = d;
    }

    /// Push every session past its message budget.
    pub fn expire_sessions(&self) {
        for s in self.sessions.lock().unwrap().values_mut() {
            s.message_count = s.rotation.max_messages;
        }
    }

    pub fn accepted(&self) -> Vec<(UserId, String)> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GroupCrypto for FakeCrypto {
    async fn outbound_session(&self, room: &RoomId) -> Result<Option<OutboundSession>> {
        Ok(self.sessions.lock().unwrap().get(room).cloned())
    }

    async fn share_session(&self, room: &RoomId, members: &[UserId]) -> Result<()> {
        let delay = *self.share_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let n = self.shares.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_shared.lock().unwrap() = members.to_vec();
        self.sessions.lock().unwrap().insert(
            room.clone(),
            OutboundSession {
                session_id: format!("session-{n}"),
                created_at: Instant::now(),
                message_count: 0,
                shared_with: members.iter().cloned().collect::<BTreeSet<_>>(),
                rotation: RotationPolicy::default(),
            },
        );
        Ok(())
    }

    async fn encrypt(
        &self,
        room: &RoomId,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(Error::Crypto("olm machine unavailable".to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(room) else {
            return Err(Error::Crypto(format!("no outbound session for {room}")));
        };
        session.message_count += 1;
        Ok(serde_json::json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "session_id": session.session_id,
            "type": event_type,
            "ciphertext_of": content["body"],
        }))
    }

    async fn decrypt(&self, event: &EncryptedEvent) -> Result<RoomMessage> {
        let Some(body) = event.content["plaintext_body"].as_str() else {
            return Err(Error::Crypto("unable to decrypt".to_string()));
        };
        Ok(RoomMessage {
            room_id: event.room_id.clone(),
            sender: event.sender.clone(),
            msgtype: MSGTYPE_TEXT.to_string(),
            body: body.to_string(),
        })
    }

    async fn accept_verification(&self, sender: &UserId, transaction_id: &str) -> Result<()> {
        self.accepted
            .lock()
            .unwrap()
            .push((sender.clone(), transaction_id.to_string()));
        Ok(())
    }
}

/// Factory handing out [`FakeClient`]s and remembering each one it built.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(ClientConfig, Arc<FakeClient>, Arc<FakeCrypto>)>>,
    failing: Mutex<HashSet<UserId>>,
    delay: Mutex<Duration>,
    seed: Mutex<Vec<SyncEvent>>,
    reject_display_names: AtomicBool,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn clients(&self) -> Vec<Arc<FakeClient>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c, _)| c.clone())
            .collect()
    }

    pub fn last_client(&self) -> Arc<FakeClient> {
        self.clients().pop().expect("no client created")
    }

    pub fn fail_for(&self, user: &str) {
        self.failing.lock().unwrap().insert(UserId::from(user));
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }

    /// Every subsequently built client refuses profile updates.
    pub fn reject_display_names(&self) {
        self.reject_display_names.store(true, Ordering::SeqCst);
    }

    /// Events every subsequently built client delivers on its first sync.
    pub fn seed_events(&self, events: Vec<SyncEvent>) {
        *self.seed.lock().unwrap() = events;
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(&self, config: &ClientConfig) -> Result<ClientParts> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&config.user_id) {
            return Err(Error::Protocol(format!(
                "cannot reach {}",
                config.homeserver_url
            )));
        }

        let client = Arc::new(FakeClient::new(config.user_id.as_str()));
        for ev in self.seed.lock().unwrap().iter().cloned() {
            client.push_event(ev);
        }
        if self.reject_display_names.load(Ordering::SeqCst) {
            client.fail_display_name(true);
        }
        let crypto = Arc::new(FakeCrypto::default());
        self.created
            .lock()
            .unwrap()
            .push((config.clone(), client.clone(), crypto.clone()));
        Ok(ClientParts { client, crypto })
    }
}

pub fn client_config(user: &str) -> ClientConfig {
    ClientConfig {
        user_id: UserId::from(user),
        homeserver_url: "https://hs.example".to_string(),
        access_token: "token".to_string(),
        device_id: "DEVICE".to_string(),
        sync: true,
        auto_join_rooms: true,
        display_name: None,
        accept_verification_from_users: vec![],
    }
}
