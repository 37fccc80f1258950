//! Routing of inbound sync events to services and back out to rooms.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{Content, RoomId, UserId},
    events::{MemberEvent, Membership, RoomMessage, SyncEvent, VerificationRequest},
    matcher::{is_command, match_commands, match_expansions, Command, Expansion},
    ports::EventSink,
    service::{RoomSender, Service, ServiceCatalog},
    session::SessionEntry,
    store::Store,
};

/// Counters for observability.
#[derive(Debug, Default)]
pub struct DispatchStats {
    commands_ok: AtomicU64,
    commands_failed: AtomicU64,
    expansions: AtomicU64,
    deliveries_failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub commands_ok: u64,
    pub commands_failed: u64,
    pub expansions: u64,
    pub deliveries_failed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            commands_ok: self.commands_ok.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            expansions: self.expansions.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    catalog: Arc<ServiceCatalog>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            store,
            catalog,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn handle_event(&self, entry: &SessionEntry, event: SyncEvent) {
        match event {
            SyncEvent::Message(msg) => self.handle_message(entry, msg).await,
            SyncEvent::Encrypted(ev) => match entry.crypto().decrypt(&ev).await {
                Ok(msg) => self.handle_message(entry, msg).await,
                Err(e) => warn!(
                    user_id = %entry.user_id(),
                    room_id = %ev.room_id,
                    sender = %ev.sender,
                    error = %e,
                    "failed to decrypt event"
                ),
            },
            SyncEvent::Member(ev) => self.handle_member(entry, ev).await,
            SyncEvent::Encryption { room_id } => {
                debug!(user_id = %entry.user_id(), room_id = %room_id, "room is now encrypted");
                entry.rooms().set_encrypted(&room_id, true);
            }
            SyncEvent::VerificationRequest(req) => self.handle_verification(entry, req).await,
        }
    }

    /// Compute responses for `msg` and send them in order.
    pub async fn handle_message(&self, entry: &SessionEntry, msg: RoomMessage) {
        let responses = self.responses(entry.user_id(), &msg).await;
        for content in responses {
            if let Err(e) = entry.send_content(&msg.room_id, &content).await {
                self.stats.deliveries_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    user_id = %entry.user_id(),
                    room_id = %msg.room_id,
                    error = %e,
                    "failed to deliver response"
                );
            }
        }
    }

    /// The command response (if any) or the expansion responses for `msg`.
    pub async fn responses(&self, user_id: &UserId, msg: &RoomMessage) -> Vec<Content> {
        if &msg.sender == user_id && msg.is_notice() {
            return Vec::new();
        }

        let services = self.services_for_room(user_id, &msg.room_id).await;
        if services.is_empty() {
            return Vec::new();
        }

        if is_command(&msg.body) {
            let commands: Vec<Command> = services.iter().flat_map(|s| s.commands()).collect();
            let Some(outcome) =
                match_commands(&commands, &msg.room_id, &msg.sender, &msg.body).await
            else {
                return Vec::new();
            };

            if outcome.failed {
                self.stats.commands_failed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.commands_ok.fetch_add(1, Ordering::Relaxed);
            }
            info!(
                user_id = %user_id,
                room_id = %msg.room_id,
                sender = %msg.sender,
                command = %outcome.path.join(" "),
                failed = outcome.failed,
                "command handled"
            );
            return outcome.content.into_iter().collect();
        }

        let expansions: Vec<Expansion> = services.iter().flat_map(|s| s.expansions()).collect();
        let out = match_expansions(&expansions, &msg.room_id, &msg.sender, &msg.body);
        self.stats
            .expansions
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    /// Services of `user_id` bound to `room`, in registration order.
    async fn services_for_room(&self, user_id: &UserId, room: &RoomId) -> Vec<Box<dyn Service>> {
        let records = match self.store.load_services_for_user(user_id).await {
            Ok(v) => v,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to load services");
                return Vec::new();
            }
        };

        records
            .iter()
            .filter(|r| r.is_bound_to(room))
            .filter_map(|r| match self.catalog.build(r) {
                Ok(svc) => Some(svc),
                Err(e) => {
                    warn!(service_id = %r.id, error = %e, "skipping unloadable service");
                    None
                }
            })
            .collect()
    }

    async fn handle_member(&self, entry: &SessionEntry, ev: MemberEvent) {
        entry
            .rooms()
            .apply_membership(&ev.room_id, &ev.user_id, ev.membership);

        if &ev.user_id != entry.user_id() {
            return;
        }
        match ev.membership {
            Membership::Invite if entry.config().auto_join_rooms => {
                info!(
                    user_id = %entry.user_id(),
                    room_id = %ev.room_id,
                    inviter = %ev.sender,
                    "joining room on invite"
                );
                if let Err(e) = entry.client().join_room(&ev.room_id).await {
                    warn!(
                        user_id = %entry.user_id(),
                        room_id = %ev.room_id,
                        error = %e,
                        "failed to join room"
                    );
                }
            }
            Membership::Leave | Membership::Ban => entry.rooms().forget(&ev.room_id),
            _ => {}
        }
    }

    async fn handle_verification(&self, entry: &SessionEntry, req: VerificationRequest) {
        if !entry.accepts_verification_from(&req.sender) {
            debug!(
                user_id = %entry.user_id(),
                sender = %req.sender,
                "ignoring verification request"
            );
            return;
        }
        if let Err(e) = entry
            .crypto()
            .accept_verification(&req.sender, &req.transaction_id)
            .await
        {
            warn!(
                user_id = %entry.user_id(),
                sender = %req.sender,
                error = %e,
                "failed to accept verification"
            );
        }
    }
}

/// Feeds one session's sync stream into the dispatcher.
pub struct EntrySink {
    entry: Weak<SessionEntry>,
    dispatcher: Arc<Dispatcher>,
}

impl EntrySink {
    pub fn new(entry: &Arc<SessionEntry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            entry: Arc::downgrade(entry),
            dispatcher,
        }
    }
}

#[async_trait]
impl EventSink for EntrySink {
    async fn on_event(&self, event: SyncEvent) {
        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        self.dispatcher.handle_event(&entry, event).await;
    }
}
