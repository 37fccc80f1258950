use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use neb_core::{
    domain::{Content, EventId, RoomId, ServiceId, ServiceRecord, UserId},
    errors::Error,
    service::RoomSender,
    Result,
};

/// Records every send; rooms in `failing` refuse delivery.
pub struct RecordingSender {
    user_id: UserId,
    sent: Mutex<Vec<(RoomId, Content)>>,
    failing: Mutex<HashSet<RoomId>>,
    next: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            user_id: UserId::from("@bot:x"),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            next: AtomicUsize::new(1),
        }
    }

    pub fn fail_room(&self, room: &str) {
        self.failing.lock().unwrap().insert(RoomId::from(room));
    }

    pub fn sent(&self) -> Vec<(RoomId, Content)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomSender for RecordingSender {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn send_content(&self, room: &RoomId, content: &Content) -> Result<EventId> {
        if self.failing.lock().unwrap().contains(room) {
            return Err(Error::Delivery(format!("{room} refused the event")));
        }
        self.sent.lock().unwrap().push((room.clone(), content.clone()));
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(EventId::new(format!("$ev{n}")))
    }
}

pub fn record(service_type: &str, rooms: &[&str], config: serde_json::Value) -> ServiceRecord {
    ServiceRecord {
        id: ServiceId::from(format!("{service_type}-1").as_str()),
        service_type: service_type.to_string(),
        user_id: UserId::from("@bot:x"),
        rooms: rooms.iter().map(|r| RoomId::from(*r)).collect(),
        config,
    }
}
