use std::{
    collections::{BTreeSet, HashMap},
    sync::RwLock,
};

use crate::{
    domain::{RoomId, UserId},
    events::Membership,
};

#[derive(Clone, Debug, Default)]
struct RoomState {
    encrypted: Option<bool>,
    members: Option<BTreeSet<UserId>>,
}

/// Cached per-room view for one identity: encryption flag and joined members.
///
/// `None` means "not known yet"; callers fill it from the protocol client.
#[derive(Debug, Default)]
pub struct RoomStateCache {
    rooms: RwLock<HashMap<RoomId, RoomState>>,
}

impl RoomStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_encrypted(&self, room: &RoomId) -> Option<bool> {
        self.read(|rooms| rooms.get(room).and_then(|s| s.encrypted))
    }

    pub fn set_encrypted(&self, room: &RoomId, encrypted: bool) {
        self.write(|rooms| rooms.entry(room.clone()).or_default().encrypted = Some(encrypted));
    }

    pub fn members(&self, room: &RoomId) -> Option<BTreeSet<UserId>> {
        self.read(|rooms| rooms.get(room).and_then(|s| s.members.clone()))
    }

    pub fn set_members(&self, room: &RoomId, members: impl IntoIterator<Item = UserId>) {
        let members = members.into_iter().collect();
        self.write(|rooms| rooms.entry(room.clone()).or_default().members = Some(members));
    }

    /// Apply a membership change. Unknown member lists stay unknown.
    pub fn apply_membership(&self, room: &RoomId, user: &UserId, membership: Membership) {
        self.write(|rooms| {
            let Some(members) = rooms.get_mut(room).and_then(|s| s.members.as_mut()) else {
                return;
            };
            match membership {
                Membership::Join => {
                    members.insert(user.clone());
                }
                Membership::Leave | Membership::Ban => {
                    members.remove(user);
                }
                Membership::Invite | Membership::Knock => {}
            }
        });
    }

    pub fn forget(&self, room: &RoomId) {
        self.write(|rooms| {
            rooms.remove(room);
        });
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<RoomId, RoomState>) -> T) -> T {
        let guard = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<RoomId, RoomState>) -> T) -> T {
        let mut guard = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}
