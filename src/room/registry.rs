use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use serde_json::Value;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};

use crate::room::{ResponsePacket, UserSnapshot};

// `Sender` is a type alias for a synchronized WebSocket sender.
//
// The Mutex is there because a SplitSink must not be written to from two
// tasks at once.
pub type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The fixed card set a vote has to come from.
pub const CARD_VALUES: [u8; 6] = [0, 1, 2, 3, 5, 8];

/// Maximum length of a member's comment, in characters.
pub const COMMENT_MAX_LENGTH: usize = 140;

/// How long a disconnected member keeps their seat before it is reclaimed.
pub const MEMBER_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// How long an empty room is kept around before it is deleted.
pub const ROOM_GRACE_PERIOD: Duration = Duration::from_secs(3600);

/// Per-member lifecycle.
///
/// A member whose connection dropped moves to `PendingRemoval` but stays
/// visible in snapshots until the grace period elapses. Rejoining with the
/// same display name aborts the stored timer and restores the seat.
#[derive(Debug)]
pub enum MemberState {
    Active,
    PendingRemoval {
        removal_timer: Option<JoinHandle<()>>,
    },
}

/// Per-room lifecycle. An empty room lingers in `PendingDelete` until the
/// room grace period elapses; any join flips it back to `Active`.
#[derive(Debug)]
pub enum RoomLifecycle {
    Active,
    PendingDelete {
        delete_timer: Option<JoinHandle<()>>,
    },
}

/// One participant's state within a room.
///
/// The display name is the identity key across reconnects; the connection id
/// changes every time the participant reconnects.
#[derive(Debug)]
pub struct Member {
    pub connection_id: String,
    pub name: String,
    pub is_host: bool,
    pub vote: Option<u8>,
    pub comment: Option<String>,
    pub wizard_answers: Option<Value>,
    pub state: MemberState,
    /// Live WebSocket sink for this member, `None` once disconnected
    /// (and in tests that drive the registry without a network layer).
    pub sender: Option<Sender>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        matches!(self.state, MemberState::Active)
    }

    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.connection_id.clone(),
            name: self.name.clone(),
            is_host: self.is_host,
            vote: self.vote,
            // Derived from the vote, denormalized for the wire format.
            has_voted: self.vote.is_some(),
            comment: self.comment.clone(),
            wizard_answers: self.wizard_answers.clone(),
        }
    }
}

/// One room's authoritative state.
///
/// Members are kept in join order; a rejoin removes the stale entry and
/// appends the new one, which matches how the member list is rendered.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub members: Vec<Member>,
    pub revealed: bool,
    pub lifecycle: RoomLifecycle,
}

impl Room {
    pub fn new(id: &str) -> Room {
        Room {
            id: id.to_string(),
            members: Vec::new(),
            revealed: false,
            lifecycle: RoomLifecycle::Active,
        }
    }

    pub fn member(&self, connection_id: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.connection_id == connection_id)
    }

    pub fn member_mut(&mut self, connection_id: &str) -> Option<&mut Member> {
        self.members
            .iter_mut()
            .find(|member| member.connection_id == connection_id)
    }

    /// The full `room-state` payload, including members whose removal is
    /// still pending. They keep their seat until the grace period elapses.
    pub fn snapshot(&self) -> ResponsePacket {
        ResponsePacket::RoomState {
            users: self.members.iter().map(Member::snapshot).collect(),
            revealed: self.revealed,
        }
    }
}

/// The registry owning every room in the process.
///
/// All mutation goes through the methods below; each returns whether the
/// room changed, which is what decides whether a broadcast goes out. None of
/// them does any I/O, so tests construct a `Registry` directly, drive events
/// and inspect snapshots without a network layer.
#[derive(Debug)]
pub struct Registry {
    rooms: HashMap<String, Room>,
    pub member_grace: Duration,
    pub room_grace: Duration,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            rooms: HashMap::new(),
            member_grace: MEMBER_GRACE_PERIOD,
            room_grace: ROOM_GRACE_PERIOD,
        }
    }

    /// A registry with shortened grace periods, for tests.
    pub fn with_grace_periods(member_grace: Duration, room_grace: Duration) -> Registry {
        Registry {
            rooms: HashMap::new(),
            member_grace,
            room_grace,
        }
    }

    /// The shared, lock-guarded form the connection layer works against.
    pub fn shared() -> Arc<RwLock<Registry>> {
        Arc::new(RwLock::new(Registry::new()))
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Returns the room, creating an empty one if the id is unknown.
    pub fn get_or_create(&mut self, room_id: &str) -> &mut Room {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id))
    }

    /// Removes a room. Safe to call on an unknown id.
    pub fn delete(&mut self, room_id: &str) {
        self.rooms.remove(room_id);
    }

    /// Binds a connection to a room, creating the room if needed.
    ///
    /// If a member with the same trimmed display name already exists (even
    /// one whose removal is pending), the new connection supersedes it: the
    /// old entry is removed, its removal timer aborted, and its vote,
    /// comment, host flag and wizard answers carry over. A join also cancels
    /// a pending deletion of the room.
    pub fn join(
        &mut self,
        room_id: &str,
        connection_id: &str,
        user_name: &str,
        sender: Option<Sender>,
    ) -> bool {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return false;
        }

        let room = self.get_or_create(room_id);

        if let RoomLifecycle::PendingDelete { delete_timer } = &mut room.lifecycle {
            if let Some(timer) = delete_timer.take() {
                timer.abort();
            }
            room.lifecycle = RoomLifecycle::Active;
        }

        let mut member = Member {
            connection_id: connection_id.to_string(),
            name: user_name.to_string(),
            is_host: false,
            vote: None,
            comment: None,
            wizard_answers: None,
            state: MemberState::Active,
            sender,
        };

        // Same display name means same participant: the newer connection
        // takes over the seat and its state.
        if let Some(index) = room
            .members
            .iter()
            .position(|existing| existing.name == user_name)
        {
            let previous = room.members.remove(index);
            if let MemberState::PendingRemoval {
                removal_timer: Some(timer),
            } = &previous.state
            {
                timer.abort();
            }
            member.is_host = previous.is_host;
            member.vote = previous.vote;
            member.comment = previous.comment;
            member.wizard_answers = previous.wizard_answers;
        }

        // A connection holds at most one seat per room. Rejoining under a
        // new display name drops the old entry instead of duplicating it;
        // state only carries over through the name match above.
        if let Some(index) = room
            .members
            .iter()
            .position(|existing| existing.connection_id == connection_id)
        {
            let previous = room.members.remove(index);
            if let MemberState::PendingRemoval {
                removal_timer: Some(timer),
            } = &previous.state
            {
                timer.abort();
            }
        }

        room.members.push(member);
        true
    }

    /// Records a vote, or withdraws it when `vote` is `None`.
    ///
    /// Votes are ignored while the room is revealed, and values outside the
    /// card set are dropped.
    pub fn vote(&mut self, room_id: &str, connection_id: &str, vote: Option<u8>) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if room.revealed {
            return false;
        }
        if let Some(value) = vote {
            if !CARD_VALUES.contains(&value) {
                return false;
            }
        }
        let Some(member) = room.member_mut(connection_id) else {
            return false;
        };
        member.vote = vote;
        true
    }

    /// Sets or clears a member's comment, capped at [`COMMENT_MAX_LENGTH`].
    pub fn comment(&mut self, room_id: &str, connection_id: &str, comment: Option<String>) -> bool {
        let Some(member) = self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.member_mut(connection_id))
        else {
            return false;
        };
        member.comment = comment.map(|text| text.chars().take(COMMENT_MAX_LENGTH).collect());
        true
    }

    /// Stores the estimation helper payload verbatim.
    pub fn wizard_answers(
        &mut self,
        room_id: &str,
        connection_id: &str,
        wizard_answers: Option<Value>,
    ) -> bool {
        let Some(member) = self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.member_mut(connection_id))
        else {
            return false;
        };
        member.wizard_answers = wizard_answers;
        true
    }

    /// Grants or revokes the host flag. Any member may do either; several
    /// hosts can coexist.
    pub fn set_host(&mut self, room_id: &str, connection_id: &str, is_host: bool) -> bool {
        let Some(member) = self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.member_mut(connection_id))
        else {
            return false;
        };
        member.is_host = is_host;
        true
    }

    /// Makes all votes visible. Ignored unless the acting member is a host.
    pub fn reveal_votes(&mut self, room_id: &str, connection_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.member(connection_id).is_some_and(|m| m.is_host) {
            return false;
        }
        room.revealed = true;
        true
    }

    /// Re-hides votes and clears every member's vote, comment and wizard
    /// answers. Ignored unless the acting member is a host.
    pub fn reset_votes(&mut self, room_id: &str, connection_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.member(connection_id).is_some_and(|m| m.is_host) {
            return false;
        }
        room.revealed = false;
        for member in &mut room.members {
            member.vote = None;
            member.comment = None;
            member.wizard_answers = None;
        }
        true
    }

    /// Flags every active member of this connection as pending removal and
    /// returns the ids of the affected rooms. The member stays visible in
    /// snapshots; only the removal timer firing actually deletes it.
    pub fn mark_disconnected(&mut self, connection_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for (room_id, room) in &mut self.rooms {
            if let Some(member) = room.member_mut(connection_id) {
                if member.is_active() {
                    member.state = MemberState::PendingRemoval {
                        removal_timer: None,
                    };
                    member.sender = None;
                    affected.push(room_id.clone());
                }
            }
        }
        affected
    }

    /// Attaches a spawned removal timer to a pending member, so a later
    /// rejoin can abort it. Dropped if the member rejoined in the meantime.
    pub fn store_removal_timer(
        &mut self,
        room_id: &str,
        connection_id: &str,
        timer: JoinHandle<()>,
    ) {
        if let Some(member) = self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.member_mut(connection_id))
        {
            if let MemberState::PendingRemoval { removal_timer } = &mut member.state {
                *removal_timer = Some(timer);
            }
        }
    }

    /// Removes a member whose grace period elapsed. Re-checks that the
    /// member is still pending, since the timer may fire after a rejoin
    /// already replaced the entry.
    pub fn remove_if_pending(&mut self, room_id: &str, connection_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let Some(index) = room
            .members
            .iter()
            .position(|member| member.connection_id == connection_id && !member.is_active())
        else {
            return false;
        };
        room.members.remove(index);
        true
    }

    /// Flags an empty room for deletion. Returns whether a deletion timer
    /// should be started.
    pub fn mark_pending_delete(&mut self, room_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.members.is_empty() || !matches!(room.lifecycle, RoomLifecycle::Active) {
            return false;
        }
        room.lifecycle = RoomLifecycle::PendingDelete { delete_timer: None };
        true
    }

    /// Attaches a spawned deletion timer to a pending room.
    pub fn store_delete_timer(&mut self, room_id: &str, timer: JoinHandle<()>) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            if let RoomLifecycle::PendingDelete { delete_timer } = &mut room.lifecycle {
                *delete_timer = Some(timer);
            }
        }
    }

    /// Deletes a room whose grace period elapsed, re-checking that it is
    /// still empty and still flagged for deletion.
    pub fn delete_if_pending(&mut self, room_id: &str) -> bool {
        let still_pending = self.rooms.get(room_id).is_some_and(|room| {
            room.members.is_empty() && matches!(room.lifecycle, RoomLifecycle::PendingDelete { .. })
        });
        if still_pending {
            self.delete(room_id);
        }
        still_pending
    }

    pub fn snapshot(&self, room_id: &str) -> Option<ResponsePacket> {
        self.rooms.get(room_id).map(Room::snapshot)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
