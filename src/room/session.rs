use std::{sync::Arc, time::Duration};

use axum::extract::ws::Message;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::room::broadcast;
use crate::room::registry::{Registry, Sender};
use crate::room::RequestPacket;

/// One client's connection to the room server.
///
/// A `Session` binds a WebSocket to a connection id and routes the client's
/// events into the registry. Every successful mutation is followed by a full
/// room broadcast; rejected events are dropped without a reply, the client
/// observes effects only through the next `room-state` frame.
#[derive(Debug)]
pub struct Session {
    connection_id: String,
    sender: Sender,
    room_id: Option<String>,
}

impl Session {
    pub fn new(sender: Sender) -> Session {
        Session {
            connection_id: Uuid::new_v4().to_string(),
            sender,
            room_id: None,
        }
    }

    /// Handles one frame from the client.
    ///
    /// Text frames are parsed as [`RequestPacket`]; frames that do not parse
    /// are dropped. A close frame runs the disconnect path early, the read
    /// loop ending runs it again as a no-op.
    pub async fn handle_message(&mut self, registry: &Arc<RwLock<Registry>>, message: Message) {
        match message {
            Message::Text(text) => {
                let packet = match serde_json::from_str(&text) {
                    Ok(packet) => packet,
                    Err(_) => return,
                };
                self.handle_packet(registry, packet).await;
            }
            Message::Close(_) => {
                debug!("Client {} sent close frame", self.connection_id);
                self.handle_close(registry).await;
            }
            _ => {}
        }
    }

    async fn handle_packet(&mut self, registry: &Arc<RwLock<Registry>>, packet: RequestPacket) {
        let connection_id = self.connection_id.clone();
        match packet {
            RequestPacket::JoinRoom { room_id, user_name } => {
                self.handle_join(registry, &room_id, &user_name).await;
            }
            RequestPacket::Vote { room_id, vote } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.vote(&room_id, &connection_id, vote)
                })
                .await;
            }
            RequestPacket::Comment { room_id, comment } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.comment(&room_id, &connection_id, comment)
                })
                .await;
            }
            RequestPacket::WizardAnswers {
                room_id,
                wizard_answers,
            } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.wizard_answers(&room_id, &connection_id, wizard_answers)
                })
                .await;
            }
            RequestPacket::BecomeHost { room_id } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.set_host(&room_id, &connection_id, true)
                })
                .await;
            }
            RequestPacket::RemoveHost { room_id } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.set_host(&room_id, &connection_id, false)
                })
                .await;
            }
            RequestPacket::RevealVotes { room_id } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.reveal_votes(&room_id, &connection_id)
                })
                .await;
            }
            RequestPacket::ResetVotes { room_id } => {
                Self::mutate(registry, &room_id, |registry| {
                    registry.reset_votes(&room_id, &connection_id)
                })
                .await;
            }
        }
    }

    async fn handle_join(
        &mut self,
        registry: &Arc<RwLock<Registry>>,
        room_id: &str,
        user_name: &str,
    ) {
        debug!(
            "Client {} joining room {} as {:?}",
            self.connection_id, room_id, user_name
        );

        let mut reg = registry.write().await;
        if !reg.join(
            room_id,
            &self.connection_id,
            user_name,
            Some(self.sender.clone()),
        ) {
            return;
        }
        self.room_id = Some(room_id.to_string());

        let outbound = reg.room(room_id).map(broadcast::outbound);
        drop(reg);

        if let Some((targets, message)) = outbound {
            broadcast::deliver(targets, message).await;
        }
    }

    /// Applies one mutation under the write lock and, if the room changed,
    /// broadcasts the new snapshot after the lock is released.
    async fn mutate<F>(registry: &Arc<RwLock<Registry>>, room_id: &str, op: F)
    where
        F: FnOnce(&mut Registry) -> bool,
    {
        let mut reg = registry.write().await;
        if !op(&mut reg) {
            return;
        }

        let outbound = reg.room(room_id).map(broadcast::outbound);
        drop(reg);

        if let Some((targets, message)) = outbound {
            broadcast::deliver(targets, message).await;
        }
    }

    /// Runs the disconnect path for this connection.
    ///
    /// The member keeps their seat: removal is only scheduled, so a refresh
    /// or a network blip within the grace period costs nothing. No broadcast
    /// fires here, the room looks unchanged until the timer acts.
    pub async fn handle_close(&mut self, registry: &Arc<RwLock<Registry>>) {
        debug!(
            "Client {} disconnected (last joined room: {:?})",
            self.connection_id, self.room_id
        );
        schedule_removal(registry, &self.connection_id).await;
    }
}

/// Flags the connection's members as pending removal and starts one removal
/// timer per affected room, storing the handles so a rejoin can abort them.
pub(crate) async fn schedule_removal(registry: &Arc<RwLock<Registry>>, connection_id: &str) {
    let mut reg = registry.write().await;
    let member_grace = reg.member_grace;
    for room_id in reg.mark_disconnected(connection_id) {
        let timer = tokio::spawn(expire_member(
            Arc::clone(registry),
            room_id.clone(),
            connection_id.to_string(),
            member_grace,
        ));
        reg.store_removal_timer(&room_id, connection_id, timer);
    }
}

/// Removal timer body: after the grace period, drop the member if they are
/// still pending, broadcast the shrunken room, and flag the room for
/// deletion once it ends up empty.
pub(crate) async fn expire_member(
    registry: Arc<RwLock<Registry>>,
    room_id: String,
    connection_id: String,
    grace: Duration,
) {
    tokio::time::sleep(grace).await;

    let mut reg = registry.write().await;
    if !reg.remove_if_pending(&room_id, &connection_id) {
        // The member rejoined before the timer fired.
        return;
    }
    debug!("Removed {} from room {} after grace period", connection_id, room_id);

    let outbound = reg.room(&room_id).map(broadcast::outbound);
    let room_grace = reg.room_grace;
    if reg.mark_pending_delete(&room_id) {
        let timer = tokio::spawn(expire_room(
            Arc::clone(&registry),
            room_id.clone(),
            room_grace,
        ));
        reg.store_delete_timer(&room_id, timer);
    }
    drop(reg);

    if let Some((targets, message)) = outbound {
        broadcast::deliver(targets, message).await;
    }
}

/// Deletion timer body: after the room grace period, delete the room if it
/// is still empty and still flagged.
pub(crate) async fn expire_room(registry: Arc<RwLock<Registry>>, room_id: String, grace: Duration) {
    tokio::time::sleep(grace).await;

    let mut reg = registry.write().await;
    if reg.delete_if_pending(&room_id) {
        debug!("Deleted idle room {}", room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::registry::{MEMBER_GRACE_PERIOD, ROOM_GRACE_PERIOD, RoomLifecycle};

    #[tokio::test(start_paused = true)]
    async fn test_member_removed_after_grace_then_room_deleted() {
        let registry = Registry::shared();
        registry.write().await.join("r1", "c1", "Alice", None);

        schedule_removal(&registry, "c1").await;

        // Still seated during the grace window.
        tokio::time::sleep(MEMBER_GRACE_PERIOD / 2).await;
        assert_eq!(registry.read().await.room("r1").unwrap().members.len(), 1);

        tokio::time::sleep(MEMBER_GRACE_PERIOD).await;
        {
            let reg = registry.read().await;
            let room = reg.room("r1").unwrap();
            assert!(room.members.is_empty());
            assert!(matches!(
                room.lifecycle,
                RoomLifecycle::PendingDelete { .. }
            ));
        }

        tokio::time::sleep(ROOM_GRACE_PERIOD + Duration::from_secs(1)).await;
        assert!(registry.read().await.room("r1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_grace_keeps_seat_and_state() {
        let registry = Registry::shared();
        {
            let mut reg = registry.write().await;
            reg.join("r1", "c1", "Alice", None);
            reg.vote("r1", "c1", Some(5));
            reg.set_host("r1", "c1", true);
        }

        schedule_removal(&registry, "c1").await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        registry.write().await.join("r1", "c2", "Alice", None);

        // Well past the original removal deadline.
        tokio::time::sleep(MEMBER_GRACE_PERIOD * 2).await;

        let reg = registry.read().await;
        let room = reg.room("r1").unwrap();
        assert_eq!(room.members.len(), 1);
        let member = room.member("c2").unwrap();
        assert_eq!(member.vote, Some(5));
        assert!(member.is_host);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_during_room_grace_cancels_deletion() {
        let registry = Registry::shared();
        {
            let mut reg = registry.write().await;
            reg.join("r1", "c1", "Alice", None);
            reg.set_host("r1", "c1", true);
            reg.reveal_votes("r1", "c1");
        }

        schedule_removal(&registry, "c1").await;
        tokio::time::sleep(MEMBER_GRACE_PERIOD + Duration::from_secs(1)).await;
        assert!(registry
            .read()
            .await
            .room("r1")
            .unwrap()
            .members
            .is_empty());

        // A fresh participant shows up halfway through the room grace.
        tokio::time::sleep(ROOM_GRACE_PERIOD / 2).await;
        registry.write().await.join("r1", "c2", "Bob", None);

        tokio::time::sleep(ROOM_GRACE_PERIOD).await;

        let reg = registry.read().await;
        let room = reg.room("r1").unwrap();
        assert_eq!(room.members.len(), 1);
        // The room came back untouched, reveal flag included.
        assert!(room.revealed);
    }
}
