use axum::extract::ws::Message;
use futures_util::{future::join_all, SinkExt};
use tracing::warn;

use crate::room::registry::{Room, Sender};

/// Builds the `room-state` frame for a room together with the senders of
/// every live connection attached to it.
///
/// Called while the registry lock is held; the caller drops the lock before
/// handing the result to [`deliver`], so the sends never block mutation.
/// Members whose removal is pending still appear in the frame but no longer
/// receive it.
pub fn outbound(room: &Room) -> (Vec<Sender>, Message) {
    let targets = room
        .members
        .iter()
        .filter(|member| member.is_active())
        .filter_map(|member| member.sender.clone())
        .collect();
    let text = serde_json::to_string(&room.snapshot()).unwrap();

    (targets, Message::Text(text))
}

/// Pushes one frame to every target connection.
///
/// Sends are fire-and-forget: a connection that fails to accept the frame is
/// logged and skipped, and its eventual close event runs the disconnect
/// path.
pub async fn deliver(targets: Vec<Sender>, message: Message) {
    let futures = targets.into_iter().map(|sender| {
        let message = message.clone();
        async move {
            let mut sender = sender.lock().await;
            if let Err(error) = sender.send(message).await {
                warn!("Failed to send room state to a client: {}", error);
            }
        }
    });

    join_all(futures).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::registry::Registry;

    #[test]
    fn test_outbound_skips_pending_members() {
        let mut registry = Registry::new();
        registry.join("r1", "c1", "Alice", None);
        registry.join("r1", "c2", "Bob", None);
        registry.mark_disconnected("c1");

        let (targets, message) = outbound(registry.room("r1").unwrap());

        // No live sinks were attached in this test, so no targets either
        // way, but the frame itself still lists both members.
        assert!(targets.is_empty());
        let Message::Text(text) = message else {
            panic!("expected a text frame");
        };
        assert!(text.contains("Alice"));
        assert!(text.contains("Bob"));
    }
}
