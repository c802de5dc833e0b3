pub mod broadcast;
pub mod registry;
pub mod server;
pub mod session;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The events a client can send to the server.
///
/// Every event carries the id of the room it targets. Events other than
/// `JoinRoom` are only meaningful once the connection has joined a room;
/// before that they are dropped without a reply.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RequestPacket {
    JoinRoom {
        room_id: String,
        user_name: String,
    },
    Vote {
        room_id: String,
        /// The card value, or `null` to withdraw the vote.
        #[serde(default)]
        vote: Option<u8>,
    },
    Comment {
        room_id: String,
        #[serde(default)]
        comment: Option<String>,
    },
    WizardAnswers {
        room_id: String,
        /// Opaque payload from the estimation helper, relayed verbatim.
        #[serde(default)]
        wizard_answers: Option<Value>,
    },
    BecomeHost {
        room_id: String,
    },
    RemoveHost {
        room_id: String,
    },
    RevealVotes {
        room_id: String,
    },
    ResetVotes {
        room_id: String,
    },
}

/// The events the server pushes to clients.
///
/// `RoomState` is the only state-carrying push: after every successful
/// mutation the full member list is re-sent to everyone in the room. There
/// is no delta protocol and no error reply for rejected events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ResponsePacket {
    RoomState {
        users: Vec<UserSnapshot>,
        revealed: bool,
    },
}

/// One member's entry in the `room-state` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    /// Id of the member's current connection.
    pub id: String,
    pub name: String,
    pub is_host: bool,
    pub vote: Option<u8>,
    pub has_voted: bool,
    pub comment: Option<String>,
    pub wizard_answers: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_packet_wire_names() {
        let packet: RequestPacket =
            serde_json::from_str(r#"{"type":"join-room","roomId":"r1","userName":"Alice"}"#)
                .unwrap();

        assert!(matches!(
            packet,
            RequestPacket::JoinRoom { room_id, user_name } if room_id == "r1" && user_name == "Alice"
        ));
    }

    #[test]
    fn test_vote_packet_accepts_null() {
        let packet: RequestPacket =
            serde_json::from_str(r#"{"type":"vote","roomId":"r1","vote":null}"#).unwrap();

        assert!(matches!(packet, RequestPacket::Vote { vote: None, .. }));
    }

    #[test]
    fn test_room_state_field_names() {
        let packet = ResponsePacket::RoomState {
            users: vec![UserSnapshot {
                id: "c1".to_string(),
                name: "Alice".to_string(),
                is_host: true,
                vote: Some(5),
                has_voted: true,
                comment: None,
                wizard_answers: None,
            }],
            revealed: false,
        };

        let text = serde_json::to_string(&packet).unwrap();

        assert!(text.contains(r#""type":"room-state""#));
        assert!(text.contains(r#""isHost":true"#));
        assert!(text.contains(r#""hasVoted":true"#));
        assert!(text.contains(r#""wizardAnswers":null"#));
    }
}
