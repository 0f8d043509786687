use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// A message was appended to a room this connection is subscribed to.
    /// Delivered to every subscriber, the sender included.
    MessageReceived(Message),

    /// A send from this connection was not stored.
    /// Only emitted when send acknowledgements are enabled.
    SendFailed { room_id: Uuid, reason: String },

    /// An explicit join was refused: not a member under the strict
    /// membership policy, or the connection's subscription limit was reached.
    JoinRejected { room_id: Uuid, reason: String },

    /// The room was deleted; no further events will arrive for it.
    RoomDeleted { room_id: Uuid },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Subscribe to a room by id.
    JoinRoom(Uuid),

    /// Append a message to a room and fan it out.
    SendMessage { room_id: Uuid, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_payload_is_bare_room_id() {
        let room_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"JoinRoom","data":"{}"}}"#, room_id);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::JoinRoom(room_id));
    }

    #[test]
    fn send_message_parses() {
        let room_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"SendMessage","data":{{"room_id":"{}","text":"hello"}}}}"#,
            room_id
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            cmd,
            GatewayCommand::SendMessage { room_id, text: "hello".into() }
        );
    }

    #[test]
    fn message_received_carries_room_id_as_string() {
        let message = Message {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            text: "hello".into(),
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(GatewayEvent::MessageReceived(message.clone())).unwrap();
        assert_eq!(json["type"], "MessageReceived");
        assert_eq!(json["data"]["room_id"], message.room_id.to_string());
        assert_eq!(json["data"]["text"], "hello");
    }
}
