//! Wire protocol (§6): client <-> session JSON text frames. Framing/transport itself (WebSocket,
//! HTTP) is out of scope here; this module only defines the message shapes the core produces and
//! consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, Deserialize)]
pub struct ClientMessage {
  #[serde(rename = "type")]
  pub message_type: String,
  pub channel: Option<String>,
  pub event: Option<String>,
  pub schema: Option<String>,
  pub table: Option<String>,
  pub filter: Option<String>,
  pub subscription_id: Option<String>,
  pub message_id: Option<String>,
  pub token: Option<String>,
  pub payload: Option<JsonValue>,
  pub config: Option<JsonValue>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
  #[serde(rename = "type")]
  pub message_type: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub channel: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payload: Option<JsonValue>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ServerMessage {
  pub fn error(message: impl Into<String>) -> Self {
    return Self {
      message_type: "error".to_string(),
      channel: None,
      payload: None,
      error: Some(message.into()),
    };
  }

  pub fn ack(channel: Option<String>) -> Self {
    return Self {
      message_type: "ack".to_string(),
      channel,
      payload: None,
      error: None,
    };
  }

  pub fn postgres_changes(channel: impl Into<String>, payload: JsonValue) -> Self {
    return Self {
      message_type: "postgres_changes".to_string(),
      channel: Some(channel.into()),
      payload: Some(payload),
      error: None,
    };
  }

  pub fn broadcast(channel: impl Into<String>, payload: JsonValue) -> Self {
    return Self {
      message_type: "broadcast".to_string(),
      channel: Some(channel.into()),
      payload: Some(payload),
      error: None,
    };
  }

  pub fn execution_log(channel: impl Into<String>, payload: JsonValue) -> Self {
    return Self {
      message_type: "execution_log".to_string(),
      channel: Some(channel.into()),
      payload: Some(payload),
      error: None,
    };
  }

  pub fn log_entry(channel: impl Into<String>, payload: JsonValue) -> Self {
    return Self {
      message_type: "log_entry".to_string(),
      channel: Some(channel.into()),
      payload: Some(payload),
      error: None,
    };
  }
}

/// The envelope published on the cross-instance broadcast bus channel (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
  pub channel: String,
  pub message: ServerMessage,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn client_message_deserializes_minimal_subscribe() {
    let raw = r#"{"type":"subscribe","schema":"public","table":"orders","event":"INSERT"}"#;
    let msg: ClientMessage = serde_json::from_str(raw).unwrap();
    assert_eq!(msg.message_type, "subscribe");
    assert_eq!(msg.schema.as_deref(), Some("public"));
  }

  #[test]
  fn server_error_message_round_trips() {
    let msg = ServerMessage::error("max_connections_reached");
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"], "max_connections_reached");
    assert!(json.get("channel").is_none());
  }

  #[test]
  fn broadcast_envelope_round_trips() {
    let env = BroadcastEnvelope {
      channel: "room:7".to_string(),
      message: ServerMessage::broadcast("room:7", serde_json::json!({"x": 1})),
    };
    let bytes = serde_json::to_vec(&env).unwrap();
    let decoded: BroadcastEnvelope = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded.channel, "room:7");
  }
}
