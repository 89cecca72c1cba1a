//! Change Ingestor (§4.6): reads serialized change events from a database notification channel,
//! parses them, enriches job progress, and drives fan-out + delivery.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::registry::{ChangeEvent, EventKind, SubscriptionRegistry};
use crate::session_manager::SessionManager;
use crate::wire::ServerMessage;

#[derive(Deserialize)]
struct RawNotification {
  #[serde(rename = "type")]
  kind: String,
  schema: String,
  table: String,
  record: Option<JsonValue>,
  old_record: Option<JsonValue>,
  commit_timestamp: Option<i64>,
}

pub struct ChangeIngestor {
  registry: Arc<SubscriptionRegistry>,
  sessions: SessionManager,
}

impl ChangeIngestor {
  pub fn new(registry: Arc<SubscriptionRegistry>, sessions: SessionManager) -> Self {
    return Self { registry, sessions };
  }

  pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
    return &self.registry;
  }

  /// Drains `notifications` strictly in receipt order until the channel is closed (§4.6
  /// ordering: no reordering, coalescing, or batching). Malformed payloads are discarded and
  /// processing continues; the ingestor itself never panics on bad input.
  pub async fn run(&self, notifications: async_channel::Receiver<String>) {
    while let Ok(raw) = notifications.recv().await {
      self.process_one(&raw).await;
    }
  }

  /// Processes a single raw notification payload. Exposed separately from `run` so tests and
  /// callers driving a custom notification source can invoke it directly.
  pub async fn process_one(&self, raw: &str) {
    let mut parsed: RawNotification = match serde_json::from_str(raw) {
      Ok(n) => n,
      Err(err) => {
        log::warn!("discarding malformed change notification: {err}");
        return;
      }
    };

    let Some(kind) = parse_kind(&parsed.kind) else {
      log::warn!("discarding change notification with unknown type: {}", parsed.kind);
      return;
    };

    enrich_job_progress(&mut parsed);

    let event = ChangeEvent {
      kind,
      schema: parsed.schema.clone(),
      table: parsed.table.clone(),
      new: parsed.record,
      old: parsed.old_record,
      commit_timestamp: parsed.commit_timestamp,
    };

    let channel = format!("table:{}.{}", event.schema, event.table);
    let deliveries = self.registry.fanout(&event).await;

    for (session_id, payload) in deliveries {
      self
        .sessions
        .enqueue_to(&session_id, ServerMessage::postgres_changes(channel.clone(), payload));
    }
  }
}

fn parse_kind(raw: &str) -> Option<EventKind> {
  return match raw {
    "INSERT" => Some(EventKind::Insert),
    "UPDATE" => Some(EventKind::Update),
    "DELETE" => Some(EventKind::Delete),
    _ => None,
  };
}

/// §4.6 step 2: for `jobs.queue` records carrying a `progress` sub-mapping, copy
/// `progress.percent`, `progress.message`, and `progress.estimated_seconds_left` (when present)
/// onto top-level fields.
fn enrich_job_progress(notification: &mut RawNotification) {
  if notification.schema != "jobs" || notification.table != "queue" {
    return;
  }

  let Some(record) = notification.record.as_mut() else {
    return;
  };
  let Some(progress) = record.get("progress").cloned() else {
    return;
  };
  let Some(record_obj) = record.as_object_mut() else {
    return;
  };

  if let Some(percent) = progress.get("percent") {
    record_obj.insert("progress_percent".to_string(), percent.clone());
  }
  if let Some(message) = progress.get("message") {
    record_obj.insert("progress_message".to_string(), message.clone());
  }
  if let Some(eta) = progress.get("estimated_seconds_left") {
    record_obj.insert("estimated_seconds_left".to_string(), eta.clone());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::access_authority::StaticAccessAuthority;
  use crate::config::HubConfig;
  use serde_json::{json, Map};
  use std::time::Duration;

  fn ingestor() -> (ChangeIngestor, SessionManager) {
    let authority = Arc::new(StaticAccessAuthority::allow_tables([("public", "orders"), ("jobs", "queue")]));
    let registry = Arc::new(SubscriptionRegistry::new(authority, 100, Duration::from_secs(30)));
    let sessions = SessionManager::new(HubConfig::default(), registry.clone());
    let ingestor = ChangeIngestor::new(registry, sessions.clone());
    return (ingestor, sessions);
  }

  #[tokio::test]
  async fn malformed_payload_is_discarded_without_panic() {
    let (ingestor, _sessions) = ingestor();
    ingestor.process_one("not json").await;
    ingestor.process_one(r#"{"type":"BOGUS","schema":"public","table":"orders"}"#).await;
  }

  #[tokio::test]
  async fn delivers_to_subscribed_session() {
    let (ingestor, sessions) = ingestor();
    let session = sessions.add("c1", None, "anon", Map::new(), "1.1.1.1").unwrap();

    ingestor
      .registry()
      .create_row_subscription("sub1".into(), "c1", None, "anon", Map::new(), "public", "orders", "*", None)
      .await
      .unwrap();

    let raw = json!({
      "type": "INSERT",
      "schema": "public",
      "table": "orders",
      "record": {"id": 1, "total": 9},
    })
    .to_string();

    ingestor.process_one(&raw).await;

    assert_eq!(session.stats().length, 1);
  }

  #[tokio::test]
  async fn enriches_job_progress_fields() {
    let (ingestor, sessions) = ingestor();
    let session = sessions.add("c1", None, "anon", Map::new(), "1.1.1.1").unwrap();
    ingestor
      .registry()
      .create_row_subscription("sub1".into(), "c1", None, "anon", Map::new(), "jobs", "queue", "*", None)
      .await
      .unwrap();

    let raw = json!({
      "type": "UPDATE",
      "schema": "jobs",
      "table": "queue",
      "record": {
        "id": 1,
        "progress": {"percent": 50, "message": "halfway", "estimated_seconds_left": 10},
      },
    })
    .to_string();

    ingestor.process_one(&raw).await;

    let message = session.receiver().try_recv().unwrap();
    let payload = message.payload.unwrap();
    let new_record = &payload["new"];
    assert_eq!(new_record["progress_percent"], 50);
    assert_eq!(new_record["progress_message"], "halfway");
    assert_eq!(new_record["estimated_seconds_left"], 10);
  }
}
