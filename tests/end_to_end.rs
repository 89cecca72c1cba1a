//! End-to-end scenarios from the design's "testable properties" list, driven only through the
//! public `SessionManager` / `SubscriptionRegistry` / `PubSubBus` surface — no HTTP layer, no real
//! database, matching the in-memory-fixture style the teacher's `subscribe.rs` tests use.

use std::sync::Arc;
use std::time::Duration;

use realtime_hub_core::access_authority::StaticAccessAuthority;
use realtime_hub_core::bus::InProcessBus;
use realtime_hub_core::config::HubConfig;
use realtime_hub_core::error::HubError;
use realtime_hub_core::registry::{ChangeEvent, EventKind, SubscriptionRegistry};
use realtime_hub_core::session_manager::SessionManager;
use realtime_hub_core::wire::ServerMessage;
use serde_json::{json, Map};

fn manager_with(config: HubConfig) -> SessionManager {
  let authority = Arc::new(StaticAccessAuthority::allow_tables([("public", "orders")]));
  let registry = Arc::new(SubscriptionRegistry::new(authority, 100, Duration::from_secs(30)));
  return SessionManager::new(config, registry);
}

#[test]
fn scenario_1_per_user_cap() {
  let manager = manager_with(HubConfig {
    max_connections_per_user: 2,
    ..HubConfig::default()
  });

  manager.add("c1", Some("u".into()), "authenticated", Map::new(), "10.0.0.1").unwrap();
  manager.add("c2", Some("u".into()), "authenticated", Map::new(), "10.0.0.1").unwrap();

  let err = manager
    .add("c3", Some("u".into()), "authenticated", Map::new(), "10.0.0.1")
    .unwrap_err();
  assert!(matches!(err, HubError::MaxUserConnectionsReached));

  manager.remove("c1");
  manager.add("c3", Some("u".into()), "authenticated", Map::new(), "10.0.0.1").unwrap();
  assert_eq!(manager.count_for_user("u"), 2);
}

#[test]
fn scenario_2_per_ip_cap_excludes_authenticated() {
  let manager = manager_with(HubConfig {
    max_connections_per_ip: 2,
    ..HubConfig::default()
  });

  manager.add("a1", None, "anon", Map::new(), "10.0.0.1").unwrap();
  manager.add("a2", None, "anon", Map::new(), "10.0.0.1").unwrap();
  let err = manager.add("a3", None, "anon", Map::new(), "10.0.0.1").unwrap_err();
  assert!(matches!(err, HubError::MaxIpConnectionsReached));

  for (i, id) in ["u1", "u2", "u3", "u4", "u5"].iter().enumerate() {
    manager
      .add(format!("auth-{i}"), Some((*id).into()), "authenticated", Map::new(), "10.0.0.1")
      .unwrap();
  }

  assert_eq!(manager.count_for_ip("10.0.0.1"), 0);
}

#[tokio::test]
async fn scenario_3_subscribe_to_disabled_table() {
  let authority = Arc::new(StaticAccessAuthority::allow_tables(Vec::<(&str, &str)>::new()));
  let registry = Arc::new(SubscriptionRegistry::new(authority, 100, Duration::from_secs(30)));

  let err = registry
    .create_row_subscription(
      "sub1".into(),
      "c1",
      None,
      "anon",
      Map::new(),
      "public",
      "secret",
      "*",
      None,
    )
    .await
    .unwrap_err();

  assert!(matches!(err, HubError::TableNotEnabledForRealtime));
}

#[tokio::test]
async fn scenario_4_filter_match_routes_to_matching_session_only() {
  let authority = Arc::new(StaticAccessAuthority::allow_tables([("public", "orders")]));
  let registry = Arc::new(SubscriptionRegistry::new(authority, 100, Duration::from_secs(30)));
  let manager = SessionManager::new(HubConfig::default(), registry.clone());

  let s1 = manager.add("c1", None, "anon", Map::new(), "1.1.1.1").unwrap();
  let s2 = manager.add("c2", None, "anon", Map::new(), "1.1.1.2").unwrap();

  registry
    .create_row_subscription(
      "sub1".into(), "c1", None, "anon", Map::new(), "public", "orders", "INSERT", Some("id=eq.1"),
    )
    .await
    .unwrap();
  registry
    .create_row_subscription(
      "sub2".into(), "c2", None, "anon", Map::new(), "public", "orders", "INSERT", Some("id=eq.2"),
    )
    .await
    .unwrap();

  let event = ChangeEvent {
    kind: EventKind::Insert,
    schema: "public".into(),
    table: "orders".into(),
    new: Some(json!({"id": 1})),
    old: None,
    commit_timestamp: None,
  };
  let deliveries = registry.fanout(&event).await;
  assert_eq!(deliveries.len(), 1);
  assert!(deliveries.contains_key("c1"));

  let event2 = ChangeEvent {
    new: Some(json!({"id": 2})),
    ..event
  };
  let deliveries2 = registry.fanout(&event2).await;
  assert_eq!(deliveries2.len(), 1);
  assert!(deliveries2.contains_key("c2"));

  let _ = (s1.id.clone(), s2.id.clone());
}

#[tokio::test]
async fn scenario_5_slow_client_eviction() {
  let manager = manager_with(HubConfig {
    client_message_queue_size: 20,
    slow_client_threshold: 10,
    slow_client_timeout: Duration::from_millis(50),
    ..HubConfig::default()
  });

  let session = manager.add("c1", None, "anon", Map::new(), "1.1.1.1").unwrap();
  for _ in 0..20 {
    session.try_enqueue(ServerMessage::ack(None));
  }

  manager.sweep_slow_clients();
  assert!(session.first_seen_slow().is_some());
  assert_eq!(manager.slow_clients_disconnected(), 0);

  tokio::time::sleep(Duration::from_millis(60)).await;
  manager.sweep_slow_clients();

  assert_eq!(manager.slow_clients_disconnected(), 1);
  assert!(manager.session("c1").is_none());
}

#[tokio::test]
async fn scenario_6_cross_instance_fanout() {
  let shared_bus = Arc::new(InProcessBus::new());

  let manager_a = manager_with(HubConfig::default());
  manager_a.attach_bus(shared_bus.clone());

  let manager_b = manager_with(HubConfig::default());
  manager_b.attach_bus(shared_bus.clone());

  let session_b = manager_b.add("c1", None, "anon", Map::new(), "1.1.1.1").unwrap();
  session_b.subscribe_channel("room:7");

  let message = ServerMessage::broadcast("room:7", json!({"hello": "world"}));
  manager_a.broadcast_global("room:7", &message).await;

  tokio::time::timeout(Duration::from_millis(200), async {
    loop {
      if session_b.stats().length > 0 {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("message should arrive via the shared bus");

  manager_a.shutdown().await;
  manager_b.shutdown().await;
}
