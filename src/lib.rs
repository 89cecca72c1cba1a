#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

//! Core of a realtime change-notification hub: session fan-out, row-level filtering and access
//! control, resource accounting, and cross-instance broadcast coordination.
//!
//! This crate is the engine only — the HTTP/WebSocket framing, token parsing, admin surfaces, and
//! storage backends that would normally sit around it are external collaborators (see the wire
//! protocol in [`wire`]) and are out of scope here.

pub mod access_authority;
pub mod access_cache;
pub mod bus;
pub mod claims;
pub mod config;
pub mod error;
pub mod filter;
pub mod ingestor;
pub mod logging;
pub mod registry;
pub mod session;
pub mod session_manager;
pub mod wire;

use std::sync::Arc;

use access_authority::AccessAuthority;
use config::HubConfig;
use registry::SubscriptionRegistry;
use session_manager::SessionManager;

/// Convenience bundle wiring the Subscription Registry and Session Manager together with a given
/// Access Authority adapter, matching the dependency order in SPEC_FULL.md §2 (Filter Predicate
/// and Access Cache feed the Registry; Session feeds the Session Manager; the Change Ingestor
/// consumes both).
pub struct Hub {
  pub registry: Arc<SubscriptionRegistry>,
  pub sessions: SessionManager,
}

impl Hub {
  pub fn new(config: HubConfig, authority: Arc<dyn AccessAuthority>) -> Self {
    let config = config.normalized();
    let registry = Arc::new(SubscriptionRegistry::new(
      authority,
      config.access_cache_max_size,
      config.access_cache_ttl,
    ));
    let sessions = SessionManager::new(config, registry.clone());
    return Self { registry, sessions };
  }

  /// Starts the background slow-client sweep. Call once after construction.
  pub fn start(&self) {
    self.sessions.start_slow_client_sweep();
  }

  /// Builds a [`ingestor::ChangeIngestor`] wired to this hub's registry and session manager.
  pub fn ingestor(&self) -> ingestor::ChangeIngestor {
    return ingestor::ChangeIngestor::new(self.registry.clone(), self.sessions.clone());
  }

  pub async fn shutdown(&self) {
    self.sessions.shutdown().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use access_authority::StaticAccessAuthority;
  use serde_json::{json, Map};

  #[tokio::test]
  async fn end_to_end_subscribe_and_fanout() {
    let hub = Hub::new(
      HubConfig::default(),
      Arc::new(StaticAccessAuthority::allow_tables([("public", "orders")])),
    );

    let session = hub.sessions.add("c1", None, "anon", Map::new(), "127.0.0.1").unwrap();
    hub
      .registry
      .create_row_subscription(
        "sub1".into(),
        "c1",
        None,
        "anon",
        Map::new(),
        "public",
        "orders",
        "INSERT",
        None,
      )
      .await
      .unwrap();

    let ingestor = hub.ingestor();
    let raw = json!({
      "type": "INSERT",
      "schema": "public",
      "table": "orders",
      "record": {"id": 42},
    })
    .to_string();
    ingestor.process_one(&raw).await;

    assert_eq!(session.stats().length, 1);

    hub.shutdown().await;
    assert_eq!(hub.sessions.count(), 0);
  }
}
