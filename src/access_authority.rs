//! Access Authority adapter (§4.8): external decider of "is this table realtime-enabled?" and
//! row-level read access. The core treats any failure from this adapter as deny (fail-closed).

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::claims::Claims;

/// The result of an execution-log ownership check (rpc/job/function), mirroring §4.8's
/// `(isOwner, exists)` shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipCheck {
  pub is_owner: bool,
  pub exists: bool,
}

#[async_trait]
pub trait AccessAuthority: Send + Sync {
  /// Whether `schema.table` is configured for realtime fan-out at all.
  async fn is_table_realtime_enabled(&self, schema: &str, table: &str) -> bool;

  /// Whether `role`/`claims` may read the record identified by `record_id` in `schema.table`.
  async fn check_access(
    &self,
    schema: &str,
    table: &str,
    role: &str,
    claims: &Claims,
    record_id: &str,
  ) -> bool;

  /// Whether `role`/`claims` owns (and whether it still exists) the named execution, used to gate
  /// log-stream subscriptions.
  async fn check_execution_ownership(
    &self,
    execution_type: &str,
    execution_id: &str,
    role: &str,
    claims: &Claims,
  ) -> OwnershipCheck;
}

/// A statically-configured authority for tests and simple deployments: every table in
/// `enabled_tables` is realtime-enabled, and `allow_all` decides every access check.
pub struct StaticAccessAuthority {
  pub enabled_tables: Vec<(String, String)>,
  pub allow_all: bool,
}

impl StaticAccessAuthority {
  pub fn allow_tables(tables: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
    return Self {
      enabled_tables: tables
        .into_iter()
        .map(|(s, t)| (s.to_string(), t.to_string()))
        .collect(),
      allow_all: true,
    };
  }
}

#[async_trait]
impl AccessAuthority for StaticAccessAuthority {
  async fn is_table_realtime_enabled(&self, schema: &str, table: &str) -> bool {
    return self
      .enabled_tables
      .iter()
      .any(|(s, t)| s == schema && t == table);
  }

  async fn check_access(
    &self,
    _schema: &str,
    _table: &str,
    _role: &str,
    _claims: &Claims,
    _record_id: &str,
  ) -> bool {
    return self.allow_all;
  }

  async fn check_execution_ownership(
    &self,
    _execution_type: &str,
    _execution_id: &str,
    _role: &str,
    _claims: &Claims,
  ) -> OwnershipCheck {
    return OwnershipCheck {
      is_owner: self.allow_all,
      exists: true,
    };
  }
}

/// Record identity used as a cache key (§9): the value of column `id` if present, else a stable
/// hash of the whole record.
pub fn record_identity(record: &JsonValue) -> String {
  if let Some(id) = record.get("id") {
    return match id {
      JsonValue::String(s) => s.clone(),
      other => other.to_string(),
    };
  }

  use std::collections::hash_map::DefaultHasher;
  use std::hash::{Hash, Hasher};
  let mut hasher = DefaultHasher::new();
  record.to_string().hash(&mut hasher);
  return format!("#{:x}", hasher.finish());
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn static_authority_enables_listed_tables_only() {
    let authority = StaticAccessAuthority::allow_tables([("public", "orders")]);
    assert!(authority.is_table_realtime_enabled("public", "orders").await);
    assert!(!authority.is_table_realtime_enabled("public", "secret").await);
  }

  #[test]
  fn record_identity_prefers_id_column() {
    assert_eq!(record_identity(&json!({"id": 1, "x": 2})), "1");
    assert_eq!(record_identity(&json!({"id": "abc"})), "abc");
  }

  #[test]
  fn record_identity_falls_back_to_hash_without_id() {
    let a = record_identity(&json!({"x": 1}));
    let b = record_identity(&json!({"x": 2}));
    assert_ne!(a, b);
    assert!(a.starts_with('#'));
  }
}
