//! Subscription Registry (§4.3): holds row-change, log-stream and global-log subscriptions and
//! answers "who, among live sessions, must receive this change event?" via `fanout`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value as JsonValue};

use crate::access_authority::{record_identity, AccessAuthority};
use crate::access_cache::{AccessCache, AccessCacheKey};
use crate::claims::{digest_claims, Claims};
use crate::error::{HubError, HubResult};
use crate::filter::Filter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
  Insert,
  Update,
  Delete,
}

impl EventKind {
  fn as_str(&self) -> &'static str {
    return match self {
      Self::Insert => "INSERT",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
    };
  }
}

/// What a row subscription declared interest in: either a specific kind or `*` (any).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSelector {
  Any,
  Kind(EventKind),
}

impl EventSelector {
  /// Parses the wire `event` string, normalizing `""` to `*` (§4.3).
  fn parse(raw: &str) -> Self {
    return match raw {
      "" | "*" => Self::Any,
      "INSERT" => Self::Kind(EventKind::Insert),
      "UPDATE" => Self::Kind(EventKind::Update),
      "DELETE" => Self::Kind(EventKind::Delete),
      _ => Self::Any,
    };
  }

  fn matches(&self, kind: EventKind) -> bool {
    return match self {
      Self::Any => true,
      Self::Kind(k) => *k == kind,
    };
  }
}

#[derive(Clone, Debug)]
pub struct ChangeEvent {
  pub kind: EventKind,
  pub schema: String,
  pub table: String,
  pub new: Option<JsonValue>,
  pub old: Option<JsonValue>,
  pub commit_timestamp: Option<i64>,
}

#[derive(Clone)]
pub struct RowSubscription {
  pub id: String,
  pub session_id: String,
  pub user_id: Option<String>,
  pub role: String,
  pub claims: Claims,
  pub schema: String,
  pub table: String,
  pub event: EventSelector,
  pub filter: Option<Filter>,
}

#[derive(Clone)]
pub struct LogStreamSubscription {
  pub id: String,
  pub session_id: String,
  pub execution_id: String,
  pub execution_type: String,
}

#[derive(Clone)]
pub struct GlobalLogSubscription {
  pub id: String,
  pub session_id: String,
  pub category: Option<String>,
  pub levels: Option<HashSet<String>>,
}

#[derive(Default)]
struct Inner {
  row_subs: HashMap<String, RowSubscription>,
  row_by_session: HashMap<String, HashSet<String>>,
  row_by_table: HashMap<(String, String), HashSet<String>>,
  users_with_subs: HashMap<String, usize>,
  tables_with_subs: HashMap<(String, String), usize>,

  log_subs: HashMap<String, LogStreamSubscription>,
  log_by_session: HashMap<String, HashSet<String>>,
  log_by_execution: HashMap<String, HashSet<String>>,

  global_log_subs: HashMap<String, GlobalLogSubscription>,
  global_log_by_session: HashMap<String, HashSet<String>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
  pub total_subscriptions: usize,
  pub distinct_users_with_subs: usize,
  pub distinct_tables_with_subs: usize,
}

pub struct SubscriptionRegistry {
  authority: Arc<dyn AccessAuthority>,
  cache: AccessCache,
  inner: RwLock<Inner>,
  id_counter: AtomicI64,
}

impl SubscriptionRegistry {
  pub fn new(authority: Arc<dyn AccessAuthority>, cache_max_size: usize, cache_ttl: Duration) -> Self {
    return Self {
      authority,
      cache: AccessCache::new(cache_max_size, cache_ttl),
      inner: RwLock::new(Inner::default()),
      id_counter: AtomicI64::new(0),
    };
  }

  pub fn next_id(&self, prefix: &str) -> String {
    let n = self.id_counter.fetch_add(1, Ordering::Relaxed);
    return format!("{prefix}-{n}");
  }

  // ---- Row subscriptions ----------------------------------------------------------------

  pub async fn create_row_subscription(
    &self,
    id: String,
    session_id: impl Into<String>,
    user_id: Option<String>,
    role: impl Into<String>,
    claims: Claims,
    schema: impl Into<String>,
    table: impl Into<String>,
    event: &str,
    filter_expr: Option<&str>,
  ) -> HubResult<RowSubscription> {
    let filter = match filter_expr {
      Some(expr) if !expr.is_empty() => Some(Filter::parse(expr)?),
      _ => None,
    };

    let schema = schema.into();
    let table = table.into();

    if !self.authority.is_table_realtime_enabled(&schema, &table).await {
      return Err(HubError::TableNotEnabledForRealtime);
    }

    let sub = RowSubscription {
      id: id.clone(),
      session_id: session_id.into(),
      user_id,
      role: role.into(),
      claims,
      schema,
      table,
      event: EventSelector::parse(event),
      filter,
    };

    let mut inner = self.inner.write();
    inner
      .row_by_session
      .entry(sub.session_id.clone())
      .or_default()
      .insert(id.clone());
    inner
      .row_by_table
      .entry((sub.schema.clone(), sub.table.clone()))
      .or_default()
      .insert(id.clone());
    if let Some(user_id) = &sub.user_id {
      *inner.users_with_subs.entry(user_id.clone()).or_insert(0) += 1;
    }
    *inner
      .tables_with_subs
      .entry((sub.schema.clone(), sub.table.clone()))
      .or_insert(0) += 1;
    inner.row_subs.insert(id, sub.clone());

    return Ok(sub);
  }

  pub fn remove_row_subscription(&self, id: &str) -> HubResult<()> {
    let mut inner = self.inner.write();
    let Some(sub) = inner.row_subs.remove(id) else {
      return Err(HubError::SubscriptionNotFound);
    };
    Self::unindex_row(&mut inner, &sub);
    return Ok(());
  }

  fn unindex_row(inner: &mut Inner, sub: &RowSubscription) {
    if let Some(set) = inner.row_by_session.get_mut(&sub.session_id) {
      set.remove(&sub.id);
      if set.is_empty() {
        inner.row_by_session.remove(&sub.session_id);
      }
    }
    let table_key = (sub.schema.clone(), sub.table.clone());
    if let Some(set) = inner.row_by_table.get_mut(&table_key) {
      set.remove(&sub.id);
      if set.is_empty() {
        inner.row_by_table.remove(&table_key);
      }
    }
    if let Some(user_id) = &sub.user_id {
      if let Some(count) = inner.users_with_subs.get_mut(user_id) {
        *count -= 1;
        if *count == 0 {
          inner.users_with_subs.remove(user_id);
        }
      }
    }
    if let Some(count) = inner.tables_with_subs.get_mut(&table_key) {
      *count -= 1;
      if *count == 0 {
        inner.tables_with_subs.remove(&table_key);
      }
    }
  }

  pub fn list_by_connection(&self, session_id: &str) -> Vec<RowSubscription> {
    let inner = self.inner.read();
    let Some(ids) = inner.row_by_session.get(session_id) else {
      return Vec::new();
    };
    return ids
      .iter()
      .filter_map(|id| inner.row_subs.get(id).cloned())
      .collect();
  }

  pub fn update_role(&self, session_id: &str, new_role: &str) {
    let mut inner = self.inner.write();
    let ids: Vec<String> = inner
      .row_by_session
      .get(session_id)
      .map(|s| s.iter().cloned().collect())
      .unwrap_or_default();
    for id in ids {
      if let Some(sub) = inner.row_subs.get_mut(&id) {
        sub.role = new_role.to_string();
      }
    }
  }

  /// Rewrites claims on every row subscription owned by `session_id`. Claims are deep-copied
  /// per-subscription to defeat aliasing (§4.3); stale access-cache entries become unreachable
  /// once the digest changes rather than being proactively evicted (§9).
  pub fn update_claims(&self, session_id: &str, new_claims: &Claims) {
    let mut inner = self.inner.write();
    let ids: Vec<String> = inner
      .row_by_session
      .get(session_id)
      .map(|s| s.iter().cloned().collect())
      .unwrap_or_default();
    for id in ids {
      if let Some(sub) = inner.row_subs.get_mut(&id) {
        sub.claims = new_claims.clone();
      }
    }
  }

  pub fn remove_subscriptions_for_session(&self, session_id: &str) {
    let mut inner = self.inner.write();

    let row_ids: Vec<String> = inner
      .row_by_session
      .get(session_id)
      .map(|s| s.iter().cloned().collect())
      .unwrap_or_default();
    for id in row_ids {
      if let Some(sub) = inner.row_subs.remove(&id) {
        Self::unindex_row(&mut inner, &sub);
      }
    }

    let log_ids: Vec<String> = inner
      .log_by_session
      .remove(session_id)
      .map(|s| s.into_iter().collect())
      .unwrap_or_default();
    for id in log_ids {
      if let Some(sub) = inner.log_subs.remove(&id) {
        if let Some(set) = inner.log_by_execution.get_mut(&sub.execution_id) {
          set.remove(&id);
          if set.is_empty() {
            inner.log_by_execution.remove(&sub.execution_id);
          }
        }
      }
    }

    if let Some(ids) = inner.global_log_by_session.remove(session_id) {
      for id in ids {
        inner.global_log_subs.remove(&id);
      }
    }
  }

  /// Fans a change event out to every eligible session (§4.3 matching algorithm). Returns a
  /// mapping from session id to the `{event, new?, old?}` payload (§6); duplicates from multiple
  /// subscriptions of the same session collapse to one entry.
  pub async fn fanout(&self, event: &ChangeEvent) -> HashMap<String, JsonValue> {
    let bucket: Vec<RowSubscription> = {
      let inner = self.inner.read();
      let Some(ids) = inner.row_by_table.get(&(event.schema.clone(), event.table.clone())) else {
        return HashMap::new();
      };
      ids.iter().filter_map(|id| inner.row_subs.get(id).cloned()).collect()
    };

    if bucket.is_empty() {
      return HashMap::new();
    }

    let relevant_record: Option<&JsonValue> = match event.kind {
      EventKind::Insert | EventKind::Update => event.new.as_ref(),
      EventKind::Delete => event.old.as_ref(),
    };

    let mut result = HashMap::new();

    for sub in bucket {
      if !sub.event.matches(event.kind) {
        continue;
      }

      if let Some(filter) = &sub.filter {
        match relevant_record {
          Some(record) if filter.matches(record) => {}
          _ => continue,
        }
      }

      let record_id = relevant_record.map(record_identity).unwrap_or_default();
      let digest = digest_claims(&sub.claims);
      let key = AccessCacheKey::new(&event.schema, &event.table, &sub.role, &record_id, digest);

      let allow = match self.cache.lookup(&key) {
        Some(allow) => allow,
        None => {
          let allow = self
            .authority
            .check_access(&event.schema, &event.table, &sub.role, &sub.claims, &record_id)
            .await;
          self.cache.store(key, allow);
          allow
        }
      };

      if !allow {
        continue;
      }

      result.entry(sub.session_id.clone()).or_insert_with(|| {
        let mut payload = Map::new();
        payload.insert("event".to_string(), JsonValue::String(event.kind.as_str().to_string()));
        if let Some(new) = &event.new {
          payload.insert("new".to_string(), new.clone());
        }
        if let Some(old) = &event.old {
          payload.insert("old".to_string(), old.clone());
        }
        JsonValue::Object(payload)
      });
    }

    return result;
  }

  // ---- Log-stream subscriptions ----------------------------------------------------------

  pub async fn create_log_stream_subscription(
    &self,
    id: String,
    session_id: impl Into<String>,
    execution_id: impl Into<String>,
    execution_type: impl Into<String>,
    role: impl Into<String>,
    claims: Claims,
  ) -> HubResult<LogStreamSubscription> {
    let execution_id = execution_id.into();
    let execution_type = execution_type.into();
    let role = role.into();

    let ownership = self
      .authority
      .check_execution_ownership(&execution_type, &execution_id, &role, &claims)
      .await;
    if !ownership.exists {
      return Err(HubError::ExecutionNotFound);
    }
    if !ownership.is_owner {
      return Err(HubError::Forbidden);
    }

    let sub = LogStreamSubscription {
      id: id.clone(),
      session_id: session_id.into(),
      execution_id,
      execution_type,
    };

    let mut inner = self.inner.write();
    inner
      .log_by_session
      .entry(sub.session_id.clone())
      .or_default()
      .insert(id.clone());
    inner
      .log_by_execution
      .entry(sub.execution_id.clone())
      .or_default()
      .insert(id.clone());
    inner.log_subs.insert(id, sub.clone());

    return Ok(sub);
  }

  pub fn remove_log_stream_subscription(&self, id: &str) -> HubResult<()> {
    let mut inner = self.inner.write();
    let Some(sub) = inner.log_subs.remove(id) else {
      return Err(HubError::LogSubscriptionNotFound);
    };
    if let Some(set) = inner.log_by_session.get_mut(&sub.session_id) {
      set.remove(id);
      if set.is_empty() {
        inner.log_by_session.remove(&sub.session_id);
      }
    }
    if let Some(set) = inner.log_by_execution.get_mut(&sub.execution_id) {
      set.remove(id);
      if set.is_empty() {
        inner.log_by_execution.remove(&sub.execution_id);
      }
    }
    return Ok(());
  }

  pub fn subscribers_for_execution(&self, execution_id: &str) -> Vec<LogStreamSubscription> {
    let inner = self.inner.read();
    let Some(ids) = inner.log_by_execution.get(execution_id) else {
      return Vec::new();
    };
    return ids.iter().filter_map(|id| inner.log_subs.get(id).cloned()).collect();
  }

  // ---- Global-log subscriptions -----------------------------------------------------------

  pub fn create_global_log_subscription(
    &self,
    id: String,
    session_id: impl Into<String>,
    category: Option<String>,
    levels: Option<HashSet<String>>,
  ) -> GlobalLogSubscription {
    let sub = GlobalLogSubscription {
      id: id.clone(),
      session_id: session_id.into(),
      category,
      levels,
    };

    let mut inner = self.inner.write();
    inner
      .global_log_by_session
      .entry(sub.session_id.clone())
      .or_default()
      .insert(id.clone());
    inner.global_log_subs.insert(id, sub.clone());

    return sub;
  }

  pub fn remove_global_log_subscription(&self, id: &str) -> HubResult<()> {
    let mut inner = self.inner.write();
    let Some(sub) = inner.global_log_subs.remove(id) else {
      return Err(HubError::AllLogsSubscriptionNotFound);
    };
    if let Some(set) = inner.global_log_by_session.get_mut(&sub.session_id) {
      set.remove(id);
      if set.is_empty() {
        inner.global_log_by_session.remove(&sub.session_id);
      }
    }
    return Ok(());
  }

  pub fn global_log_subscribers(&self) -> Vec<GlobalLogSubscription> {
    return self.inner.read().global_log_subs.values().cloned().collect();
  }

  // ---- Stats --------------------------------------------------------------------------------

  pub fn stats(&self) -> RegistryStats {
    let inner = self.inner.read();
    return RegistryStats {
      total_subscriptions: inner.row_subs.len() + inner.log_subs.len() + inner.global_log_subs.len(),
      distinct_users_with_subs: inner.users_with_subs.len(),
      distinct_tables_with_subs: inner.tables_with_subs.len(),
    };
  }
}
