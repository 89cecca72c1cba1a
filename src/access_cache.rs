//! Access Cache (§4.2): bounded TTL cache keyed by (schema, table, role, record-id, claims-digest)
//! -> allow/deny, backed by a sharded concurrent map so readers never block each other on the
//! fan-out hot path (§5).

use std::time::{Duration, Instant};

use dashmap::DashMap;

const DEFAULT_MAX_SIZE: usize = 50_000;
const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccessCacheKey {
  pub schema: String,
  pub table: String,
  pub role: String,
  pub record_id: String,
  pub claims_digest: u64,
}

impl AccessCacheKey {
  pub fn new(
    schema: impl Into<String>,
    table: impl Into<String>,
    role: impl Into<String>,
    record_id: impl Into<String>,
    claims_digest: u64,
  ) -> Self {
    return Self {
      schema: schema.into(),
      table: table.into(),
      role: role.into(),
      record_id: record_id.into(),
      claims_digest,
    };
  }
}

struct Entry {
  allow: bool,
  inserted_at: Instant,
}

pub struct AccessCache {
  entries: DashMap<AccessCacheKey, Entry>,
  max_size: usize,
  ttl: Duration,
}

impl AccessCache {
  pub fn new(max_size: usize, ttl: Duration) -> Self {
    let max_size = if max_size == 0 { DEFAULT_MAX_SIZE } else { max_size };
    let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
    return Self {
      entries: DashMap::new(),
      max_size,
      ttl,
    };
  }

  /// Looks up a key. Returns `None` on miss, including a found-but-expired entry (§4.2: "returns
  /// not-found" past TTL).
  pub fn lookup(&self, key: &AccessCacheKey) -> Option<bool> {
    let entry = self.entries.get(key)?;
    if entry.inserted_at.elapsed() > self.ttl {
      return None;
    }
    return Some(entry.allow);
  }

  /// Stores a key's allow/deny verdict, evicting expired entries first and then arbitrary entries
  /// if still over capacity.
  pub fn store(&self, key: AccessCacheKey, allow: bool) {
    self.entries.insert(
      key,
      Entry {
        allow,
        inserted_at: Instant::now(),
      },
    );

    if self.entries.len() > self.max_size {
      self.evict_expired();
    }
    if self.entries.len() > self.max_size {
      self.evict_arbitrary();
    }
  }

  fn evict_expired(&self) {
    let ttl = self.ttl;
    self.entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
  }

  fn evict_arbitrary(&self) {
    let target = self.max_size;
    while self.entries.len() > target {
      let Some(victim) = self.entries.iter().next().map(|e| e.key().clone()) else {
        break;
      };
      self.entries.remove(&victim);
    }
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    return self.entries.len();
  }
}

impl Default for AccessCache {
  fn default() -> Self {
    return Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL);
  }
}
