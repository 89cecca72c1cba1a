//! Identity claims: an opaque JSON mapping carried on sessions and snapshotted onto row
//! subscriptions, plus a deterministic digest used as part of access-cache keys (§4.2, §9).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value as JsonValue};

pub type Claims = Map<String, JsonValue>;

/// A stable hash of a claims mapping, independent of key insertion order.
///
/// Two mappings with the same keys/values (regardless of order) digest identically; this is what
/// lets the access cache treat an `updateClaims` call as implicitly invalidating stale entries
/// (§9 open question) without an explicit eviction pass: the digest simply changes, so any new
/// lookup misses and refreshes through the Access Authority.
pub fn digest_claims(claims: &Claims) -> u64 {
  let mut keys: Vec<&String> = claims.keys().collect();
  keys.sort();

  let mut hasher = DefaultHasher::new();
  for key in keys {
    key.hash(&mut hasher);
    // serde_json::Value doesn't implement Hash; canonicalize via its compact string form, which
    // is stable for a given value (map keys inside nested objects are BTreeMap-ordered only if
    // the `preserve_order` feature is off, which is our dependency's default).
    claims[key].to_string().hash(&mut hasher);
  }
  return hasher.finish();
}

/// Deep-copies a claims mapping so snapshots taken at subscribe time never alias the session's
/// live mapping (§3 invariant: "never aliased with other sessions").
pub fn clone_claims(claims: &Claims) -> Claims {
  return claims.clone();
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn claims_of(value: JsonValue) -> Claims {
    return value.as_object().unwrap().clone();
  }

  #[test]
  fn digest_is_order_independent() {
    let a = claims_of(json!({"sub": "u1", "role": "admin"}));
    let b = claims_of(json!({"role": "admin", "sub": "u1"}));
    assert_eq!(digest_claims(&a), digest_claims(&b));
  }

  #[test]
  fn digest_changes_with_value() {
    let a = claims_of(json!({"sub": "u1"}));
    let b = claims_of(json!({"sub": "u2"}));
    assert_ne!(digest_claims(&a), digest_claims(&b));
  }

  #[test]
  fn clone_defeats_aliasing() {
    let mut original = claims_of(json!({"sub": "u1"}));
    let snapshot = clone_claims(&original);
    original.insert("sub".to_string(), json!("u2"));
    assert_eq!(snapshot.get("sub").unwrap(), "u1");
  }
}
