//! Configuration (§6, §12): a plain struct with documented per-field defaults. Non-positive
//! configured TTL/size-like values fall back to their defaults rather than erroring (§4.2).

use std::time::Duration;

pub const DEFAULT_CLIENT_MESSAGE_QUEUE_SIZE: usize = 256;
pub const DEFAULT_SLOW_CLIENT_THRESHOLD: usize = 100;
pub const DEFAULT_SLOW_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ACCESS_CACHE_MAX_SIZE: usize = 50_000;
pub const DEFAULT_ACCESS_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HubConfig {
  /// 0 => unlimited.
  pub max_connections: usize,
  /// 0 => unlimited.
  pub max_connections_per_user: usize,
  /// 0 => unlimited.
  pub max_connections_per_ip: usize,

  pub client_message_queue_size: usize,

  pub slow_client_threshold: usize,
  pub slow_client_timeout: Duration,

  pub access_cache_max_size: usize,
  pub access_cache_ttl: Duration,

  /// Not part of §6's external config surface; governs how often the slow-client sweeper ticks.
  pub sweep_interval: Duration,
}

impl Default for HubConfig {
  fn default() -> Self {
    return Self {
      max_connections: 0,
      max_connections_per_user: 0,
      max_connections_per_ip: 0,
      client_message_queue_size: DEFAULT_CLIENT_MESSAGE_QUEUE_SIZE,
      slow_client_threshold: DEFAULT_SLOW_CLIENT_THRESHOLD,
      slow_client_timeout: DEFAULT_SLOW_CLIENT_TIMEOUT,
      access_cache_max_size: DEFAULT_ACCESS_CACHE_MAX_SIZE,
      access_cache_ttl: DEFAULT_ACCESS_CACHE_TTL,
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
    };
  }
}

impl HubConfig {
  /// Maps non-positive/zero "should have a floor" values back to defaults. `max_connections*`
  /// fields are intentionally excluded: 0 there is the documented "unlimited" sentinel (§6), not
  /// an invalid input.
  pub fn normalized(mut self) -> Self {
    if self.client_message_queue_size == 0 {
      self.client_message_queue_size = DEFAULT_CLIENT_MESSAGE_QUEUE_SIZE;
    }
    if self.slow_client_threshold == 0 {
      self.slow_client_threshold = DEFAULT_SLOW_CLIENT_THRESHOLD;
    }
    if self.slow_client_timeout.is_zero() {
      self.slow_client_timeout = DEFAULT_SLOW_CLIENT_TIMEOUT;
    }
    if self.access_cache_max_size == 0 {
      self.access_cache_max_size = DEFAULT_ACCESS_CACHE_MAX_SIZE;
    }
    if self.access_cache_ttl.is_zero() {
      self.access_cache_ttl = DEFAULT_ACCESS_CACHE_TTL;
    }
    if self.sweep_interval.is_zero() {
      self.sweep_interval = DEFAULT_SWEEP_INTERVAL;
    }
    return self;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_matches_documented_defaults() {
    let cfg = HubConfig::default();
    assert_eq!(cfg.client_message_queue_size, 256);
    assert_eq!(cfg.slow_client_threshold, 100);
    assert_eq!(cfg.slow_client_timeout, Duration::from_secs(30));
    assert_eq!(cfg.max_connections, 0);
  }

  #[test]
  fn normalize_falls_back_on_zero() {
    let cfg = HubConfig {
      client_message_queue_size: 0,
      slow_client_threshold: 0,
      slow_client_timeout: Duration::ZERO,
      access_cache_max_size: 0,
      access_cache_ttl: Duration::ZERO,
      sweep_interval: Duration::ZERO,
      ..HubConfig::default()
    }
    .normalized();

    assert_eq!(cfg.client_message_queue_size, DEFAULT_CLIENT_MESSAGE_QUEUE_SIZE);
    assert_eq!(cfg.slow_client_threshold, DEFAULT_SLOW_CLIENT_THRESHOLD);
    assert_eq!(cfg.slow_client_timeout, DEFAULT_SLOW_CLIENT_TIMEOUT);
  }

  #[test]
  fn normalize_preserves_unlimited_sentinel() {
    let cfg = HubConfig {
      max_connections: 0,
      ..HubConfig::default()
    }
    .normalized();
    assert_eq!(cfg.max_connections, 0);
  }
}
