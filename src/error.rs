use thiserror::Error;

/// Errors surfaced by the core back to callers (typically mapped to a wire `error` message).
///
/// NOTE: deliberately no blanket `#[from]` impls — conversions from adapter errors are handled
/// explicitly at the call site so a failure always collapses to the fail-closed behavior §7
/// specifies (deny, discard, or session removal) rather than bubbling up as a generic variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
  #[error("invalid filter")]
  InvalidFilter,

  #[error("table not enabled for realtime")]
  TableNotEnabledForRealtime,

  #[error("subscription not found")]
  SubscriptionNotFound,

  #[error("log subscription not found")]
  LogSubscriptionNotFound,

  #[error("execution not found")]
  ExecutionNotFound,

  #[error("forbidden")]
  Forbidden,

  #[error("all-logs subscription not found")]
  AllLogsSubscriptionNotFound,

  #[error("max_connections_reached")]
  MaxConnectionsReached,

  #[error("max_user_connections_reached")]
  MaxUserConnectionsReached,

  #[error("max_ip_connections_reached")]
  MaxIpConnectionsReached,
}

impl HubError {
  /// The wire-visible error string (§7: "a distinguishable error string").
  pub fn wire_code(&self) -> &'static str {
    return match self {
      Self::InvalidFilter => "invalid filter",
      Self::TableNotEnabledForRealtime => "table not enabled for realtime",
      Self::SubscriptionNotFound => "subscription not found",
      Self::LogSubscriptionNotFound => "log subscription not found",
      Self::ExecutionNotFound => "execution not found",
      Self::Forbidden => "forbidden",
      Self::AllLogsSubscriptionNotFound => "all-logs subscription not found",
      Self::MaxConnectionsReached => "max_connections_reached",
      Self::MaxUserConnectionsReached => "max_user_connections_reached",
      Self::MaxIpConnectionsReached => "max_ip_connections_reached",
    };
  }
}

pub type HubResult<T> = Result<T, HubError>;
