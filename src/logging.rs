//! Process-level logging setup (§10). Library code never calls this itself — it only ever emits
//! through `log::*`/`tracing::*` — this is the entry point a binary embedding the hub calls once
//! at startup, mirroring the teacher's separation between subscriber construction (`logging.rs`)
//! and the domain modules that merely emit events.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber with an env-filter defaulting to `info`.
///
/// Safe to call more than once; subsequent calls are no-ops (mirrors `tracing`'s own guard
/// behavior for a global default subscriber).
pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .try_init();
}
