//! Session Manager (§4.5): creates/destroys sessions, enforces global/per-user/per-IP caps,
//! tracks slow clients, broadcasts to local subscribers, and integrates with the Pub/Sub Bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::AbortHandle;

use crate::bus::{BusReceiver, PubSubBus, BROADCAST_CHANNEL};
use crate::claims::Claims;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::registry::SubscriptionRegistry;
use crate::session::Session;
use crate::wire::{BroadcastEnvelope, ServerMessage};

struct Inner {
  sessions: HashMap<String, Arc<Session>>,
  per_user: HashMap<String, usize>,
  per_ip: HashMap<String, usize>,
}

impl Default for Inner {
  fn default() -> Self {
    return Self {
      sessions: HashMap::new(),
      per_user: HashMap::new(),
      per_ip: HashMap::new(),
    };
  }
}

struct ManagerState {
  config: RwLock<HubConfig>,
  inner: RwLock<Inner>,
  registry: Arc<SubscriptionRegistry>,
  bus: RwLock<Option<Arc<dyn PubSubBus>>>,
  slow_clients_disconnected: AtomicU64,
  sweep_handle: Mutex<Option<AbortHandle>>,
  bus_consumer_handle: Mutex<Option<AbortHandle>>,
}

/// A clonable handle over the manager's shared state, mirroring the teacher's
/// `Arc<InternalState>` + clonable-wrapper pattern (`app_state.rs`) so the background sweep task
/// can hold its own owned handle without a lifetime tied to the caller.
#[derive(Clone)]
pub struct SessionManager {
  state: Arc<ManagerState>,
}

impl SessionManager {
  pub fn new(config: HubConfig, registry: Arc<SubscriptionRegistry>) -> Self {
    return Self {
      state: Arc::new(ManagerState {
        config: RwLock::new(config.normalized()),
        inner: RwLock::new(Inner::default()),
        registry,
        bus: RwLock::new(None),
        slow_clients_disconnected: AtomicU64::new(0),
        sweep_handle: Mutex::new(None),
        bus_consumer_handle: Mutex::new(None),
      }),
    };
  }

  pub fn add(
    &self,
    id: impl Into<String>,
    user_id: Option<String>,
    role: impl Into<String>,
    claims: Claims,
    peer_address: impl Into<String>,
  ) -> HubResult<Arc<Session>> {
    let id = id.into();
    let peer_address = peer_address.into();
    let cfg = self.state.config.read().clone();

    // All three checks plus the eventual increment happen under one write-lock acquisition so
    // the limit check and the corresponding counter bump are atomic relative to concurrent
    // `add`/`remove` calls (§4.5: "the three counts are atomic").
    let mut inner = self.state.inner.write();

    if cfg.max_connections > 0 && inner.sessions.len() >= cfg.max_connections {
      return Err(HubError::MaxConnectionsReached);
    }

    if let Some(uid) = &user_id {
      if cfg.max_connections_per_user > 0 {
        let count = inner.per_user.get(uid).copied().unwrap_or(0);
        if count >= cfg.max_connections_per_user {
          return Err(HubError::MaxUserConnectionsReached);
        }
      }
    } else if cfg.max_connections_per_ip > 0 {
      let count = inner.per_ip.get(&peer_address).copied().unwrap_or(0);
      if count >= cfg.max_connections_per_ip {
        return Err(HubError::MaxIpConnectionsReached);
      }
    }

    let session = Arc::new(Session::new(
      id.clone(),
      user_id.clone(),
      role,
      claims,
      peer_address.clone(),
      cfg.client_message_queue_size,
    ));

    inner.sessions.insert(id, session.clone());
    if let Some(uid) = user_id {
      *inner.per_user.entry(uid).or_insert(0) += 1;
    } else {
      *inner.per_ip.entry(peer_address).or_insert(0) += 1;
    }

    return Ok(session);
  }

  /// Idempotent on an unknown id (§4.5).
  pub fn remove(&self, id: &str) {
    let session = {
      let mut inner = self.state.inner.write();
      let Some(session) = inner.sessions.remove(id) else {
        return;
      };

      if let Some(uid) = &session.user_id {
        if let Some(count) = inner.per_user.get_mut(uid) {
          *count -= 1;
          if *count == 0 {
            inner.per_user.remove(uid);
          }
        }
      } else if let Some(count) = inner.per_ip.get_mut(&session.peer_address) {
        *count -= 1;
        if *count == 0 {
          inner.per_ip.remove(&session.peer_address);
        }
      }

      session
    };

    session.close();
    self.state.registry.remove_subscriptions_for_session(id);
  }

  pub fn count(&self) -> usize {
    return self.state.inner.read().sessions.len();
  }

  pub fn count_for_user(&self, user_id: &str) -> usize {
    return self.state.inner.read().per_user.get(user_id).copied().unwrap_or(0);
  }

  pub fn count_for_ip(&self, ip: &str) -> usize {
    return self.state.inner.read().per_ip.get(ip).copied().unwrap_or(0);
  }

  pub fn slow_clients_disconnected(&self) -> u64 {
    return self.state.slow_clients_disconnected.load(Ordering::Relaxed);
  }

  pub fn session(&self, id: &str) -> Option<Arc<Session>> {
    return self.state.inner.read().sessions.get(id).cloned();
  }

  /// Delivers `message` to every local session subscribed to `channel` (§4.5). Never blocks:
  /// delivery to each session is the session's own non-blocking enqueue.
  pub fn broadcast_to_channel(&self, channel: &str, message: &ServerMessage) -> usize {
    let targets: Vec<Arc<Session>> = {
      let inner = self.state.inner.read();
      inner
        .sessions
        .values()
        .filter(|s| s.subscribed(channel))
        .cloned()
        .collect()
    };

    let mut delivered = 0;
    for session in targets {
      if session.try_enqueue(message.clone()) {
        delivered += 1;
      }
    }
    return delivered;
  }

  /// Delivers a postgres_changes-style payload directly to a single session by id (used by the
  /// Change Ingestor, §4.6 step 3), returning whether it was enqueued (as opposed to dropped or
  /// the session no longer existing).
  pub fn enqueue_to(&self, session_id: &str, message: ServerMessage) -> bool {
    let Some(session) = self.state.inner.read().sessions.get(session_id).cloned() else {
      return false;
    };
    return session.try_enqueue(message);
  }

  /// §4.5: if a bus is attached, publish `{channel, message}` to the well-known broadcast
  /// channel; otherwise behave exactly as `broadcast_to_channel`.
  ///
  /// When a bus *is* attached, local delivery on this instance happens exclusively through this
  /// instance's own bus-subscription consumer loop (the same path a remote instance uses) rather
  /// than also delivering directly here — that would double-deliver to local sessions once the
  /// consumer loop echoes the publish back. This instance therefore can't report a synchronous
  /// local delivery count in that branch; it returns 0 and lets the consumer's own
  /// `broadcast_to_channel` call be the (already counted, just not returned here) delivery path.
  pub async fn broadcast_global(&self, channel: &str, message: &ServerMessage) -> usize {
    let bus = self.state.bus.read().clone();
    let Some(bus) = bus else {
      return self.broadcast_to_channel(channel, message);
    };

    let envelope = BroadcastEnvelope {
      channel: channel.to_string(),
      message: message.clone(),
    };
    if let Ok(bytes) = serde_json::to_vec(&envelope) {
      bus.publish(BROADCAST_CHANNEL, bytes).await;
    }
    return 0;
  }

  pub fn set_connection_limits(&self, per_user: usize, per_ip: usize) {
    let mut cfg = self.state.config.write();
    cfg.max_connections_per_user = per_user;
    cfg.max_connections_per_ip = per_ip;
  }

  pub fn set_max_connections(&self, n: usize) {
    self.state.config.write().max_connections = n;
  }

  /// Attaches a Pub/Sub Bus and subscribes to the broadcast channel; each received message is
  /// delivered locally via `broadcast_to_channel`. Invalid payloads are logged and discarded
  /// (§4.5).
  pub fn attach_bus(&self, bus: Arc<dyn PubSubBus>) {
    *self.state.bus.write() = Some(bus.clone());

    let manager = self.clone();
    let handle = tokio::spawn(async move {
      let mut receiver: BusReceiver = bus.subscribe(BROADCAST_CHANNEL).await;
      while let Some(bytes) = receiver.recv().await {
        match serde_json::from_slice::<BroadcastEnvelope>(&bytes) {
          Ok(envelope) => {
            manager.broadcast_to_channel(&envelope.channel, &envelope.message);
          }
          Err(err) => {
            log::warn!("discarding invalid cross-instance broadcast payload: {err}");
          }
        }
      }
    });

    *self.state.bus_consumer_handle.lock() = Some(handle.abort_handle());
  }

  /// Starts the background slow-client sweep (§4.5). Returns the handle's abort token is kept
  /// internally; call `shutdown` to stop it.
  pub fn start_slow_client_sweep(&self) {
    let manager = self.clone();
    let handle = tokio::spawn(async move {
      loop {
        let interval = manager.state.config.read().sweep_interval;
        tokio::time::sleep(interval).await;
        manager.sweep_slow_clients();
      }
    });
    *self.state.sweep_handle.lock() = Some(handle.abort_handle());
  }

  /// Runs a single sweep tick synchronously; exposed separately from the spawned loop so tests
  /// can drive it deterministically (§8 scenario 5) instead of racing a timer.
  pub fn sweep_slow_clients(&self) {
    let cfg = self.state.config.read().clone();
    let targets: Vec<Arc<Session>> = self.state.inner.read().sessions.values().cloned().collect();

    for session in targets {
      let stats = session.stats();
      if stats.length > cfg.slow_client_threshold {
        session.mark_slow_if_unset();
        if let Some(first_seen) = session.first_seen_slow() {
          if first_seen.elapsed() > cfg.slow_client_timeout {
            self.remove(&session.id);
            self.state.slow_clients_disconnected.fetch_add(1, Ordering::Relaxed);
          }
        }
      } else {
        session.clear_slow();
      }
    }
  }

  /// Cancels the sweep task, closes all sessions, and clears all counters (§4.5).
  pub async fn shutdown(&self) {
    if let Some(handle) = self.state.sweep_handle.lock().take() {
      handle.abort();
    }
    if let Some(handle) = self.state.bus_consumer_handle.lock().take() {
      handle.abort();
    }
    if let Some(bus) = self.state.bus.write().take() {
      bus.close().await;
    }

    let mut inner = self.state.inner.write();
    for session in inner.sessions.values() {
      session.close();
      self.state.registry.remove_subscriptions_for_session(&session.id);
    }
    inner.sessions.clear();
    inner.per_user.clear();
    inner.per_ip.clear();
  }
}
