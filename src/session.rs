//! Session (§4.4): per-client identity, claims, local channel-set membership, and the bounded
//! outbound queue with its single writer (fan-out) / single drainer (writer loop) contract.

use std::collections::HashSet;
use std::time::Instant;

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::claims::Claims;
use crate::wire::ServerMessage;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
  pub length: usize,
  pub capacity: usize,
  pub dropped_count: u64,
}

pub struct Session {
  pub id: String,
  pub user_id: Option<String>,
  pub peer_address: String,
  pub created_at: Instant,

  role: Mutex<String>,
  claims: Mutex<Claims>,
  channels: Mutex<HashSet<String>>,

  sender: Sender<ServerMessage>,
  receiver: Receiver<ServerMessage>,
  capacity: usize,
  dropped_count: std::sync::atomic::AtomicU64,
  first_seen_slow: Mutex<Option<Instant>>,
}

impl Session {
  pub fn new(
    id: impl Into<String>,
    user_id: Option<String>,
    role: impl Into<String>,
    claims: Claims,
    peer_address: impl Into<String>,
    queue_capacity: usize,
  ) -> Self {
    let (sender, receiver) = async_channel::bounded(queue_capacity.max(1));
    return Self {
      id: id.into(),
      user_id,
      peer_address: peer_address.into(),
      created_at: Instant::now(),
      role: Mutex::new(role.into()),
      claims: Mutex::new(claims),
      channels: Mutex::new(HashSet::new()),
      sender,
      receiver,
      capacity: queue_capacity.max(1),
      dropped_count: std::sync::atomic::AtomicU64::new(0),
      first_seen_slow: Mutex::new(None),
    };
  }

  pub fn role(&self) -> String {
    return self.role.lock().clone();
  }

  pub fn set_role(&self, role: impl Into<String>) {
    *self.role.lock() = role.into();
  }

  pub fn claims(&self) -> Claims {
    return self.claims.lock().clone();
  }

  /// Replaces the whole claims mapping atomically (§3 invariant).
  pub fn set_claims(&self, claims: Claims) {
    *self.claims.lock() = claims;
  }

  pub fn subscribe_channel(&self, channel: impl Into<String>) {
    self.channels.lock().insert(channel.into());
  }

  pub fn unsubscribe_channel(&self, channel: &str) {
    self.channels.lock().remove(channel);
  }

  pub fn subscribed(&self, channel: &str) -> bool {
    return self.channels.lock().contains(channel);
  }

  /// Non-blocking enqueue (§4.4). Returns `true` if the message was enqueued, `false` if it was
  /// dropped because the queue is full (the caller is expected to also flag the session as slow
  /// via the session manager's bookkeeping, see §4.5).
  pub fn try_enqueue(&self, message: ServerMessage) -> bool {
    return match self.sender.try_send(message) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) => {
        self
          .dropped_count
          .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.mark_slow_if_unset();
        false
      }
      Err(TrySendError::Closed(_)) => false,
    };
  }

  /// Closes the outbound queue; the writer loop observes this once it has drained what remains.
  pub fn close(&self) {
    self.sender.close();
  }

  pub fn receiver(&self) -> Receiver<ServerMessage> {
    return self.receiver.clone();
  }

  pub fn stats(&self) -> QueueStats {
    return QueueStats {
      length: self.receiver.len(),
      capacity: self.capacity,
      dropped_count: self.dropped_count.load(std::sync::atomic::Ordering::Relaxed),
    };
  }

  pub fn first_seen_slow(&self) -> Option<Instant> {
    return *self.first_seen_slow.lock();
  }

  pub fn mark_slow_if_unset(&self) {
    let mut guard = self.first_seen_slow.lock();
    if guard.is_none() {
      *guard = Some(Instant::now());
    }
  }

  pub fn clear_slow(&self) {
    *self.first_seen_slow.lock() = None;
  }
}
