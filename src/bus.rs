//! Pub/Sub Bus adapter (§4.7): a narrow interface so in-process and out-of-process brokers are
//! interchangeable. The core treats the bus as best-effort, at-least-once within a single
//! receive, with no retries (§4.7).

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Well-known channel carrying channel-scoped broadcasts across instances (§6).
pub const BROADCAST_CHANNEL: &str = "__hub_broadcast__";
/// Well-known channel carrying global log delivery across instances (§4.7).
pub const LOGS_CHANNEL: &str = "__hub_logs__";

const PER_CHANNEL_CAPACITY: usize = 1024;

#[async_trait]
pub trait PubSubBus: Send + Sync {
  async fn publish(&self, channel: &str, bytes: Vec<u8>);

  /// Subscribes to `channel`. Each call creates an independent subscriber; all subscribers on the
  /// same channel receive every subsequent publish.
  async fn subscribe(&self, channel: &str) -> BusReceiver;

  async fn close(&self);
}

/// A receive handle for a bus subscription. `recv()` yields `None` once the bus is closed.
pub struct BusReceiver {
  inner: broadcast::Receiver<Vec<u8>>,
}

impl BusReceiver {
  pub async fn recv(&mut self) -> Option<Vec<u8>> {
    loop {
      return match self.inner.recv().await {
        Ok(bytes) => Some(bytes),
        // A slow subscriber that lagged behind the broadcast ring buffer: skip forward and keep
        // listening rather than treating it as closed (the bus is best-effort, §4.7).
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => None,
      };
    }
  }
}

/// A single-process pub/sub bus, suitable as the default adapter for a standalone instance and
/// for tests that simulate multiple instances sharing one bus (§8 scenario 6).
#[derive(Default)]
pub struct InProcessBus {
  channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl InProcessBus {
  pub fn new() -> Self {
    return Self::default();
  }

  fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
    return self
      .channels
      .entry(channel.to_string())
      .or_insert_with(|| broadcast::channel(PER_CHANNEL_CAPACITY).0)
      .clone();
  }
}

#[async_trait]
impl PubSubBus for InProcessBus {
  async fn publish(&self, channel: &str, bytes: Vec<u8>) {
    // No subscribers is not an error: best-effort delivery (§4.7).
    let _ = self.sender_for(channel).send(bytes);
  }

  async fn subscribe(&self, channel: &str) -> BusReceiver {
    return BusReceiver {
      inner: self.sender_for(channel).subscribe(),
    };
  }

  async fn close(&self) {
    self.channels.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn publish_reaches_all_subscribers() {
    let bus = InProcessBus::new();
    let mut a = bus.subscribe("room:1").await;
    let mut b = bus.subscribe("room:1").await;

    bus.publish("room:1", b"hello".to_vec()).await;

    assert_eq!(a.recv().await, Some(b"hello".to_vec()));
    assert_eq!(b.recv().await, Some(b"hello".to_vec()));
  }

  #[tokio::test]
  async fn different_channels_are_isolated() {
    let bus = InProcessBus::new();
    let mut a = bus.subscribe("room:1").await;
    bus.publish("room:2", b"nope".to_vec()).await;

    let result = tokio::time::timeout(std::time::Duration::from_millis(20), a.recv()).await;
    assert!(result.is_err(), "subscriber on a different channel should not receive");
  }

  #[tokio::test]
  async fn close_terminates_subscribers() {
    let bus = InProcessBus::new();
    let mut sub = bus.subscribe("room:1").await;
    bus.close().await;
    assert_eq!(sub.recv().await, None);
  }
}
