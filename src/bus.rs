use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

use crate::cache::StatusSnapshot;

/// Payload carried on a device's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Status(Arc<StatusSnapshot>),
    /// The link to the device was lost.
    Disconnected,
}

type Channel = watch::Sender<Option<Signal>>;

/// One broadcast channel per device id. Delivery keeps only the latest
/// signal: a subscriber that falls behind sees the newest snapshot and skips
/// the ones in between.
#[derive(Clone, Default)]
pub struct DispatchBus {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl DispatchBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, device_id: &str) -> Channel {
        self.channels
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    pub fn publish(&self, device_id: &str, signal: Signal) {
        let channel = self.channel(device_id);
        trace!(device_id, subscribers = channel.receiver_count(), "publishing signal");
        channel.send_replace(Some(signal));
    }

    /// Runs `handler` on its own task for every signal published after this
    /// call. Subscribers never wait on each other.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, device_id: &str, mut handler: F) -> Subscription
    where
        F: FnMut(Signal) + Send + 'static,
    {
        let mut rx = self.channel(device_id).subscribe();
        let id = Uuid::new_v4();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let signal = rx.borrow_and_update().clone();
                if let Some(signal) = signal {
                    handler(signal);
                }
            }
        });
        trace!(device_id, %id, "subscribed");
        Subscription {
            id,
            device_id: device_id.to_string(),
            task,
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        trace!(device_id = %subscription.device_id, id = %subscription.id, "unsubscribed");
        drop(subscription);
    }

    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.channels
            .lock()
            .get(device_id)
            .map_or(0, watch::Sender::receiver_count)
    }

    /// Drops the device's channel. Running subscriptions end once they
    /// observe the closed channel.
    pub fn remove(&self, device_id: &str) {
        self.channels.lock().remove(device_id);
    }
}

/// Handle for one subscriber. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    device_id: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
