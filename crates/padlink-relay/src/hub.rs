//! The subscription table and publish fan-out.
//!
//! Channels exist implicitly: subscribing to an unknown channel creates it,
//! removing the last subscriber forgets it. Delivery is best effort — a
//! subscriber whose outbound queue has closed is pruned on the next publish
//! touching its channel.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use padlink_core::signaling::RelayDelivery;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One subscriber: the owning connection and its outbound frame queue.
struct Subscriber {
    conn_id: u64,
    outbound: mpsc::UnboundedSender<String>,
}

/// Channel-name → subscriber list.
#[derive(Default)]
pub struct Hub {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn_id` as a subscriber of `channel`. Subscribing twice to the
    /// same channel is a no-op so reconnect-time re-subscribes stay cheap.
    pub fn subscribe(&self, conn_id: u64, channel: &str, outbound: mpsc::UnboundedSender<String>) {
        let mut topics = self.lock();
        let subscribers = topics.entry(channel.to_string()).or_default();
        if subscribers.iter().any(|s| s.conn_id == conn_id) {
            return;
        }
        subscribers.push(Subscriber { conn_id, outbound });
        debug!("connection {conn_id} subscribed to {channel}");
    }

    /// Removes `conn_id` from `channel`.
    pub fn unsubscribe(&self, conn_id: u64, channel: &str) {
        let mut topics = self.lock();
        if let Some(subscribers) = topics.get_mut(channel) {
            subscribers.retain(|s| s.conn_id != conn_id);
            if subscribers.is_empty() {
                topics.remove(channel);
            }
        }
    }

    /// Removes `conn_id` from every channel; called when its socket closes.
    pub fn drop_connection(&self, conn_id: u64) {
        let mut topics = self.lock();
        topics.retain(|_, subscribers| {
            subscribers.retain(|s| s.conn_id != conn_id);
            !subscribers.is_empty()
        });
    }

    /// Fans `data` out to every current subscriber of `channel`, the
    /// publishing connection included when it is subscribed. Returns the
    /// number of queues the frame was delivered to.
    pub fn publish(&self, channel: &str, data: &serde_json::Value) -> usize {
        let frame = match serde_json::to_string(&RelayDelivery {
            channel: channel.to_string(),
            data: data.clone(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("undeliverable publish on {channel}: {e}");
                return 0;
            }
        };

        let mut topics = self.lock();
        let Some(subscribers) = topics.get_mut(channel) else {
            debug!("publish on {channel} with no subscribers");
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.outbound.send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // The connection's writer is gone; prune it.
            Err(_) => false,
        });
        if subscribers.is_empty() {
            topics.remove(channel);
        }
        delivered
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    fn delivered(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<RelayDelivery> {
        rx.try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    #[test]
    fn test_publish_reaches_every_subscriber_of_the_channel() {
        let hub = Hub::new();
        let (tx1, mut rx1) = queue();
        let (tx2, mut rx2) = queue();
        hub.subscribe(1, "/p1", tx1);
        hub.subscribe(2, "/p1", tx2);

        let count = hub.publish("/p1", &json!({"type": "offer", "sdp": "v=0"}));

        assert_eq!(count, 2);
        assert_eq!(delivered(&mut rx1).unwrap().channel, "/p1");
        assert_eq!(delivered(&mut rx2).unwrap().data["type"], "offer");
    }

    #[test]
    fn test_publisher_receives_its_own_publish_when_subscribed() {
        // The candidate marker scheme on the peers depends on this loopback.
        let hub = Hub::new();
        let (tx, mut rx) = queue();
        hub.subscribe(1, "/p1", tx);

        hub.publish("/p1", &json!({"type": "candidate", "mark": "m1"}));

        assert_eq!(delivered(&mut rx).unwrap().data["mark"], "m1");
    }

    #[test]
    fn test_publish_is_scoped_to_its_channel() {
        let hub = Hub::new();
        let (tx1, mut rx1) = queue();
        let (tx2, mut rx2) = queue();
        hub.subscribe(1, "/p1", tx1);
        hub.subscribe(2, "/p2", tx2);

        hub.publish("/p1", &json!({"n": 1}));

        assert!(delivered(&mut rx1).is_some());
        assert!(delivered(&mut rx2).is_none());
    }

    #[test]
    fn test_publish_without_subscribers_delivers_nowhere() {
        let hub = Hub::new();
        assert_eq!(hub.publish("/empty", &json!({})), 0);
    }

    #[test]
    fn test_duplicate_subscribe_is_a_no_op() {
        let hub = Hub::new();
        let (tx, mut rx) = queue();
        hub.subscribe(1, "/p1", tx.clone());
        hub.subscribe(1, "/p1", tx);

        assert_eq!(hub.publish("/p1", &json!({})), 1);
        assert!(delivered(&mut rx).is_some());
        assert!(delivered(&mut rx).is_none(), "one delivery, not two");
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_forgets_empty_channels() {
        let hub = Hub::new();
        let (tx, mut rx) = queue();
        hub.subscribe(1, "/p1", tx);
        assert_eq!(hub.channel_count(), 1);

        hub.unsubscribe(1, "/p1");

        assert_eq!(hub.publish("/p1", &json!({})), 0);
        assert!(delivered(&mut rx).is_none());
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_drop_connection_removes_it_from_every_channel() {
        let hub = Hub::new();
        let (tx, _rx) = queue();
        let (other_tx, mut other_rx) = queue();
        hub.subscribe(1, "/p1", tx.clone());
        hub.subscribe(1, "/p2", tx);
        hub.subscribe(2, "/p1", other_tx);

        hub.drop_connection(1);

        assert_eq!(hub.publish("/p1", &json!({})), 1);
        assert!(delivered(&mut other_rx).is_some());
        assert_eq!(hub.publish("/p2", &json!({})), 0);
    }

    #[test]
    fn test_closed_subscriber_queues_are_pruned_on_publish() {
        let hub = Hub::new();
        let (tx, rx) = queue();
        hub.subscribe(1, "/p1", tx);
        drop(rx);

        assert_eq!(hub.publish("/p1", &json!({})), 0);
        assert_eq!(hub.channel_count(), 0, "dead channel must be forgotten");
    }
}
