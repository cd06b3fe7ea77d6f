//! Cross-tab notification bus.
//!
//! A latency optimization layered over the shared store: messages are hints
//! that shorten polling delay, never the source of truth. Delivery is
//! at-most-once per subscriber and nothing is persisted, so every receiver
//! re-derives its decisions from a store read on the next tick. The
//! protocol stays correct with no bus at all (poll-only).

use invigil_core::types::{TabMessage, TabToken};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

/// Handle to the per-attempt broadcast channel. Clone one per tab session.
#[derive(Debug, Clone)]
pub struct TabBus {
    tx: broadcast::Sender<TabMessage>,
}

impl TabBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish, best-effort. A bus with no listeners is not an error.
    pub fn publish(&self, message: TabMessage) {
        let _ = self.tx.send(message);
    }

    /// Subscribe, filtering out this tab's own messages: a tab never reacts
    /// to what it published itself.
    pub fn subscribe(&self, own_token: TabToken) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
            own_token,
        }
    }
}

impl Default for TabBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the bus for one tab.
pub struct BusSubscription {
    rx: broadcast::Receiver<TabMessage>,
    own_token: TabToken,
}

impl BusSubscription {
    /// Next foreign message, or `None` once the channel is closed.
    ///
    /// Lag (messages missed under backpressure) is survivable because the
    /// store remains ground truth; we log and keep receiving.
    pub async fn recv(&mut self) -> Option<TabMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) if message.is_from(&self.own_token) => continue,
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("bus lagged, skipped {skipped} messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn foreign_messages_are_delivered() {
        let bus = TabBus::new();
        let mut sub = bus.subscribe(TabToken::new("me"));

        bus.publish(TabMessage::Heartbeat {
            token: TabToken::new("other"),
        });

        let message = sub.recv().await.expect("message");
        assert_eq!(message.token(), &TabToken::new("other"));
    }

    #[tokio::test]
    async fn own_messages_are_filtered() {
        let bus = TabBus::new();
        let mut sub = bus.subscribe(TabToken::new("me"));

        bus.publish(TabMessage::Heartbeat {
            token: TabToken::new("me"),
        });
        bus.publish(TabMessage::MasterClaimed {
            token: TabToken::new("other"),
        });

        // The own-token heartbeat is skipped; the foreign claim comes through.
        let message = sub.recv().await.expect("message");
        assert_eq!(
            message,
            TabMessage::MasterClaimed {
                token: TabToken::new("other"),
            }
        );
    }

    #[tokio::test]
    async fn closed_bus_yields_none() {
        let bus = TabBus::new();
        let mut sub = bus.subscribe(TabToken::new("me"));
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = TabBus::new();
        bus.publish(TabMessage::TabClosing {
            token: TabToken::new("t"),
        });
    }
}
