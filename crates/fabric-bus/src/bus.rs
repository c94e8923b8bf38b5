//! The `Bus` abstraction a Connector publishes and subscribes through.

use async_trait::async_trait;

use fabric_errors::Error;

/// A live subscription: a stream of raw payloads delivered to this
/// subscriber. Dropping it stops delivery; the bus prunes dead senders
/// lazily on the next publish to the same subject.
pub struct BusSubscription {
    subject: String,
    pub(crate) receiver: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

impl BusSubscription {
    pub fn new(subject: impl Into<String>, receiver: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        BusSubscription {
            subject: subject.into(),
            receiver,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

/// A publish/subscribe transport. `InProcBus` (this crate) is the only
/// implementation; the trait exists so the subscription and publication
/// engines depend on a seam rather than a concrete transport.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes `payload` to `subject`. Returns the number of distinct
    /// subscribers the message actually reached: for a queue-grouped
    /// subject that is at most one per group; for a plain subject it is
    /// every live subscriber. The publication engine uses this count as the
    /// bus-provided "expected responders" signal for a multicast call.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, Error>;

    /// Subscribes to `subject`. When `queue_group` is `Some`, this
    /// subscription competes with every other subscriber in the same group
    /// for each message; `None` means a plain subscription that receives
    /// every publish to the subject.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<String>,
    ) -> Result<BusSubscription, Error>;
}
