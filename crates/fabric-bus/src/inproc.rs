//! An in-process `Bus` implementation. No real NATS connection: every
//! Connector that shares one `InProcBus` instance shares one process-local
//! message fabric, which is what the test harness and single-binary demos
//! run against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

use fabric_errors::Error;

use crate::bus::{Bus, BusSubscription};

type Sender = mpsc::UnboundedSender<Vec<u8>>;

#[derive(Default)]
struct QueueGroup {
    members: Vec<Sender>,
    next: usize,
}

#[derive(Default)]
struct SubjectSubscribers {
    groups: HashMap<String, QueueGroup>,
    plain: Vec<Sender>,
}

#[derive(Default)]
pub struct InProcBus {
    subjects: RwLock<HashMap<String, SubjectSubscribers>>,
}

impl InProcBus {
    pub fn new() -> Self {
        InProcBus::default()
    }
}

#[async_trait]
impl Bus for InProcBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, Error> {
        let mut subjects = self.subjects.write().await;
        let Some(subs) = subjects.get_mut(subject) else {
            trace!(subject, "publish with no subscribers");
            return Ok(0);
        };

        let mut reached = 0usize;

        for group in subs.groups.values_mut() {
            group.members.retain(|s| !s.is_closed());
            if group.members.is_empty() {
                continue;
            }
            group.next %= group.members.len();
            let mut attempts = 0;
            while attempts < group.members.len() {
                let idx = (group.next + attempts) % group.members.len();
                if group.members[idx].send(payload.clone()).is_ok() {
                    reached += 1;
                    group.next = (idx + 1) % group.members.len();
                    break;
                }
                attempts += 1;
            }
        }

        subs.plain.retain(|s| !s.is_closed());
        for s in &subs.plain {
            if s.send(payload.clone()).is_ok() {
                reached += 1;
            }
        }

        Ok(reached)
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<String>,
    ) -> Result<BusSubscription, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subjects = self.subjects.write().await;
        let subs = subjects.entry(subject.to_owned()).or_default();
        match queue_group {
            Some(group) => subs.groups.entry(group).or_default().members.push(tx),
            None => subs.plain.push(tx),
        }
        Ok(BusSubscription::new(subject, rx))
    }
}

pub type SharedBus = Arc<dyn Bus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_subscribers_all_receive_a_publish() {
        let bus = InProcBus::new();
        let mut a = bus.subscribe("s", None).await.unwrap();
        let mut b = bus.subscribe("s", None).await.unwrap();
        let reached = bus.publish("s", b"hello".to_vec()).await.unwrap();
        assert_eq!(reached, 2);
        assert_eq!(a.recv().await.unwrap(), b"hello");
        assert_eq!(b.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn queue_group_delivers_to_exactly_one_member() {
        let bus = InProcBus::new();
        let mut a = bus.subscribe("s", Some("g".to_owned())).await.unwrap();
        let mut b = bus.subscribe("s", Some("g".to_owned())).await.unwrap();
        let reached = bus.publish("s", b"x".to_vec()).await.unwrap();
        assert_eq!(reached, 1);
        let got_a = a.receiver_has_message();
        let got_b = b.receiver_has_message();
        assert_ne!(got_a, got_b);
    }

    #[tokio::test]
    async fn queue_group_round_robins_across_publishes() {
        let bus = InProcBus::new();
        let mut a = bus.subscribe("s", Some("g".to_owned())).await.unwrap();
        let mut b = bus.subscribe("s", Some("g".to_owned())).await.unwrap();
        bus.publish("s", b"1".to_vec()).await.unwrap();
        bus.publish("s", b"2".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"1");
        assert_eq!(b.recv().await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn publish_to_unknown_subject_reaches_nobody() {
        let bus = InProcBus::new();
        let reached = bus.publish("nobody-home", b"x".to_vec()).await.unwrap();
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_and_not_counted() {
        let bus = InProcBus::new();
        {
            let _dropped = bus.subscribe("s", None).await.unwrap();
        }
        let mut kept = bus.subscribe("s", None).await.unwrap();
        let reached = bus.publish("s", b"x".to_vec()).await.unwrap();
        assert_eq!(reached, 1);
        assert_eq!(kept.recv().await.unwrap(), b"x");
    }

    impl BusSubscription {
        fn receiver_has_message(&mut self) -> bool {
            self.receiver.try_recv().is_ok()
        }
    }
}
