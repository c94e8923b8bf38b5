//! A deterministic stand-in for [`fabric_core::RandomIdSource`].
//!
//! Tests that assert on a specific call id, or that want two connectors'
//! instance ids to sort predictably, swap this in through
//! [`fabric_core::Connector::with_id_source`] instead of drawing real
//! UUIDs.

use std::sync::atomic::{AtomicU64, Ordering};

use fabric_core::IdSource;

/// Mints `<prefix><n>` ids from a shared, monotonically increasing counter.
/// Cheap to clone: clones share the same counter.
#[derive(Clone)]
pub struct SequentialIdSource {
    prefix: &'static str,
    counter: std::sync::Arc<AtomicU64>,
}

impl SequentialIdSource {
    pub fn new(prefix: &'static str) -> Self {
        SequentialIdSource {
            prefix,
            counter: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}{n:08x}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let source = SequentialIdSource::new("test-");
        assert_eq!(source.next_id(), "test-00000000");
        assert_eq!(source.next_id(), "test-00000001");
    }

    #[test]
    fn clones_share_the_same_counter() {
        let a = SequentialIdSource::new("t-");
        let b = a.clone();
        assert_eq!(a.next_id(), "t-00000000");
        assert_eq!(b.next_id(), "t-00000001");
    }
}
