//! A small harness for spinning up several connectors against one shared,
//! in-process bus, mirroring how `rt-test-utils::MockWsServer` gives the
//! timer services something real (if local) to dial into instead of a
//! hand-rolled stub per test file.

use std::sync::Arc;
use std::time::Duration;

use fabric_bus::{Bus, InProcBus};
use fabric_core::{Connector, IdSource};
use fabric_errors::Error;
use fabric_wire::{Response, ResponseQueue};

use crate::ids::SequentialIdSource;

/// Shared, in-process bus plus a deterministic id source every connector
/// built through it draws from. One `TestFabric` per test; every
/// `Connector` it builds can see every other one's subscriptions.
pub struct TestFabric {
    bus: Arc<dyn Bus>,
    ids: SequentialIdSource,
}

impl TestFabric {
    pub fn new() -> Self {
        TestFabric {
            bus: Arc::new(InProcBus::new()),
            ids: SequentialIdSource::new("test-"),
        }
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    /// Builds an unstarted connector sharing this harness's bus and id
    /// source. Callers still subscribe routes and call `startup`/`shutdown`
    /// themselves, same as against a real bus.
    pub fn connector(&self, hostname: impl Into<String>) -> Connector {
        let id_source: Arc<dyn IdSource> = Arc::new(self.ids.clone());
        Connector::with_id_source(hostname, self.bus.clone(), id_source)
    }
}

impl Default for TestFabric {
    fn default() -> Self {
        TestFabric::new()
    }
}

/// Drains `queue` until it closes or `deadline` elapses, whichever comes
/// first, returning everything collected so far either way. Tests that
/// assert an exact response count (a multicast fan-out, a fragment
/// reassembly) read better against a plain `Vec` than against repeated
/// `queue.pop()` calls.
pub async fn drain(queue: &ResponseQueue, deadline: Duration) -> Vec<Response> {
    let mut out = Vec::new();
    let budget = tokio::time::Instant::now() + deadline;
    loop {
        let remaining = budget.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, queue.pop()).await {
            Ok(Some(r)) => out.push(r),
            Ok(None) => break,
            Err(_) => break,
        }
    }
    out
}

/// Starts every connector in `connectors`, in order, failing fast on the
/// first error instead of leaving a partially-started fleet behind.
pub async fn start_all(connectors: &[Connector]) -> Result<(), Error> {
    for c in connectors {
        c.startup().await?;
    }
    Ok(())
}

/// Shuts every connector down with the given grace period, collecting (not
/// short-circuiting on) any failures so one stuck service doesn't stop the
/// rest of the fleet from being asked to drain.
pub async fn shutdown_all(connectors: &[Connector], grace: Duration) -> Result<(), Error> {
    let mut errors = Vec::new();
    for c in connectors {
        if let Err(e) = c.shutdown(grace).await {
            errors.push(e);
        }
    }
    match Error::join(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use fabric_core::SubscriptionOptions;
    use fabric_wire::Request;
    use http::Method;

    use crate::handlers::EchoHandler;

    use super::*;

    #[tokio::test]
    async fn two_connectors_share_the_harness_bus() {
        let fabric = TestFabric::new();
        let service = fabric.connector("echo.test");
        service
            .subscribe("POST", ":443/echo", StdArc::new(EchoHandler), SubscriptionOptions::default())
            .unwrap();
        let caller = fabric.connector("caller.test");
        start_all(&[service.clone(), caller.clone()]).await.unwrap();

        let request = Request::builder(Method::POST, "https://echo.test:443/echo")
            .body(b"ping".to_vec())
            .build()
            .unwrap();
        let queue = caller.publish(request).await.unwrap();
        let responses = drain(&queue, Duration::from_secs(1)).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), 200);

        shutdown_all(&[service, caller], Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn connectors_from_one_harness_draw_distinct_ids() {
        let fabric = TestFabric::new();
        let a = fabric.connector("a");
        let b = fabric.connector("b");
        assert_ne!(a.id(), b.id());
    }
}
