//! End-to-end scenarios mirroring the literal walkthroughs used to reason
//! about this runtime's testable properties: one call id round-tripping
//! through a single subscriber, a multicast fan-out with a partial
//! failure, loop detection on a self-forwarding middleware, deadline
//! propagation cancelling a slow handler, and a `SetConfig` observer
//! firing after the new value is already visible.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use fabric_core::{DeploymentMode, Handler, PublicationEngine, SubscriptionOptions};
use fabric_errors::{error_args, Error};
use fabric_wire::frame::headers;
use fabric_wire::{Frame, Request, Response};

use fabric_test_support::handlers::{EchoHandler, FailingHandler};
use fabric_test_support::{drain, shutdown_all, start_all, SequentialIdSource, TestFabric};

/// S1: unicast echo. Exactly one response, same body, status 200.
#[tokio::test]
async fn s1_unicast_echo() {
    let fabric = TestFabric::new();
    let service = fabric.connector("echo.core");
    service
        .subscribe("POST", ":443/echo", Arc::new(EchoHandler), SubscriptionOptions::default())
        .unwrap();
    let caller = fabric.connector("caller");
    start_all(&[service.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://echo.core:443/echo")
        .body(b"ping".to_vec())
        .build()
        .unwrap();
    let queue = caller.publish(request).await.unwrap();
    let responses = drain(&queue, Duration::from_secs(1)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), 200);
    assert_eq!(responses[0].as_http().unwrap().body, b"ping");

    shutdown_all(&[service, caller], Duration::from_secs(1)).await.unwrap();
}

/// S2: three instances of one service fan out a multicast call; one fails.
/// Expect exactly three responses, one carrying the 503, all within the
/// 2s time budget plus slack.
#[tokio::test]
async fn s2_multicast_fan_out_with_one_failure() {
    let fabric = TestFabric::new();
    let a = fabric.connector("worker.core");
    a.subscribe(
        "POST",
        ":443/work",
        Arc::new(EchoHandler),
        SubscriptionOptions::default(),
    )
    .unwrap();
    let b = fabric.connector("worker.core");
    b.subscribe(
        "POST",
        ":443/work",
        Arc::new(FailingHandler::new(503, "overloaded")),
        SubscriptionOptions::default(),
    )
    .unwrap();
    let c = fabric.connector("worker.core");
    c.subscribe(
        "POST",
        ":443/work",
        Arc::new(EchoHandler),
        SubscriptionOptions::default(),
    )
    .unwrap();
    let caller = fabric.connector("caller");
    start_all(&[a.clone(), b.clone(), c.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://worker.core:443/work")
        .body(b"go".to_vec())
        .multicast(true)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let started = tokio::time::Instant::now();
    let queue = caller.publish(request).await.unwrap();
    let responses = drain(&queue, Duration::from_millis(2100)).await;
    assert!(started.elapsed() < Duration::from_millis(2100));

    assert_eq!(responses.len(), 3);
    let failures: Vec<_> = responses.iter().filter(|r| r.status() == 503).collect();
    assert_eq!(failures.len(), 1);

    shutdown_all(&[a, b, c, caller], Duration::from_secs(1)).await.unwrap();
}

/// S3: a middleware forwards every request to itself. Expect exactly one
/// response whose error has status 508 after at most 64 hops; the handler
/// is never invoked a 65th time (each invocation only increments the hop
/// count once, so a 65th invocation would require a 66th-hop frame to
/// exist on the wire, which loop detection above never lets through).
struct LoopingMiddleware {
    engine: PublicationEngine,
    invocations: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Handler for LoopingMiddleware {
    async fn handle(&self, frame: Frame, body: Vec<u8>) -> Response {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let budget = frame.time_budget().unwrap_or(Duration::from_secs(5));
        let request = Request::builder(Method::POST, "https://middle.ware:443/forward")
            .body(body)
            .header(headers::HOP_COUNT, frame.hop_count().to_string())
            .timeout(budget)
            .build()
            .unwrap();
        match self.engine.publish(request).await {
            Ok(queue) => queue
                .pop()
                .await
                .unwrap_or_else(|| Response::err(Error::new("no reply", error_args![502i32]))),
            Err(e) => Response::err(e),
        }
    }
}

#[tokio::test]
async fn s3_loop_detection() {
    let fabric = TestFabric::new();
    let middleware = fabric.connector("middle.ware");
    let invocations = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(LoopingMiddleware {
        engine: PublicationEngine::new(
            fabric.bus(),
            "middle.ware",
            "middle.ware-loop",
            Arc::new(SequentialIdSource::new("loop-")),
            Duration::from_secs(5),
        ),
        invocations: invocations.clone(),
    });
    middleware
        .subscribe("POST", ":443/forward", handler, SubscriptionOptions::default())
        .unwrap();
    let caller = fabric.connector("caller");
    start_all(&[middleware.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://middle.ware:443/forward")
        .body(Vec::new())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let queue = caller.publish(request).await.unwrap();
    let responses = drain(&queue, Duration::from_secs(5)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), 508);
    assert!(invocations.load(Ordering::SeqCst) <= 64);

    shutdown_all(&[middleware, caller], Duration::from_secs(1)).await.unwrap();
}

/// S5: a 100ms caller deadline against a handler that sleeps 500ms. The
/// caller's single response is a 504 delivered close to the deadline, well
/// before the handler would otherwise have finished.
#[tokio::test]
async fn s5_deadline_propagation() {
    let fabric = TestFabric::new();
    let service = fabric.connector("slow.core");
    service
        .subscribe(
            "POST",
            ":443/slow",
            Arc::new(fabric_test_support::handlers::SlowHandler::new(Duration::from_millis(500))),
            SubscriptionOptions::default(),
        )
        .unwrap();
    let caller = fabric.connector("caller");
    start_all(&[service.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://slow.core:443/slow")
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let started = tokio::time::Instant::now();
    let queue = caller.publish(request).await.unwrap();
    let response = queue.pop().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 504);
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}, expected well under the handler's 500ms sleep");

    shutdown_all(&[service, caller], Duration::from_secs(1)).await.unwrap();
}

/// S6: `SetConfig` in `TESTING` updates the readable value before the
/// change observer runs, and observes it from within the observer too.
#[tokio::test]
async fn s6_config_change_observer_sees_the_new_value_first() {
    let fabric = TestFabric::new();
    let connector = fabric.connector("svc");
    connector.set_deployment(DeploymentMode::Testing);

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_observer = seen.clone();
    connector.on_config_changed(
        "Port",
        Arc::new(move |store, _key| {
            assert_eq!(store.value("Port").unwrap(), "2525");
            seen_in_observer.fetch_add(1, Ordering::SeqCst);
        }),
    );

    connector.set_config("Port", "2525").unwrap();
    assert_eq!(connector.port(), 2525);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

/// S6 (converse): in `PROD`, `SetConfig` is forbidden and the value is left
/// untouched.
#[tokio::test]
async fn set_config_is_forbidden_outside_local_and_testing() {
    let fabric = TestFabric::new();
    let connector = fabric.connector("svc");
    connector.set_deployment(DeploymentMode::Prod);
    assert!(connector.set_config("Port", "2525").is_err());
    assert_eq!(connector.port(), 0);
}
