//! Exercises this service's own routes end to end: a single echo, three
//! echo instances sharing a multicast call where one of them is a stand-in
//! failure, and the relay route walking into loop detection.

use std::sync::Arc;
use std::time::Duration;

use http::Method;

use fabric_core::SubscriptionOptions;
use fabric_wire::Request;

use fabric_test_support::handlers::FailingHandler;
use fabric_test_support::{drain, shutdown_all, start_all, TestFabric};

#[tokio::test]
async fn echoes_the_request_body_unchanged() {
    let fabric = TestFabric::new();
    let bus = fabric.bus();
    let service = echo_service::build(bus, "echo.core");
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

#[tokio::test]
async fn multicast_fan_out_mixes_in_one_failing_instance() {
    let fabric = TestFabric::new();
    let bus = fabric.bus();
    let a = echo_service::build(bus.clone(), "echo.core");
    let b = fabric.connector("echo.core");
    b.subscribe(
        "POST",
        ":443/echo",
        Arc::new(FailingHandler::new(503, "overloaded")),
        SubscriptionOptions::default(),
    )
    .unwrap();
    let c = echo_service::build(bus, "echo.core");
    let caller = fabric.connector("caller");
    start_all(&[a.clone(), b.clone(), c.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://echo.core:443/echo")
        .body(b"go".to_vec())
        .multicast(true)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let queue = caller.publish(request).await.unwrap();
    let responses = drain(&queue, Duration::from_millis(2100)).await;

    assert_eq!(responses.len(), 3);
    let failures: Vec<_> = responses.iter().filter(|r| r.status() == 503).collect();
    assert_eq!(failures.len(), 1);

    shutdown_all(&[a, b, c, caller], Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn relay_route_trips_loop_detection() {
    let fabric = TestFabric::new();
    let bus = fabric.bus();
    let service = echo_service::build(bus, "middle.ware");
    let caller = fabric.connector("caller");
    start_all(&[service.clone(), caller.clone()]).await.unwrap();

    let request = Request::builder(Method::POST, "https://middle.ware:443/relay")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let queue = caller.publish(request).await.unwrap();
    let responses = drain(&queue, Duration::from_secs(5)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), 508);

    shutdown_all(&[service, caller], Duration::from_secs(1)).await.unwrap();
}
