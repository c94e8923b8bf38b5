//! A minimal service built on [`fabric_core::Connector`]: an `echo` route
//! that replies with the request body unchanged, and a `relay` route that
//! forwards every call to itself, so that running it stands in for the
//! unicast-echo and self-forwarding-loop walkthroughs by hand rather than
//! only inside the runtime's own test suite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use tracing::warn;

use fabric_bus::Bus;
use fabric_core::ids::RandomIdSource;
use fabric_core::{Connector, PublicationEngine, SubscriptionOptions};
use fabric_errors::{error_args, Error};
use fabric_wire::frame::headers;
use fabric_wire::{Frame, Request, Response};

/// Replies with the request body unchanged, status 200.
pub struct EchoHandler;

#[async_trait]
impl fabric_core::Handler for EchoHandler {
    async fn handle(&self, _frame: Frame, body: Vec<u8>) -> Response {
        Response::ok(200, body)
    }
}

/// Forwards every call back to this same service's `relay` route, seeding
/// the outbound request's hop count from the inbound frame rather than
/// starting a fresh envelope, so repeated self-forwards climb the hop
/// count by exactly one per hop until loop detection trips.
pub struct RelayHandler {
    engine: PublicationEngine,
    target: String,
}

impl RelayHandler {
    pub fn new(bus: Arc<dyn Bus>, hostname: impl Into<String>, id: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let target = format!("https://{hostname}:443/relay");
        RelayHandler {
            engine: PublicationEngine::new(bus, hostname, id, Arc::new(RandomIdSource), Duration::from_secs(5)),
            target,
        }
    }
}

#[async_trait]
impl fabric_core::Handler for RelayHandler {
    async fn handle(&self, frame: Frame, body: Vec<u8>) -> Response {
        let budget = frame.time_budget().unwrap_or(Duration::from_secs(5));
        let request = match Request::builder(Method::POST, &self.target)
            .body(body)
            .header(headers::HOP_COUNT, frame.hop_count().to_string())
            .timeout(budget)
            .build()
        {
            Ok(r) => r,
            Err(e) => return Response::err(e),
        };
        match self.engine.publish(request).await {
            Ok(queue) => queue.pop().await.unwrap_or_else(|| {
                Response::err(Error::new("relay got no reply", error_args![502i32]))
            }),
            Err(e) => Response::err(e),
        }
    }
}

/// Builds an unstarted `Connector` named `hostname` that serves `POST
/// :443/echo` and `POST :443/relay`. Callers still need to `startup`/
/// `shutdown` it themselves, same as any other connector.
pub fn build(bus: Arc<dyn Bus>, hostname: impl Into<String>) -> Connector {
    let hostname = hostname.into();
    let connector = Connector::new(hostname.clone(), bus.clone());
    connector
        .subscribe("POST", ":443/echo", Arc::new(EchoHandler), SubscriptionOptions::default())
        .expect("echo route registers cleanly on a fresh connector");
    let relay = RelayHandler::new(bus, hostname, connector.id().to_owned());
    connector
        .subscribe("POST", ":443/relay", Arc::new(relay), SubscriptionOptions::default())
        .expect("relay route registers cleanly on a fresh connector");
    connector
}

/// Waits for Ctrl+C or SIGTERM, whichever comes first.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C, shutting down"),
        _ = terminate => warn!("received SIGTERM, shutting down"),
    }
}
