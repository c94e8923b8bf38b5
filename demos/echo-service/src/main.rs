//! Standalone runner for the echo demo service. Useful for manually
//! poking at the runtime with a real HTTP client through `fabric-gateway`,
//! or simply as a worked example of bringing up one `Connector`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use fabric_bus::InProcBus;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let hostname = env::var("ECHO_HOSTNAME").unwrap_or_else(|_| "echo.core".to_owned());

    // No real broker to dial into here (see the `fabric` binary crate for
    // the one that wires up `fabric-gateway` over an inbound HTTP port
    // too) — this binary is a local, single-process demonstration of the
    // Connector lifecycle, so it gets its own private in-process bus.
    let bus = Arc::new(InProcBus::new());
    let connector = echo_service::build(bus, hostname.clone());
    connector.startup().await.expect("echo service failed to start");
    info!(host = %hostname, "echo service started, nothing else is on this bus to call it");

    echo_service::shutdown_signal().await;
    connector
        .shutdown(Duration::from_secs(5))
        .await
        .expect("echo service failed to shut down cleanly");
    info!("echo service shut down gracefully");
}
