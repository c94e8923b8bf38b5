//! Composition root: reads the handful of environment variables a deployed
//! service reads, brings up one `Connector` plus the HTTP ingress gateway
//! bound to it, and runs both until a shutdown signal arrives.
//!
//! Grounded on the teacher's `services/server/src/main.rs` shape: read env,
//! init tracing, build the long-lived state, serve under a graceful
//! `tokio::select!` shutdown, exit non-zero on a startup failure instead of
//! panicking past it.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fabric_bus::InProcBus;
use fabric_core::{Connector, DeploymentMode};
use fabric_gateway::{serve, GatewayConfig, GatewayState};

/// Exit code for a fatal startup failure, unchanged from the source
/// framework's convention.
const EXIT_FATAL_STARTUP: u8 = 19;

#[tokio::main]
async fn main() -> ExitCode {
    let debug = env::var("MICROBUS_LOG_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(if debug { "debug" } else { "info" }))
        .init();

    let deployment = match env::var("MICROBUS_DEPLOYMENT") {
        Ok(raw) => match raw.parse::<DeploymentMode>() {
            Ok(mode) => mode,
            Err(e) => {
                error!(error = %e, "MICROBUS_DEPLOYMENT is set but not a recognized deployment mode");
                return ExitCode::from(EXIT_FATAL_STARTUP);
            }
        },
        Err(_) => DeploymentMode::Local,
    };

    // The concrete broker driver is an external collaborator this workspace
    // doesn't ship (see the workspace's purpose-and-scope notes); a
    // configured NATS URL is accepted and logged for interface
    // compatibility, but every Connector here runs against one in-process
    // bus regardless.
    match env::var("MICROBUS_NATS") {
        Ok(url) if !url.is_empty() => {
            warn!(nats_url = %url, "MICROBUS_NATS is set but this build has no NATS driver; using the in-process bus");
        }
        _ => {}
    }
    let plane = env::var("MICROBUS_PLANE").unwrap_or_default();
    if !plane.is_empty() {
        info!(plane = %plane, "plane isolation has no effect on the in-process bus; every connector in this process shares one fabric");
    }

    let bus = Arc::new(InProcBus::new());
    let connector = Connector::new("fabric.gateway", bus);
    connector.set_deployment(deployment);

    if let Err(e) = connector.startup().await {
        error!(error = %e, "connector failed to start");
        return ExitCode::from(EXIT_FATAL_STARTUP);
    }

    let gateway_config = load_gateway_config();
    let gateway_state = GatewayState::new(connector.clone(), gateway_config);

    info!(ports = ?gateway_state.config().ports, "serving HTTP ingress");
    let serve_result = serve(gateway_state, shutdown_signal()).await;

    if let Err(e) = connector.shutdown(Duration::from_secs(10)).await {
        error!(error = %e, "connector failed to shut down cleanly");
    }

    match serve_result {
        Ok(()) => {
            info!("fabric shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "HTTP ingress exited with an error");
            ExitCode::from(EXIT_FATAL_STARTUP)
        }
    }
}

/// Loads `./fabric-gateway.toml` if present, else the gateway's built-in
/// defaults (port 8080, `RequestMemoryLimit` 4096 MiB, the standard
/// `8080:*->*, 443:*->443, 80:*->443` port-mapping rules).
fn load_gateway_config() -> GatewayConfig {
    match std::fs::read_to_string("fabric-gateway.toml") {
        Ok(raw) => match GatewayConfig::from_toml_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "fabric-gateway.toml present but invalid, falling back to defaults");
                GatewayConfig::default()
            }
        },
        Err(_) => GatewayConfig::default(),
    }
}

async fn shutdown_signal() {
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
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
