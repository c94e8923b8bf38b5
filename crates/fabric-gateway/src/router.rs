//! The HTTP ingress gateway's router: one fallback handler (mirroring the
//! teacher's single `dashboard_fallback` catch-all) that walks every inbound
//! request through blocked-path, admission, language, port-mapping,
//! middleware, and publish stages before copying the first bus response
//! back to the HTTP client.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Router;
use http::HeaderMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use fabric_errors::Error;
use fabric_wire::{HttpResponse, Request as FabricRequest, Response as FabricResponse};

use crate::config::{is_blocked, resolve_port, AllowedOrigins, GatewayConfig};
use crate::language;
use crate::state::GatewayState;
use crate::target::parse_target;

/// Hop-by-hop headers that must never be copied across the HTTP <-> bus
/// boundary in either direction (RFC 7230 §6.1 plus `content-length`, which
/// axum recomputes from the body it is handed).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Builds the gateway's axum application: a single fallback route (the
/// gateway has no static route table of its own; every destination comes
/// from the path's `host:port` prefix), a CORS layer driven by
/// `AllowedOrigins`, and request tracing.
pub fn build_router(state: GatewayState) -> Router {
    let cors = cors_layer(&state.config().allowed_origins);
    Router::new()
        .fallback(gateway_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed: &AllowedOrigins) -> CorsLayer {
    match allowed {
        AllowedOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        AllowedOrigins::List(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

async fn gateway_handler(State(state): State<GatewayState>, req: Request) -> AxumResponse {
    let config = state.config().clone();
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    if is_blocked(&config.blocked_paths, &path) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let body_bytes = match to_bytes(body, config.request_memory_limit_bytes).await {
        Ok(b) => b,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    let Some(_admission) = state.try_admit(body_bytes.len()) else {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    };

    let target = match parse_target(&path) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };
    let internal_port = resolve_port(
        &config.port_mappings,
        state.external_port(),
        target.requested_port,
    );
    let resolved_language = language::negotiate(
        parts
            .headers
            .get("accept-language")
            .and_then(|v| v.to_str().ok()),
        &config.server_languages,
    );

    let mut builder = FabricRequest::builder(
        parts.method.clone(),
        format!("https://{}:{}{}", target.host, internal_port, target.path),
    )
    .body(body_bytes.to_vec())
    .timeout(config.time_budget);
    builder = forward_headers(builder, &parts.headers);
    if let Some(lang) = &resolved_language {
        builder = builder.header("X-Fabric-Language", lang.clone());
    }
    let mut request = match builder.build() {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    if let Some(middleware_url) = &config.middleware {
        match publish_and_take_first(&state, middleware_request(&request, middleware_url)).await {
            Ok(Some(mw_response)) if !mw_response.is_ok() => {
                return response_to_axum(mw_response);
            }
            Ok(_) => {
                request
                    .headers_mut()
                    .add_x_forwarded_full_url(middleware_url.clone());
            }
            Err(e) => return error_response(&e),
        }
    }

    match publish_and_take_first(&state, request).await {
        Ok(Some(response)) => response_to_axum(response),
        Ok(None) => StatusCode::BAD_GATEWAY.into_response(),
        Err(e) if e.status() == 504 => StatusCode::GATEWAY_TIMEOUT.into_response(),
        Err(e) => error_response(&e),
    }
}

fn forward_headers(
    mut builder: fabric_wire::request::RequestBuilder,
    headers: &HeaderMap,
) -> fabric_wire::request::RequestBuilder {
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value.to_string());
        }
    }
    builder
}

fn middleware_request(original: &FabricRequest, middleware_url: &str) -> FabricRequest {
    let mut mw_builder = FabricRequest::builder(original.method().clone(), middleware_url)
        .body(original.body().to_vec());
    if let Some(t) = original.timeout() {
        mw_builder = mw_builder.timeout(t);
    }
    for (name, values) in original.headers().iter() {
        for v in values {
            mw_builder = mw_builder.header(name, v.clone());
        }
    }
    mw_builder
        .build()
        .unwrap_or_else(|_| FabricRequest::builder(Method::GET, middleware_url).build().unwrap())
}

/// Publishes `request` and waits for the first response, racing the
/// request's own time budget. A budget expiry is surfaced as a `504`-status
/// [`Error`] so the caller can map it to `gateway timeout` without holding
/// on to the (now abandoned) queue.
async fn publish_and_take_first(
    state: &GatewayState,
    request: FabricRequest,
) -> Result<Option<FabricResponse>, Error> {
    let budget = request.timeout().unwrap_or(state.config().time_budget);
    let queue = state
        .connector()
        .publish(request)
        .await
        .map_err(|e| Error::new(format!("upstream publish failed: {}", e.message()), vec![]))?;
    match tokio::time::timeout(budget, queue.pop()).await {
        Ok(response) => Ok(response),
        Err(_) => {
            queue.close();
            Err(Error::new(
                "gateway timeout",
                fabric_errors::error_args![504i32],
            ))
        }
    }
}

fn response_to_axum(response: FabricResponse) -> AxumResponse {
    match response {
        FabricResponse::Http(h) => http_response_to_axum(h),
        FabricResponse::Error(e) => error_response(&e),
    }
}

fn http_response_to_axum(h: HttpResponse) -> AxumResponse {
    let mut builder = AxumResponse::builder().status(h.status);
    for (name, values) in h.headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for v in values {
            if let Ok(header_value) = HeaderValue::from_str(v) {
                builder = builder.header(header_name.clone(), header_value);
            }
        }
    }
    builder
        .body(Body::from(h.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: &Error) -> AxumResponse {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "error": err.message(),
        "traceId": err.trace_id(),
    });
    let bytes = match serde_json::to_vec(&body) {
        Ok(b) => b,
        Err(_) => {
            warn!("failed to serialize gateway error body");
            Vec::new()
        }
    };
    (
        status,
        [("content-type", "application/json")],
        Body::from(bytes),
    )
        .into_response()
}

/// Binds and serves every port in `config.ports`, running until `shutdown`
/// resolves. Each listener gets its own [`GatewayState::for_port`] clone so
/// `PortMappings` rules can key off the port a given request actually
/// arrived on.
///
/// `ReadTimeout`/`WriteTimeout`/`ReadHeaderTimeout` are recorded on
/// [`GatewayConfig`] but not yet enforced here: `axum::serve` does not
/// expose hyper's per-connection read/write timeouts without dropping down
/// to `hyper_util`'s lower-level server builder, which nothing else in this
/// workspace otherwise needs.
pub async fn serve<F>(state: GatewayState, shutdown: F) -> Result<(), std::io::Error>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let ports = state.config().ports.clone();
    let shutdown = std::sync::Arc::new(tokio::sync::Mutex::new(Some(shutdown)));
    let mut listeners = Vec::with_capacity(ports.len());
    for port in &ports {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", *port)).await?;
        listeners.push((*port, listener));
    }
    let mut handles = Vec::with_capacity(listeners.len());
    for (i, (port, listener)) in listeners.into_iter().enumerate() {
        let router = build_router(state.for_port(port));
        let shutdown = shutdown.clone();
        let is_last = i + 1 == ports.len();
        handles.push(tokio::spawn(async move {
            let graceful = async move {
                if is_last {
                    if let Some(fut) = shutdown.lock().await.take() {
                        fut.await;
                    }
                } else {
                    std::future::pending::<()>().await;
                }
            };
            axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Applies a fixed `Duration` as a per-handler budget, independent of
/// whatever time budget the inbound call already carried. Used by tests
/// that want a short, deterministic gateway timeout.
#[cfg(test)]
pub(crate) fn test_config_with_budget(budget: Duration) -> GatewayConfig {
    GatewayConfig {
        time_budget: budget,
        ..GatewayConfig::default()
    }
}
