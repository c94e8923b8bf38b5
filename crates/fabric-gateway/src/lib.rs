//! HTTP ingress gateway: translates inbound HTTP requests into bus
//! `Publish` calls and copies the first reply back out as an HTTP response.
//! No static route table of its own — every destination comes from the
//! request path's `host:port` prefix, resolved against the connector's own
//! subscriptions over the bus.

pub mod config;
pub mod language;
pub mod router;
pub mod state;
pub mod target;

pub use config::{
    AllowedOrigins, BlockedPattern, ConfigError, GatewayConfig, PortMappingRule, PortMatch,
    PortResolution,
};
pub use router::{build_router, serve};
pub use state::{AdmissionGuard, GatewayState};
pub use target::{parse_target, Target};
