//! Wire-level data model for the fabric runtime: the header envelope that
//! rides on every bus message, the immutable `Request` a caller builds, the
//! `Response`/`ResponseQueue` pair that carries replies back, config entries,
//! subscription patterns, and a minimal OpenAPI document model.

pub mod config;
pub mod frame;
pub mod openapi;
pub mod queue;
pub mod request;
pub mod response;
pub mod subscription;

pub use config::{ConfigEntry, ValidationRule};
pub use frame::{Frame, OpCode, MAX_HOP_COUNT};
pub use queue::ResponseQueue;
pub use request::Request;
pub use response::{HttpResponse, Response};
pub use subscription::{HostPattern, PathPattern, PortPattern, SubscriptionPattern};
