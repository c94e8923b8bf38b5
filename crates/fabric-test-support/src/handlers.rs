//! Small reusable [`Handler`] implementations that otherwise get
//! hand-rolled at the top of nearly every subscription-engine and
//! connector test in this workspace (an `Echo`, a `Slow`, a `Panics`).
//! Centralizing them here keeps the scenario tests in
//! `fabric-test-support/tests` focused on the behavior under test rather
//! than on restating these three structs yet again.

use std::time::Duration;

use async_trait::async_trait;

use fabric_core::Handler;
use fabric_errors::{error_args, Error};
use fabric_wire::{Frame, Response};

/// Replies with the request body unchanged, status 200.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, _frame: Frame, body: Vec<u8>) -> Response {
        Response::ok(200, body)
    }
}

/// Always replies with a fixed status and body, ignoring the request.
pub struct FixedResponseHandler {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FixedResponseHandler {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        FixedResponseHandler {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
impl Handler for FixedResponseHandler {
    async fn handle(&self, _frame: Frame, _body: Vec<u8>) -> Response {
        Response::ok(self.status, self.body.clone())
    }
}

/// Always fails with the given status and message, as an [`Error`] response
/// rather than an HTTP one — for exercising the caller's error-reconstitution
/// path.
pub struct FailingHandler {
    pub status: u16,
    pub message: String,
}

impl FailingHandler {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        FailingHandler {
            status,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _frame: Frame, _body: Vec<u8>) -> Response {
        Response::err(Error::new(self.message.clone(), error_args![self.status]))
    }
}

/// Sleeps for `delay` before replying 200, for exercising deadline
/// propagation and cancellation.
pub struct SlowHandler {
    pub delay: Duration,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        SlowHandler { delay }
    }
}

#[async_trait]
impl Handler for SlowHandler {
    async fn handle(&self, _frame: Frame, _body: Vec<u8>) -> Response {
        tokio::time::sleep(self.delay).await;
        Response::ok(200, Vec::new())
    }
}

/// Panics unconditionally, for exercising the subscription engine's
/// panic-to-500 conversion.
pub struct PanickingHandler {
    pub message: &'static str,
}

impl PanickingHandler {
    pub fn new(message: &'static str) -> Self {
        PanickingHandler { message }
    }
}

#[async_trait]
impl Handler for PanickingHandler {
    async fn handle(&self, _frame: Frame, _body: Vec<u8>) -> Response {
        panic!("{}", self.message);
    }
}
