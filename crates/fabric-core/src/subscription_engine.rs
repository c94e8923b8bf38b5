//! Accepts inbound call frames, resolves a handler through the routing
//! trie, runs it under a per-route concurrency cap and deadline, and
//! publishes the reply back to the originator's inbox subject.
//!
//! The pipeline, in order: reject a looping call by hop count; reassemble
//! fragments; resolve a handler by (method, host, port, path); admit under
//! the route's `MaxClients` semaphore or refuse with 503; run the handler
//! racing its time budget, catching any panic; envelope and publish the
//! reply, fragmenting it if it does not fit in one bus message.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use fabric_bus::subject::reply_subject;
use fabric_bus::Bus;
use fabric_errors::{error_args, Error};
use fabric_wire::{Frame, Response, MAX_HOP_COUNT};

use crate::fragments::{self, Assembled, FragmentAssembler};
use crate::routing::{RouteId, Trie};
use crate::wire_response;

/// One registered call handler. Implemented by Connector-provided
/// callbacks; object-safe via `async-trait` so the engine can hold many
/// behind `Arc<dyn Handler>` in its routing trie.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, frame: Frame, body: Vec<u8>) -> Response;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Frame, Vec<u8>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Response> + Send,
{
    async fn handle(&self, frame: Frame, body: Vec<u8>) -> Response {
        self(frame, body).await
    }
}

/// Per-route admission and reassembly tuning.
#[derive(Clone)]
pub struct SubscriptionOptions {
    /// Bounds concurrent in-flight calls to this route; beyond it, a call
    /// is refused immediately with 503 rather than queued.
    pub max_clients: usize,
    /// How long to hold a partial fragment buffer for this route before
    /// giving up on it. `None` defers to the call's own time budget, and
    /// failing that, a 10s default (see [`SubscriptionEngine::dispatch`]).
    pub fragment_timeout: Option<Duration>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        SubscriptionOptions {
            max_clients: 128,
            fragment_timeout: None,
        }
    }
}

struct RouteInner {
    handler: Arc<dyn Handler>,
    semaphore: Arc<Semaphore>,
    fragment_timeout: Option<Duration>,
}

type RouteEntry = Arc<RouteInner>;

/// Resolves and runs handlers for one connector's inbound calls.
pub struct SubscriptionEngine {
    routes: RwLock<Trie<RouteEntry>>,
    fragments: FragmentAssembler,
    bus: Arc<dyn Bus>,
    from_host: String,
    from_id: String,
    /// NATS' default max payload; replies larger than this are split across
    /// several fragment frames sharing one call id.
    bus_message_max: usize,
}

impl SubscriptionEngine {
    pub fn new(bus: Arc<dyn Bus>, from_host: impl Into<String>, from_id: impl Into<String>) -> Self {
        SubscriptionEngine {
            routes: RwLock::new(Trie::new()),
            fragments: FragmentAssembler::new(),
            bus,
            from_host: from_host.into(),
            from_id: from_id.into(),
            bus_message_max: fragments::BUS_MESSAGE_MAX,
        }
    }

    /// Registers a handler for `(method, host, port, path)`, returning a
    /// handle that can later be passed to [`SubscriptionEngine::unsubscribe`].
    pub fn subscribe(
        &self,
        pattern: fabric_wire::SubscriptionPattern,
        handler: Arc<dyn Handler>,
        options: SubscriptionOptions,
    ) -> RouteId {
        let entry = Arc::new(RouteInner {
            handler,
            semaphore: Arc::new(Semaphore::new(options.max_clients.max(1))),
            fragment_timeout: options.fragment_timeout,
        });
        self.routes.write().unwrap().insert(pattern, entry)
    }

    pub fn unsubscribe(&self, id: RouteId) {
        self.routes.write().unwrap().remove(id);
    }

    /// Every currently registered route pattern, for synthesizing the
    /// OpenAPI document.
    pub fn registered_patterns(&self) -> Vec<fabric_wire::SubscriptionPattern> {
        self.routes.read().unwrap().patterns()
    }

    /// Feeds one inbound bus message, previously received on the subject
    /// for `(method, host, port)`, through the dispatch pipeline.
    pub async fn dispatch(&self, method: &str, host: &str, port: u16, frame: Frame, body: Vec<u8>) {
        if frame.hop_count() >= MAX_HOP_COUNT {
            self.reply(&frame, Response::err(Error::new("loop detected", error_args![508i32])))
                .await;
            return;
        }

        // The route's own fragment-assembly timeout (if it configured one)
        // takes precedence over the call's time budget, so the route must be
        // resolved before reassembly runs; resolving is a read-only trie
        // lookup and costs nothing the admission/execution steps below don't
        // already pay for once per arriving fragment.
        let path = frame.dispatch_path().unwrap_or("/").to_owned();
        let route = {
            let routes = self.routes.read().unwrap();
            routes.resolve(method, host, port, &path).cloned()
        };

        let fragment_timeout = route
            .as_ref()
            .and_then(|r| r.fragment_timeout)
            .or_else(|| frame.time_budget())
            .unwrap_or(Duration::from_secs(10));
        let (frame, body) = match self.fragments.feed(frame, body, fragment_timeout) {
            Assembled::Whole(f, b) | Assembled::Complete(f, b) => (f, b),
            Assembled::Pending | Assembled::TimedOut => return,
        };

        let Some(route) = route else {
            warn!(method, host, port, path = %path, "no subscription matches inbound call");
            return;
        };

        let Ok(permit) = route.semaphore.clone().try_acquire_owned() else {
            self.reply(
                &frame,
                Response::err(Error::new("service unavailable", error_args![503i32])),
            )
            .await;
            return;
        };

        let deadline = frame.time_budget().map(|d| tokio::time::Instant::now() + d);
        let handler = route.handler.clone();
        let call = AssertUnwindSafe(handler.handle(frame.clone(), body)).catch_unwind();

        let response = match deadline {
            Some(dl) => match tokio::time::timeout_at(dl, call).await {
                Ok(Ok(resp)) => Some(resp),
                Ok(Err(panic)) => Some(Response::err(panic_to_error(panic))),
                Err(_) => {
                    // The handler blew its time budget. Its future is dropped
                    // here, propagating cancellation; the caller's own
                    // deadline governs the queue, so no reply is sent.
                    warn!(call_id = frame.call_id(), "handler exceeded its time budget");
                    None
                }
            },
            None => match call.await {
                Ok(resp) => Some(resp),
                Err(panic) => Some(Response::err(panic_to_error(panic))),
            },
        };
        drop(permit);

        if let Some(response) = response {
            self.reply(&frame, response).await;
        }
    }

    async fn reply(&self, inbound: &Frame, response: Response) {
        let (Some(call_id), Some(from_id)) = (inbound.call_id(), inbound.from_id()) else {
            error!("dropping reply: inbound frame is missing call id or from-id");
            return;
        };

        let mut envelope = Frame::new();
        envelope.set_call_id(call_id);
        envelope.set_from_host(&self.from_host);
        envelope.set_from_id(&self.from_id);
        if let Some(trace_id) = inbound.trace_id() {
            envelope.set_trace_id(trace_id);
        }

        let (envelope, payload) = wire_response::encode(envelope, &response);
        let subject = reply_subject(from_id, call_id);

        for (frame, chunk) in fragments::split_into_frames(envelope, payload, self.bus_message_max) {
            if let Err(e) = self.bus.publish(&subject, frame.to_wire(&chunk)).await {
                error!(error = %e, "failed to publish reply fragment");
                break;
            }
        }
    }
}

fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> Error {
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_owned()
    };
    Error::new(text, error_args![500i32])
}
