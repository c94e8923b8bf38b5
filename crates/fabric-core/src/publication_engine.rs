//! Publishes an outbound [`Request`] and collects its replies into a
//! [`ResponseQueue`].
//!
//! Each call gets its own reply subject (`<from id>.r.<call id>`) and a
//! dedicated bus subscription rather than sharing one long-lived listener
//! demultiplexed by a correlation map: the in-process bus only matches
//! literal subjects, and a per-call inbox is the idiomatic NATS request
//! pattern anyway, so there is no shared state to lock on the hot path. A
//! background task owns the subscription and the queue's writing half for
//! the lifetime of the call; a unicast call stops it at the first reply,
//! a multicast call at the bus-reported responder count or the deadline,
//! whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::error;

use fabric_bus::subject::{multicast_subject, reply_subject, unicast_subject};
use fabric_bus::{Bus, BusSubscription};
use fabric_errors::{error_args, Error};
use fabric_wire::{Frame, OpCode, Request, Response, ResponseQueue, MAX_HOP_COUNT};

use crate::fragments::{Assembled, FragmentAssembler};
use crate::ids::IdSource;
use crate::wire_response;

/// Backlog a single call's [`ResponseQueue`] can hold before `push` starts
/// rejecting further replies as backpressure.
const RESPONSE_QUEUE_CAPACITY: usize = 64;

pub struct PublicationEngine {
    bus: Arc<dyn Bus>,
    from_host: String,
    from_id: String,
    id_source: Arc<dyn IdSource>,
    default_time_budget: Duration,
}

impl PublicationEngine {
    pub fn new(
        bus: Arc<dyn Bus>,
        from_host: impl Into<String>,
        from_id: impl Into<String>,
        id_source: Arc<dyn IdSource>,
        default_time_budget: Duration,
    ) -> Self {
        PublicationEngine {
            bus,
            from_host: from_host.into(),
            from_id: from_id.into(),
            id_source,
            default_time_budget,
        }
    }

    /// Publishes `request`, returning a queue the caller drains for
    /// replies. A call with no subscriber at all gets back a closed queue
    /// holding a single 503.
    pub async fn publish(&self, request: Request) -> Result<ResponseQueue, Error> {
        let host = request.url().host_str().ok_or_else(|| {
            Error::new("bad request: url has no host", error_args![400i32])
        })?;
        let port = request.url().port().unwrap_or(443);
        let method = request.method().as_str().to_owned();
        let timeout = request.timeout().unwrap_or(self.default_time_budget);

        let call_id = self.id_source.next_id();
        let mut envelope = request.headers().clone();
        envelope.set_call_id(&call_id);
        envelope.set_from_host(&self.from_host);
        envelope.set_from_id(&self.from_id);
        envelope.set_op_code(OpCode::Req);
        envelope.set_time_budget(timeout);
        envelope.set_dispatch_method(&method);
        envelope.set_dispatch_path(request.url().path());

        if envelope.increment_hop_count() > MAX_HOP_COUNT {
            return Err(Error::new("loop detected", error_args![508i32]));
        }

        let inbox = reply_subject(&self.from_id, &call_id);
        let subscription = self.bus.subscribe(&inbox, None).await?;

        let subject = if request.multicast() {
            multicast_subject(&method, host, port)
        } else {
            unicast_subject(&method, host, port)
        };

        // Only the first fragment's publish tells us how many subscribers are
        // listening; later fragments go to the same fixed set of recipients
        // so their reported counts are redundant (and would race with
        // queue-group membership changes if trusted instead).
        let body = request.into_body();
        let mut fragments = crate::fragments::split_into_frames(envelope, body, crate::fragments::BUS_MESSAGE_MAX).into_iter();
        let (first_frame, first_chunk) = fragments.next().expect("split_into_frames always yields at least one frame");
        let reached = self.bus.publish(&subject, first_frame.to_wire(&first_chunk)).await?;
        for (frame, chunk) in fragments {
            self.bus.publish(&subject, frame.to_wire(&chunk)).await?;
        }

        let queue = ResponseQueue::new(RESPONSE_QUEUE_CAPACITY);
        if reached == 0 {
            queue.push(Response::err(Error::new(
                "service unavailable: no subscriber answered the call",
                error_args![503i32],
            )))?;
            queue.close();
            return Ok(queue);
        }

        let expected = if request.multicast() { reached } else { 1 };
        let deadline = Instant::now() + timeout;
        let collector_queue = queue.clone();
        tokio::spawn(collect_replies(subscription, collector_queue, expected, deadline));

        Ok(queue)
    }
}

/// Drains `subscription` into `queue` until `expected` replies have
/// arrived or `deadline` passes, then closes the queue.
///
/// A deadline that passes with nothing yet delivered is surfaced to the
/// caller as a single `504` response rather than a silently empty queue —
/// a multicast call with at least one reply already in hand treats the same
/// deadline as ordinary fan-out completion instead, since partial fan-out
/// is a normal outcome rather than a failure.
async fn collect_replies(
    mut subscription: BusSubscription,
    queue: ResponseQueue,
    expected: usize,
    deadline: Instant,
) {
    let fragments = FragmentAssembler::new();
    let mut received = 0usize;

    while received < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(Some(wire)) = tokio::time::timeout(remaining, subscription.recv()).await else {
            break;
        };
        let frame_and_body = match Frame::from_wire(&wire) {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "dropping malformed reply");
                continue;
            }
        };
        let (frame, body) = frame_and_body;
        match fragments.feed(frame, body, remaining) {
            Assembled::Whole(f, b) | Assembled::Complete(f, b) => {
                let response = wire_response::decode(&f, b);
                if queue.push(response).is_err() {
                    break;
                }
                received += 1;
            }
            Assembled::Pending | Assembled::TimedOut => {}
        }
    }

    if received == 0 && received < expected {
        let _ = queue.push(Response::err(Error::new(
            "gateway timeout: no response within the call's time budget",
            error_args![504i32],
        )));
    }
    queue.close();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fabric_bus::InProcBus;
    use fabric_wire::HttpResponse;
    use http::Method;

    use crate::ids::RandomIdSource;
    use crate::subscription_engine::{Handler, SubscriptionEngine, SubscriptionOptions};
    use fabric_wire::SubscriptionPattern;

    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn handle(&self, _frame: Frame, body: Vec<u8>) -> Response {
            Response::from(HttpResponse::new(200, body))
        }
    }

    #[tokio::test]
    async fn unicast_call_returns_the_single_reply() {
        let bus: Arc<dyn Bus> = Arc::new(InProcBus::new());
        let server = SubscriptionEngine::new(bus.clone(), "svc", "svc-1");
        server.subscribe(
            SubscriptionPattern::parse("GET", "svc", "443", "/echo").unwrap(),
            Arc::new(Echo),
            SubscriptionOptions::default(),
        );

        // A background loop standing in for the connector's subject listener.
        let mut inbound = bus.subscribe(&fabric_bus::subject::unicast_subject("GET", "svc", 443), Some("svc".to_owned())).await.unwrap();
        let server = Arc::new(server);
        let server_for_loop = server.clone();
        tokio::spawn(async move {
            while let Some(wire) = inbound.recv().await {
                let (frame, body) = Frame::from_wire(&wire).unwrap();
                server_for_loop.dispatch("GET", "svc", 443, frame, body).await;
            }
        });

        let client = PublicationEngine::new(
            bus.clone(),
            "caller",
            "caller-1",
            Arc::new(RandomIdSource),
            Duration::from_secs(2),
        );
        let request = Request::builder(Method::GET, "https://svc:443/echo")
            .body(b"ping".to_vec())
            .build()
            .unwrap();
        let queue = client.publish(request).await.unwrap();
        let response = queue.pop().await.unwrap();
        let http = response.as_http().unwrap();
        assert_eq!(http.status, 200);
        assert_eq!(http.body, b"ping");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn call_with_no_subscriber_gets_an_immediate_503() {
        let bus: Arc<dyn Bus> = Arc::new(InProcBus::new());
        let client = PublicationEngine::new(
            bus,
            "caller",
            "caller-1",
            Arc::new(RandomIdSource),
            Duration::from_secs(2),
        );
        let request = Request::builder(Method::GET, "https://nobody:443/echo")
            .build()
            .unwrap();
        let queue = client.publish(request).await.unwrap();
        let response = queue.pop().await.unwrap();
        assert_eq!(response.status(), 503);
        assert!(queue.pop().await.is_none());
    }
}
