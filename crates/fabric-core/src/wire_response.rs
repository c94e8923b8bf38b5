//! Converts between a handler's [`Response`] and the `(Frame, body)` pair
//! that actually rides the bus, shared by the subscription engine (sender
//! side) and the publication engine (receiver side) so the two stay in
//! lock-step about what a reply frame looks like.

use std::collections::BTreeMap;

use fabric_errors::{error_args, Error, ErrorArg};
use fabric_wire::{Frame, HttpResponse, OpCode, Response};

/// The error fields that travel on the wire. A cause chain and local stack
/// frames are diagnostic detail for the process that raised the error; only
/// the message, status, trace id, and structured properties need to survive
/// the hop to the caller.
#[derive(serde::Serialize, serde::Deserialize)]
struct ErrorWire {
    message: String,
    status: u16,
    trace_id: String,
    properties: BTreeMap<String, String>,
}

impl From<&Error> for ErrorWire {
    fn from(e: &Error) -> Self {
        ErrorWire {
            message: e.message().to_owned(),
            status: e.status(),
            trace_id: e.trace_id().to_owned(),
            properties: e.properties().clone(),
        }
    }
}

impl ErrorWire {
    fn into_error(self) -> Error {
        let mut args: Vec<ErrorArg> = vec![ErrorArg::from(self.status)];
        for (k, v) in self.properties {
            args.push(ErrorArg::from(k));
            args.push(ErrorArg::from(v));
        }
        Error::new(self.message, args).with_trace_id(self.trace_id)
    }
}

/// Headers the envelope itself owns; stripped before copying a handler's
/// response headers in, and not copied back out on decode.
fn is_envelope_header(name: &str) -> bool {
    matches!(
        name,
        "Microbus-Call-Id"
            | "Microbus-Msg-Id"
            | "Microbus-From-Host"
            | "Microbus-From-Id"
            | "Microbus-From-Version"
            | "Microbus-Op-Code"
            | "Microbus-Hop-Count"
            | "Microbus-Time-Budget"
            | "Microbus-Fragment"
            | "Microbus-Queue"
            | "Microbus-Trace-Id"
            | "Microbus-Actor"
            | "X-Fabric-Method"
            | "X-Fabric-Path"
            | "X-Fabric-Status"
    )
}

/// Encodes a handler's `Response` into the frame/body pair to publish back
/// to the originator, starting from `envelope` (already carrying call id,
/// from-host, from-id, trace id).
pub fn encode(mut envelope: Frame, response: &Response) -> (Frame, Vec<u8>) {
    match response {
        Response::Http(h) => {
            envelope.set_op_code(OpCode::Res);
            envelope.set_status(h.status);
            for (name, values) in h.headers.iter() {
                for v in values {
                    envelope.add(name, v.clone());
                }
            }
            (envelope, h.body.clone())
        }
        Response::Error(e) => {
            envelope.set_op_code(OpCode::Err);
            envelope.set_status(e.status());
            let wire = ErrorWire::from(e);
            let body = serde_json::to_vec(&wire).unwrap_or_default();
            (envelope, body)
        }
    }
}

/// Decodes a reply frame/body pair back into a `Response`.
pub fn decode(frame: &Frame, body: Vec<u8>) -> Response {
    match frame.op_code() {
        Some(OpCode::Err) => match serde_json::from_slice::<ErrorWire>(&body) {
            Ok(wire) => Response::Error(wire.into_error()),
            Err(e) => Response::Error(Error::new(
                format!("malformed error reply: {e}"),
                error_args![502i32],
            )),
        },
        _ => {
            let status = frame.status().unwrap_or(200);
            let mut headers = Frame::new();
            for (name, values) in frame.iter() {
                if is_envelope_header(name) {
                    continue;
                }
                for v in values {
                    headers.add(name, v.clone());
                }
            }
            Response::Http(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_response_round_trips_status_headers_and_body() {
        let mut envelope = Frame::new();
        envelope.set_call_id("c1");
        let body = HttpResponse::new(201, b"created".to_vec()).header("X-Widget-Id", "42");
        let response = Response::from(body);
        let (frame, body) = encode(envelope, &response);
        assert_eq!(frame.call_id(), Some("c1"));
        assert_eq!(frame.status(), Some(201));
        let decoded = decode(&frame, body);
        let http = decoded.as_http().unwrap();
        assert_eq!(http.status, 201);
        assert_eq!(http.body, b"created");
        assert_eq!(http.headers.get("X-Widget-Id"), Some("42"));
    }

    #[test]
    fn error_response_round_trips_status_message_and_properties() {
        let envelope = Frame::new();
        let err = Error::new("overloaded", error_args![503i32, "retry_after", "2s"]);
        let response = Response::err(err);
        let (frame, body) = encode(envelope, &response);
        assert_eq!(frame.op_code(), Some(OpCode::Err));
        let decoded = decode(&frame, body);
        let e = decoded.as_error().unwrap();
        assert_eq!(e.status(), 503);
        assert_eq!(e.message(), "overloaded");
        assert_eq!(e.property("retry_after"), Some("2s"));
    }
}
