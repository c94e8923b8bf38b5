//! The header envelope ("frame") that accompanies every bus message.
//!
//! A `Frame` is a mapping from canonical header name to an ordered list of
//! string values, with typed accessors layered on top for the handful of
//! headers the runtime itself interprets. Header names are matched
//! case-insensitively but always stored and re-emitted in their canonical
//! hyphenated form (`Microbus-Call-Id`, not `microbus-call-id`), bit-exact
//! with the names in the external interface contract.

use std::collections::BTreeMap;
use std::time::Duration;

/// Canonical envelope header names.
pub mod headers {
    pub const CALL_ID: &str = "Microbus-Call-Id";
    pub const MSG_ID: &str = "Microbus-Msg-Id";
    pub const FROM_HOST: &str = "Microbus-From-Host";
    pub const FROM_ID: &str = "Microbus-From-Id";
    pub const FROM_VERSION: &str = "Microbus-From-Version";
    pub const OP_CODE: &str = "Microbus-Op-Code";
    pub const HOP_COUNT: &str = "Microbus-Hop-Count";
    pub const TIME_BUDGET: &str = "Microbus-Time-Budget";
    pub const FRAGMENT: &str = "Microbus-Fragment";
    pub const QUEUE: &str = "Microbus-Queue";
    pub const TRACE_ID: &str = "Microbus-Trace-Id";
    pub const ACTOR: &str = "Microbus-Actor";
    pub const X_FORWARDED_FULL_URL: &str = "X-Forwarded-Full-Url";

    /// Dispatch metadata the subscription engine needs but the bus subject
    /// scheme does not carry (subjects are keyed on method/host/port only;
    /// see `fabric_bus::subject`). Not part of the bit-exact canonical set.
    pub const DISPATCH_METHOD: &str = "X-Fabric-Method";
    pub const DISPATCH_PATH: &str = "X-Fabric-Path";

    /// The HTTP status a reply frame carries. Also implementation-internal:
    /// the canonical set has no status header because the source framework
    /// carries it on the transport message itself rather than in headers.
    pub const STATUS: &str = "X-Fabric-Status";
}

/// Maximum hop count before a call is declared loop-detected (§4.2).
pub const MAX_HOP_COUNT: u32 = 64;

/// The operation a frame carries: a request, a normal response, an
/// acknowledgement, or an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Req,
    Res,
    Ack,
    Err,
}

impl OpCode {
    fn as_str(self) -> &'static str {
        match self {
            OpCode::Req => "req",
            OpCode::Res => "res",
            OpCode::Ack => "ack",
            OpCode::Err => "err",
        }
    }

    fn parse(s: &str) -> Option<OpCode> {
        match s {
            "req" => Some(OpCode::Req),
            "res" => Some(OpCode::Res),
            "ack" => Some(OpCode::Ack),
            "err" => Some(OpCode::Err),
            _ => None,
        }
    }
}

/// Title-cases a hyphen-separated header name so lookups are
/// case-insensitive while storage and re-emission stay canonical.
fn canonicalize(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// The header envelope carried alongside every bus message.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    headers: BTreeMap<String, Vec<String>>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&canonicalize(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.headers
            .get(&canonicalize(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replaces all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .insert(canonicalize(name), vec![value.into()]);
    }

    /// Appends a value, preserving any existing ones.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(canonicalize(name))
            .or_default()
            .push(value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.remove(&canonicalize(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    // -- typed accessors -----------------------------------------------

    pub fn call_id(&self) -> Option<&str> {
        self.get(headers::CALL_ID)
    }

    pub fn set_call_id(&mut self, id: impl Into<String>) {
        self.set(headers::CALL_ID, id);
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.get(headers::MSG_ID)
    }

    pub fn set_msg_id(&mut self, id: impl Into<String>) {
        self.set(headers::MSG_ID, id);
    }

    pub fn from_host(&self) -> Option<&str> {
        self.get(headers::FROM_HOST)
    }

    pub fn set_from_host(&mut self, host: impl Into<String>) {
        self.set(headers::FROM_HOST, host);
    }

    pub fn from_id(&self) -> Option<&str> {
        self.get(headers::FROM_ID)
    }

    pub fn set_from_id(&mut self, id: impl Into<String>) {
        self.set(headers::FROM_ID, id);
    }

    pub fn from_version(&self) -> Option<&str> {
        self.get(headers::FROM_VERSION)
    }

    pub fn set_from_version(&mut self, version: impl Into<String>) {
        self.set(headers::FROM_VERSION, version);
    }

    pub fn op_code(&self) -> Option<OpCode> {
        self.get(headers::OP_CODE).and_then(OpCode::parse)
    }

    pub fn set_op_code(&mut self, op: OpCode) {
        self.set(headers::OP_CODE, op.as_str());
    }

    /// Hop count, defaulting to 0 when absent.
    pub fn hop_count(&self) -> u32 {
        self.get(headers::HOP_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Increments and stores the hop count, returning the new value. Callers
    /// must check the *old* value against [`MAX_HOP_COUNT`] before forwarding.
    pub fn increment_hop_count(&mut self) -> u32 {
        let next = self.hop_count() + 1;
        self.set(headers::HOP_COUNT, next.to_string());
        next
    }

    /// Remaining time budget, if the header is present and well-formed.
    /// Encoded on the wire as whole milliseconds.
    pub fn time_budget(&self) -> Option<Duration> {
        self.get(headers::TIME_BUDGET)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
    }

    pub fn set_time_budget(&mut self, budget: Duration) {
        self.set(headers::TIME_BUDGET, budget.as_millis().to_string());
    }

    /// `(index, total)` for a fragmented call, if this frame is a fragment.
    pub fn fragment(&self) -> Option<(u32, u32)> {
        let raw = self.get(headers::FRAGMENT)?;
        let (idx, total) = raw.split_once('/')?;
        Some((idx.parse().ok()?, total.parse().ok()?))
    }

    pub fn set_fragment(&mut self, index: u32, total: u32) {
        self.set(headers::FRAGMENT, format!("{index}/{total}"));
    }

    /// NATS-style queue group name (the host) registered for unicast delivery.
    pub fn queue_group(&self) -> Option<&str> {
        self.get(headers::QUEUE)
    }

    pub fn set_queue_group(&mut self, group: impl Into<String>) {
        self.set(headers::QUEUE, group);
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.get(headers::TRACE_ID)
    }

    pub fn set_trace_id(&mut self, id: impl Into<String>) {
        self.set(headers::TRACE_ID, id);
    }

    pub fn actor_claims(&self) -> Option<serde_json::Value> {
        self.get(headers::ACTOR)
            .and_then(|v| serde_json::from_str(v).ok())
    }

    pub fn set_actor_claims(&mut self, claims: &serde_json::Value) {
        if let Ok(s) = serde_json::to_string(claims) {
            self.set(headers::ACTOR, s);
        }
    }

    pub fn x_forwarded_full_url(&self) -> &[String] {
        self.get_all(headers::X_FORWARDED_FULL_URL)
    }

    pub fn add_x_forwarded_full_url(&mut self, url: impl Into<String>) {
        self.add(headers::X_FORWARDED_FULL_URL, url);
    }

    /// The HTTP-shaped method this call carries, for in-process dispatch.
    pub fn dispatch_method(&self) -> Option<&str> {
        self.get(headers::DISPATCH_METHOD)
    }

    pub fn set_dispatch_method(&mut self, method: impl Into<String>) {
        self.set(headers::DISPATCH_METHOD, method);
    }

    /// The HTTP-shaped path this call carries, for in-process dispatch.
    pub fn dispatch_path(&self) -> Option<&str> {
        self.get(headers::DISPATCH_PATH)
    }

    pub fn set_dispatch_path(&mut self, path: impl Into<String>) {
        self.set(headers::DISPATCH_PATH, path);
    }

    /// The HTTP status of a reply frame, if set.
    pub fn status(&self) -> Option<u16> {
        self.get(headers::STATUS).and_then(|v| v.parse().ok())
    }

    pub fn set_status(&mut self, status: u16) {
        self.set(headers::STATUS, status.to_string());
    }

    /// Serializes this frame and `body` into one wire-transmissible blob: a
    /// 4-byte little-endian header length, the JSON-encoded header map, then
    /// the raw body bytes.
    pub fn to_wire(&self, body: &[u8]) -> Vec<u8> {
        let header = serde_json::to_vec(self).expect("Frame always serializes");
        let mut out = Vec::with_capacity(4 + header.len() + body.len());
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(body);
        out
    }

    /// Inverse of [`Frame::to_wire`].
    pub fn from_wire(bytes: &[u8]) -> Result<(Frame, Vec<u8>), fabric_errors::Error> {
        if bytes.len() < 4 {
            return Err(fabric_errors::Error::new(
                "malformed envelope: truncated header length",
                vec![],
            ));
        }
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + len {
            return Err(fabric_errors::Error::new(
                "malformed envelope: truncated header",
                vec![],
            ));
        }
        let frame: Frame = serde_json::from_slice(&bytes[4..4 + len]).map_err(|e| {
            fabric_errors::Error::new(format!("malformed envelope header: {e}"), vec![])
        })?;
        let body = bytes[4 + len..].to_vec();
        Ok((frame, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_but_canonical_on_output() {
        let mut f = Frame::new();
        f.set("MICROBUS-CALL-ID", "abc");
        assert_eq!(f.get("microbus-call-id"), Some("abc"));
        assert_eq!(f.call_id(), Some("abc"));
        assert_eq!(f.iter().next().unwrap().0, "Microbus-Call-Id");
    }

    #[test]
    fn hop_count_defaults_to_zero_and_increments() {
        let mut f = Frame::new();
        assert_eq!(f.hop_count(), 0);
        assert_eq!(f.increment_hop_count(), 1);
        assert_eq!(f.increment_hop_count(), 2);
        assert_eq!(f.hop_count(), 2);
    }

    #[test]
    fn fragment_round_trips() {
        let mut f = Frame::new();
        f.set_fragment(2, 5);
        assert_eq!(f.fragment(), Some((2, 5)));
    }

    #[test]
    fn time_budget_round_trips_as_millis() {
        let mut f = Frame::new();
        f.set_time_budget(Duration::from_millis(1500));
        assert_eq!(f.time_budget(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn actor_claims_round_trip_json() {
        let mut f = Frame::new();
        f.set_actor_claims(&serde_json::json!({"sub": "alice"}));
        assert_eq!(f.actor_claims().unwrap()["sub"], "alice");
    }

    #[test]
    fn wire_round_trips_header_and_body() {
        let mut f = Frame::new();
        f.set_call_id("abc");
        f.set_dispatch_method("POST");
        f.set_dispatch_path("/echo");
        let wire = f.to_wire(b"ping");
        let (decoded, body) = Frame::from_wire(&wire).unwrap();
        assert_eq!(decoded.call_id(), Some("abc"));
        assert_eq!(decoded.dispatch_path(), Some("/echo"));
        assert_eq!(body, b"ping");
    }

    #[test]
    fn from_wire_rejects_truncated_bytes() {
        assert!(Frame::from_wire(&[1, 2]).is_err());
    }

    #[test]
    fn status_round_trips() {
        let mut f = Frame::new();
        f.set_status(503);
        assert_eq!(f.status(), Some(503));
    }

    #[test]
    fn x_forwarded_accumulates_a_chain() {
        let mut f = Frame::new();
        f.add_x_forwarded_full_url("https://a.example/one");
        f.add_x_forwarded_full_url("https://b.example/two");
        assert_eq!(f.x_forwarded_full_url().len(), 2);
    }
}
