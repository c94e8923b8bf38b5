//! Fragment reassembly for calls whose serialized payload exceeded one bus
//! message. Fragments of one call share `(call id, fragment total)` and
//! must exhaust the index range exactly once before the timeout elapses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fabric_wire::Frame;

/// NATS' default max payload. Outgoing frames (requests and replies alike)
/// whose serialized body exceeds this are split across several fragment
/// frames sharing one call id; see [`split_into_frames`].
pub const BUS_MESSAGE_MAX: usize = 1024 * 1024;

/// Splits `body` into one or more `(Frame, chunk)` pairs ready to publish.
/// A body that already fits in `max` is returned as a single pair with no
/// `Microbus-Fragment` header at all, matching the unfragmented wire shape
/// the receiving side expects. `envelope` is cloned per chunk since each
/// fragment needs its own `Microbus-Fragment` index/total.
pub fn split_into_frames(envelope: Frame, body: Vec<u8>, max: usize) -> Vec<(Frame, Vec<u8>)> {
    if body.len() <= max {
        return vec![(envelope, body)];
    }
    let total = body.len().div_ceil(max) as u32;
    body.chunks(max)
        .enumerate()
        .map(|(i, chunk)| {
            let mut f = envelope.clone();
            f.set_fragment(i as u32, total);
            (f, chunk.to_vec())
        })
        .collect()
}

struct Buffer {
    total: u32,
    parts: HashMap<u32, Vec<u8>>,
    first_frame: Frame,
    deadline: Instant,
}

/// Accumulates fragments per call id until all indices have arrived or the
/// assembly deadline passes.
#[derive(Default)]
pub struct FragmentAssembler {
    buffers: Mutex<HashMap<String, Buffer>>,
}

pub enum Assembled {
    /// Nothing fragmented about this call; pass it straight through.
    Whole(Frame, Vec<u8>),
    /// One more fragment absorbed; the call is still incomplete.
    Pending,
    /// All fragments arrived in time; here is the reassembled call.
    Complete(Frame, Vec<u8>),
    /// The assembly deadline passed before every fragment arrived.
    TimedOut,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        FragmentAssembler::default()
    }

    /// Feeds one inbound frame/body pair in. `timeout` bounds how long a
    /// call id's buffer is kept waiting for the remaining fragments,
    /// defaulting to the frame's own time budget when the caller has none
    /// more specific to offer.
    pub fn feed(&self, frame: Frame, body: Vec<u8>, timeout: Duration) -> Assembled {
        let Some((index, total)) = frame.fragment() else {
            return Assembled::Whole(frame, body);
        };
        if total <= 1 {
            return Assembled::Whole(frame, body);
        }
        let Some(call_id) = frame.call_id().map(str::to_owned) else {
            return Assembled::Whole(frame, body);
        };

        let mut buffers = self.buffers.lock().unwrap();
        prune_expired(&mut buffers);

        let buffer = buffers.entry(call_id.clone()).or_insert_with(|| Buffer {
            total,
            parts: HashMap::new(),
            first_frame: frame.clone(),
            deadline: Instant::now() + timeout,
        });
        buffer.parts.insert(index, body);

        if (buffer.parts.len() as u32) < buffer.total {
            return Assembled::Pending;
        }

        let Buffer {
            total,
            parts,
            first_frame,
            ..
        } = buffers.remove(&call_id).unwrap();
        let mut assembled = Vec::new();
        for i in 0..total {
            match parts.get(&i) {
                Some(part) => assembled.extend_from_slice(part),
                None => return Assembled::Pending,
            }
        }
        Assembled::Complete(first_frame, assembled)
    }
}

fn prune_expired(buffers: &mut HashMap<String, Buffer>) {
    let now = Instant::now();
    buffers.retain(|_, buf| buf.deadline > now);
}
