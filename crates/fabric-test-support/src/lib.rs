//! Shared test utilities for exercising the fabric runtime end to end:
//! a multi-connector harness over one in-process bus, a handful of stock
//! `Handler`s, and a deterministic id source. Used by this workspace's own
//! scenario tests and by downstream service crates that want the same
//! harness rather than reinventing it per test file.

pub mod handlers;
pub mod harness;
pub mod ids;

pub use harness::{drain, shutdown_all, start_all, TestFabric};
pub use ids::SequentialIdSource;
