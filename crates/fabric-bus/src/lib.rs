//! Pub/sub bus abstraction for the fabric runtime, plus an in-process
//! transport used by tests, demos, and single-binary deployments.

pub mod bus;
pub mod inproc;
pub mod subject;

pub use bus::{Bus, BusSubscription};
pub use inproc::{InProcBus, SharedBus};
