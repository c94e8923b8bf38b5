//! The Connector runtime: config store, deployment modes, the small-object
//! recycler, path routing, fragment reassembly, and the subscription and
//! publication engines that together turn a bus into an RPC fabric.

pub mod config_store;
pub mod connector;
pub mod deployment;
pub mod fragments;
pub mod ids;
pub mod publication_engine;
pub mod recycler;
pub mod routing;
pub mod subscription_engine;
pub mod wire_response;

pub use config_store::ConfigStore;
pub use connector::{BoxedTask, Connector};
pub use deployment::DeploymentMode;
pub use ids::{IdSource, RandomIdSource};
pub use publication_engine::PublicationEngine;
pub use recycler::Recycler;
pub use routing::{RouteId, Trie};
pub use subscription_engine::{Handler, SubscriptionEngine, SubscriptionOptions};
