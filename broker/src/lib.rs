//! Ring membership broker for the aquaring protocol.
//!
//! The broker owns the ordered ring of registered tanks. It assigns
//! identities on join, repairs left/right adjacency on every membership
//! change, evicts members whose lease has lapsed, and answers name
//! resolution queries. Tanks talk to each other directly; they only come
//! back to the broker for (re)registration, renewal, and resolution.

pub mod broker;
pub mod config;
pub mod error;
pub mod registry;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use registry::{ClientRecord, ClientRegistry};
