//! The aquaring peer node: one tank in the distributed aquarium.
//!
//! A tank hosts fish, exchanges them with its ring neighbors under the
//! protection of the circulating token, participates in distributed
//! snapshots, and tracks where its home-grown fish have migrated to.
//!
//! All mutable node state lives in [`TankModel`], which is a pure state
//! machine: every inbound message and every timer firing is a method call
//! that returns the messages to send. [`TankNode`] owns the model behind a
//! single mutex and wires it to a transport, so the receive path and the
//! simulation tick are mutually exclusive by construction.

pub mod config;
pub mod error;
pub mod events;
pub mod location;
pub mod model;
pub mod node;
pub mod snapshot;

pub use config::TankConfig;
pub use error::TankError;
pub use events::{EventBus, TankEvent};
pub use location::{Hop, LocationTable};
pub use model::TankModel;
pub use node::TankNode;
pub use snapshot::{RecordMode, SnapshotState};
