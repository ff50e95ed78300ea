//! Topology model, path selection and reservation bookkeeping for the fog
//! development kit controller.
//!
//! This crate is the "hard part" of the controller: everything it exposes
//! is pure/local state and synchronous algorithms. Anything that talks to
//! the outside world — the SDN controller's REST surface, the container
//! orchestrator, the TCP request servers — lives in the `fdk-controller`
//! binary crate and is built on top of these types.

pub mod edge;
pub mod node;
pub mod path;
pub mod reservation;
pub mod topology;

pub use edge::Edge;
pub use node::{EdgeState, FogState, Node, NodeId, PortConfig, PortId, Queue, QosEntry, QueueRef, SwitchState};
pub use path::{select_fog, shortest_paths, FogSelectionError, PathResult};
pub use reservation::{HopRecord, ReservationKey, ReservationRecord, ReservationTable};
pub use topology::{EdgeKey, Topology, TopologyGuard, TopologyKind};
