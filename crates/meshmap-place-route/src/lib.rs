//! Mapping for Mesh-Connected Multi-Chip Machines
//!
//! This crate handles:
//! - Machine model: chips, six-link mesh, regions rooted at ethernet chips
//! - Radial placement of graph vertices under resource and co-location
//!   constraints
//! - Fixed-route trees funnelling each region to its ethernet chip
//! - Malloc-style multicast routing table compression
//! - Mesh distance and reachability primitives

pub mod config;
pub mod error;
pub mod graph;
pub mod machine;
pub mod mesh;
pub mod placer;
pub mod router;

pub use error::{MeshMapError, Result};
pub use graph::{Constraint, ConstraintKind, MachineGraph, ResourceRequirement, Vertex, VertexId};
pub use machine::{Chip, ChipCoord, Direction, Machine, MachineBuilder};
pub use placer::{Placement, Placements, RadialPlacer, ResourceTracker};
pub use router::{
    FixedRouteBuilder, FixedRouteEntry, FixedRouteTables, MallocBasedRouteMerger,
    MulticastRoutingEntry, MulticastRoutingTable, MulticastRoutingTables,
};
