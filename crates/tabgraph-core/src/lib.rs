//! tabgraph-core: Shared value types for the tabgraph loader.
//!
//! This crate provides the types passed between the loader and the graph store:
//! - Node identities and scalar property values
//! - Node and relationship write requests
//! - Load modes, validation violations, and the per-run load report

pub mod report;
pub mod types;

pub use report::{FileFailure, LoadCounts, LoadMode, LoadReport, Severity, Violation};
pub use types::{NodeId, NodeWrite, PropertyValue, RelationshipWrite};
