//! Graph store backends for the loader: Neo4j and in-memory.
//!
//! The load engine talks to a store only through the [`GraphStore`] and
//! [`StoreTxn`] traits. Two backends implement them: [`GraphClient`] over
//! Neo4j, and [`MemoryGraph`], an in-process store with the same
//! transactional semantics.

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::MemoryGraph;
pub use store::{DeleteOutcome, GraphStore, MergeOutcome, StoreTxn};
