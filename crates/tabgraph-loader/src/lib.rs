//! tabgraph-loader: Schema-driven validation and load engine.
//!
//! A run builds the [`schema::Schema`] once, parses every input file into
//! [`record::Record`]s, assigns deterministic identities, validates the whole
//! batch and finally hands it to the [`engine::LoadEngine`], which writes one
//! transaction per file into a [`tabgraph_graph::GraphStore`].

pub mod backup;
pub mod config;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod files;
pub mod identity;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod validator;

pub use config::{BackupConfig, LoaderConfig, ReferencePolicy};
pub use engine::{FileBatch, LoadEngine};
pub use error::{LoadError, LoaderError, ParseError, Result};
pub use pipeline::{Loader, RunFlags, RunOutcome};
pub use schema::{Schema, SchemaError};
