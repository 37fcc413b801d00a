// src/schema/mod.rs

//! Schema snapshots, reference definitions and validation
//!
//! The live schema is exported through catalog introspection into the same
//! model that reference XML files are parsed into, so both sides can be
//! compared structurally. Validation and dumping are diagnostics and never
//! fail a bootstrap.

pub mod compare;
pub mod dump;
pub mod export;
pub mod model;
pub mod validator;
pub mod xml;

pub use compare::{Difference, DifferenceKind, compare};
pub use dump::{DEFAULT_DUMP_PREFIXES, dump_schema};
pub use export::export_schema;
pub use model::{Column, Index, PrimaryKey, Schema, Table};
pub use validator::{SchemaValidator, ValidationReport};
pub use xml::{parse_schema, write_schema};
