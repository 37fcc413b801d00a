// src/lib.rs

//! Schemaboot
//!
//! Creates, upgrades and validates an application's database schema at
//! startup, safely when several nodes share one database.
//!
//! # Architecture
//!
//! - Patches: registered once, applied in order, recorded in `alf_applied_patch`
//! - Scripts: plain SQL with `--INCLUDE`, `--ASSIGN`, `--FOREACH` and transaction directives
//! - Cluster lock: a marker table created lazily before the first schema change
//! - Validation: live schema compared with dialect-specific reference XML
//! - Dialects: a closed set of SQL variants with their own literals and DDL rewrites

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod dialect;
pub mod engine;
mod error;
pub mod lock;
pub mod patch;
pub mod resource;
pub mod schema;
pub mod script;

pub use bootstrap::{BootstrapOutcome, BootstrapReport, SchemaBootstrap};
pub use config::BootstrapConfig;
pub use dialect::{Dialect, DialectProfile};
pub use engine::{
    ApplyOutcome, PatchApplicationEngine, SchemaState, ScriptedProcessEngine,
    SecondarySchemaEngine,
};
pub use error::{Error, Result};
pub use lock::{ClusterBootstrapLock, LockResult, Progress};
pub use patch::{Patch, PatchBody, PatchLogic, PatchRegistry};
pub use resource::{DirectoryLoader, MemoryLoader, ResourceLoader};
pub use schema::validator::{SchemaValidator, ValidationReport};
pub use script::{ExecutionGate, ScriptExecutionContext, ScriptInterpreter, ScriptSyntaxError};
