// src/error.rs

//! Error types for schema bootstrap
//!
//! Lock contention and schema presence are routine outcomes and are modelled
//! as values (`LockResult`, `Progress`, `SchemaState`), not as errors. Everything
//! here is fatal to the bootstrap attempt that raised it.

use crate::script::ScriptSyntaxError;
use thiserror::Error;

/// Errors raised while creating, upgrading or validating a schema
#[derive(Error, Debug)]
pub enum Error {
    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed reference schema or dump
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Reference schema is well-formed XML but not a schema document
    #[error("Invalid schema document: {0}")]
    InvalidSchemaDocument(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Regex error in a dialect rule or schema effect
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration value is not acceptable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// More than one applied patch table is visible through the connection
    #[error(
        "More than one applied patch table is visible ({0}); limit the connection to a single schema"
    )]
    MultipleSchemasDetected(String),

    /// A script or reference resource could not be found
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Script directive or statement layout is invalid
    #[error("{kind} (script {url}, line {line})")]
    ScriptSyntax {
        url: String,
        line: usize,
        kind: ScriptSyntaxError,
    },

    /// Nested includes went deeper than the interpreter allows
    #[error("Script includes nested deeper than {max} levels at {url}")]
    IncludeDepthExceeded { url: String, max: usize },

    /// A script includes itself, directly or indirectly
    #[error("Script include cycle: {chain}")]
    IncludeCycle { chain: String },

    /// A non-optional statement failed
    #[error(
        "Statement execution failed:\n   SQL: {sql}\n   Error: {source}\n   File: {url}\n   Line: {line}"
    )]
    StatementFailed {
        sql: String,
        url: String,
        line: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// A patch script should already have run but has not
    #[error("The patch '{patch_id}' has not been applied: script {script_url} must be run")]
    UnrunScript { patch_id: String, script_url: String },

    /// The bootstrap marker could not be removed
    #[error(
        "The bootstrap marker table could not be removed; a previous schema bootstrap may have failed: {0}"
    )]
    PreviousFailedBootstrap(String),

    /// Another node kept the bootstrap marker for every retry
    #[error("A schema upgrade is in progress on another node (gave up after {attempts} attempts)")]
    UpgradeInProgressOnAnotherNode { attempts: u32 },

    /// Validate-only mode found no schema at all
    #[error("No schema found: the applied patch table is missing")]
    SchemaMissing,

    /// Validate-only mode found the secondary engine's tables missing
    #[error("The {0} schema tables are missing")]
    SecondarySchemaMissing(String),

    /// Forced stop requested by configuration
    #[error("Schema bootstrap stopped on request (stop_after_bootstrap)")]
    BootstrapStopped,

    /// Schema update failed
    #[error("Schema update failed: {0}")]
    UpdateFailed(#[source] Box<Error>),

    /// Schema validation failed
    #[error("Schema validation failed: {0}")]
    ValidationFailed(#[source] Box<Error>),
}

/// Result type for schema bootstrap operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an error in `UpdateFailed` or `ValidationFailed`
    pub(crate) fn wrap_bootstrap(self, update_requested: bool) -> Self {
        match self {
            Error::BootstrapStopped => self,
            other if update_requested => Error::UpdateFailed(Box::new(other)),
            other => Error::ValidationFailed(Box::new(other)),
        }
    }

    /// The innermost error, looking through the bootstrap wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::UpdateFailed(inner) | Error::ValidationFailed(inner) => inner.root(),
            other => other,
        }
    }
}
