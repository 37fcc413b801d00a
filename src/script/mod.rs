// src/script/mod.rs

//! SQL script execution
//!
//! Scripts are plain SQL with `--` directives layered on top:
//!
//! - `--INCLUDE:<url>` runs another script in place
//! - `--ASSIGN:<var>=<column>[!<default>]` captures a column of the next statement
//! - `--FOREACH <table>.<column> <batch size property>` runs the next statement in id windows
//! - `--BEGIN TXN` / `--END TXN` bracket an explicit transaction
//! - `--SET-DELIMITER:<token>` changes the statement terminator
//!
//! A statement ends at a line ending with the delimiter. A delimiter followed
//! by `(optional)` marks a statement whose failure is logged and ignored.

mod context;
mod interpreter;

pub use context::ScriptExecutionContext;
pub use interpreter::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE_PROPERTY, ExecutionGate, MAX_INCLUDE_DEPTH,
    ScriptInterpreter,
};

use thiserror::Error;

/// Layout errors in a script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptSyntaxError {
    #[error("--INCLUDE: directive found inside an unterminated statement")]
    IncludeBeforeSql,

    #[error("--ASSIGN: directive found inside an unterminated statement")]
    AssignmentBeforeSql,

    #[error("Malformed directive '{0}', expected --ASSIGN:<variable>=<column>[!<default>]")]
    AssignmentFormat(String),

    #[error("--FOREACH directive found inside an unterminated statement")]
    ForeachBeforeSql,

    #[error("Malformed directive '{0}', expected --FOREACH <table>.<column> <batch size property>")]
    ForeachFormat(String),

    #[error("Transaction directive found inside an unterminated statement")]
    TransactionBeforeSql,

    #[error("--SET-DELIMITER: directive found inside an unterminated statement")]
    DelimiterBeforeSql,

    #[error("--SET-DELIMITER: requires a non-empty delimiter")]
    DelimiterInvalid,

    #[error("Statement is not terminated by '{delimiter}'")]
    UnterminatedStatement { delimiter: String },
}
