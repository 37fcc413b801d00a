// src/db/mod.rs

//! Database access for the schema bootstrap
//!
//! The bootstrap talks to the database through a single `rusqlite::Connection`
//! owned by the caller. This module holds the connection helpers, the applied
//! patch records and catalog introspection.

pub mod applied_patch;
pub mod catalog;

pub use applied_patch::{AppliedPatchRecord, AppliedPatchTable};

use crate::error::Result;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Open a database, creating parent directories as needed
pub fn open(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    debug!("Opened database at {}", db_path);
    Ok(conn)
}

/// Quote an identifier for use in generated SQL
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a column value as text; NULL becomes `None`
pub(crate) fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
    }
}

/// Check whether a table can be queried through the connection
///
/// The probe is a plain `SELECT`; any failure counts as "absent".
pub fn table_is_queryable(conn: &Connection, table: &str) -> bool {
    let sql = format!("SELECT * FROM {} LIMIT 1", quote_ident(table));
    let probe = conn.prepare(&sql).and_then(|mut stmt| {
        let mut rows = stmt.query([])?;
        rows.next().map(|_| ())
    });
    probe.is_ok()
}
