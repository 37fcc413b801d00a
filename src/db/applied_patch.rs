// src/db/applied_patch.rs

//! Applied patch records
//!
//! One row per patch attempt, keyed by patch id. Rows are inserted by the
//! patch engine and only ever updated to supersede a failed attempt.

use crate::db::catalog::{self, TableRef};
use crate::db::quote_ident;
use crate::error::Result;
use crate::patch::Patch;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::fmt;

/// The two accepted names of the applied patch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AppliedPatchTable {
    /// `alf_applied_patch`
    Current,
    /// `applied_patch`, used by very old schemas
    Legacy,
}

impl AppliedPatchTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedPatchTable::Current => "alf_applied_patch",
            AppliedPatchTable::Legacy => "applied_patch",
        }
    }

    /// Match a catalog table name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("alf_applied_patch") {
            Some(AppliedPatchTable::Current)
        } else if name.eq_ignore_ascii_case("applied_patch") {
            Some(AppliedPatchTable::Legacy)
        } else {
            None
        }
    }

    fn ident(&self) -> String {
        quote_ident(self.as_str())
    }

    /// Find every applied patch table visible through the connection
    pub fn locate(
        conn: &Connection,
        schema_name: Option<&str>,
    ) -> Result<Vec<(TableRef, AppliedPatchTable)>> {
        let found = catalog::find_tables(conn, schema_name, |name| Self::from_name(name).is_some())?;
        Ok(found
            .into_iter()
            .filter_map(|table| Self::from_name(&table.name).map(|kind| (table, kind)))
            .collect())
    }
}

impl fmt::Display for AppliedPatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// DDL for the applied patch table
pub const CREATE_APPLIED_PATCH_TABLE: &str = "CREATE TABLE IF NOT EXISTS alf_applied_patch (
    id VARCHAR(64) NOT NULL PRIMARY KEY,
    description VARCHAR(1024),
    fixes_from_schema INTEGER,
    fixes_to_schema INTEGER,
    applied_to_schema INTEGER,
    applied_on_date VARCHAR(64),
    applied_to_server VARCHAR(64),
    was_executed BOOLEAN,
    succeeded BOOLEAN,
    report VARCHAR(1024)
)";

/// Id of the record written when a schema is created
pub const SCHEMA_CREATED_ID: &str = "schema.create";

const SELECT_COLUMNS: &str = "id, description, fixes_from_schema, fixes_to_schema, \
    applied_to_schema, applied_on_date, applied_to_server, \
    was_executed, succeeded, report";

/// A persisted patch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedPatchRecord {
    pub id: String,
    pub description: Option<String>,
    pub fixes_from_schema: Option<i32>,
    pub fixes_to_schema: Option<i32>,
    pub applied_to_schema: Option<i32>,
    pub applied_on_date: Option<String>,
    pub applied_to_server: Option<String>,
    pub was_executed: bool,
    pub succeeded: bool,
    pub report: Option<String>,
}

impl AppliedPatchRecord {
    /// Build a record describing an attempt of `patch`
    pub fn for_patch(
        patch: &Patch,
        applied_to_schema: i32,
        server: &str,
        succeeded: bool,
        was_executed: bool,
        report: String,
    ) -> Self {
        Self {
            id: patch.id.clone(),
            description: Some(patch.description.clone()),
            fixes_from_schema: patch.fixes_from_schema,
            fixes_to_schema: Some(patch.fixes_to_schema),
            applied_to_schema: Some(applied_to_schema),
            applied_on_date: Some(chrono::Utc::now().to_rfc3339()),
            applied_to_server: Some(server.to_string()),
            was_executed,
            succeeded,
            report: Some(report),
        }
    }

    /// Record that a new schema was created at `version`
    ///
    /// Keeps a freshly created table non-empty and pins the installed
    /// version, so patches registered by later releases are checked.
    pub fn schema_created(version: i32, server: &str) -> Self {
        Self {
            id: SCHEMA_CREATED_ID.to_string(),
            description: Some(format!("Schema created at version {}", version)),
            fixes_from_schema: None,
            fixes_to_schema: Some(version),
            applied_to_schema: Some(version),
            applied_on_date: Some(chrono::Utc::now().to_rfc3339()),
            applied_to_server: Some(server.to_string()),
            was_executed: false,
            succeeded: true,
            report: Some(format!("Placeholder for new schema at version {}", version)),
        }
    }

    /// Insert this record
    pub fn insert(&self, conn: &Connection, table: AppliedPatchTable) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                table.ident(),
                SELECT_COLUMNS
            ),
            params![
                &self.id,
                &self.description,
                &self.fixes_from_schema,
                &self.fixes_to_schema,
                &self.applied_to_schema,
                &self.applied_on_date,
                &self.applied_to_server,
                self.was_executed,
                self.succeeded,
                &self.report,
            ],
        )?;
        Ok(())
    }

    /// Replace a failed attempt with this record
    ///
    /// Returns `false` if there was no failed row to replace.
    pub fn supersede_failure(&self, conn: &Connection, table: AppliedPatchTable) -> Result<bool> {
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET description = ?2, fixes_from_schema = ?3, fixes_to_schema = ?4, \
                 applied_to_schema = ?5, applied_on_date = ?6, applied_to_server = ?7, \
                 was_executed = ?8, succeeded = ?9, report = ?10 \
                 WHERE id = ?1 AND (succeeded IS NULL OR succeeded = 0)",
                table.ident()
            ),
            params![
                &self.id,
                &self.description,
                &self.fixes_from_schema,
                &self.fixes_to_schema,
                &self.applied_to_schema,
                &self.applied_on_date,
                &self.applied_to_server,
                self.was_executed,
                self.succeeded,
                &self.report,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Find the record for a patch id
    pub fn find_by_id(
        conn: &Connection,
        table: AppliedPatchTable,
        id: &str,
    ) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE id = ?1",
            SELECT_COLUMNS,
            table.ident()
        ))?;
        let record = stmt.query_row([id], Self::from_row).optional()?;
        Ok(record)
    }

    /// List all records, ordered by id
    pub fn list_all(conn: &Connection, table: AppliedPatchTable) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY id",
            SELECT_COLUMNS,
            table.ident()
        ))?;
        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of rows in the table
    pub fn count(conn: &Connection, table: AppliedPatchTable) -> Result<i64> {
        let count = conn.query_row(
            &format!("SELECT COUNT(id) FROM {}", table.ident()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Check whether a patch succeeded
    ///
    /// For an alternative the patch must also have been executed: a placeholder
    /// row does not stand in for another patch.
    pub fn did_patch_succeed(
        conn: &Connection,
        table: AppliedPatchTable,
        id: &str,
        alternative: bool,
    ) -> Result<bool> {
        let row: Option<(Option<bool>, Option<bool>)> = conn
            .query_row(
                &format!(
                    "SELECT succeeded, was_executed FROM {} WHERE id = ?1",
                    table.ident()
                ),
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            None => false,
            Some((succeeded, was_executed)) => {
                let succeeded = succeeded.unwrap_or(false);
                if alternative {
                    succeeded && was_executed.unwrap_or(false)
                } else {
                    succeeded
                }
            }
        })
    }

    /// The schema version the database was installed at, or -1 for a new install
    pub fn installed_schema_version(conn: &Connection, table: AppliedPatchTable) -> Result<i32> {
        let version: Option<i32> = conn.query_row(
            &format!(
                "SELECT MIN(applied_to_schema) FROM {} WHERE applied_to_schema > -1",
                table.ident()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(-1))
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let was_executed: Option<bool> = row.get(7)?;
        let succeeded: Option<bool> = row.get(8)?;
        Ok(Self {
            id: row.get(0)?,
            description: row.get(1)?,
            fixes_from_schema: row.get(2)?,
            fixes_to_schema: row.get(3)?,
            applied_to_schema: row.get(4)?,
            applied_on_date: row.get(5)?,
            applied_to_server: row.get(6)?,
            was_executed: was_executed.unwrap_or(false),
            succeeded: succeeded.unwrap_or(false),
            report: row.get(9)?,
        })
    }
}
