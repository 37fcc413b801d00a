// src/schema/export.rs

//! Export of the live schema through catalog introspection

use super::model::Schema;
use crate::db::catalog;
use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Export every live table whose name starts with `db_prefix`
///
/// The schema is named after the database the tables were found in.
pub fn export_schema(
    conn: &Connection,
    schema_name: Option<&str>,
    db_prefix: &str,
) -> Result<Schema> {
    let prefix = db_prefix.to_ascii_lowercase();
    let tables = catalog::find_tables(conn, schema_name, |name| {
        name.to_ascii_lowercase().starts_with(&prefix)
    })?;

    let name = tables
        .first()
        .map(|t| t.database.clone())
        .or_else(|| schema_name.map(str::to_string))
        .unwrap_or_else(|| "main".to_string());
    let mut schema = Schema::new(&name, db_prefix);
    for table in &tables {
        schema
            .tables
            .push(catalog::describe_table(conn, &table.database, &table.name)?);
    }
    debug!(
        "Exported {} tables with prefix '{}' from {}",
        schema.tables.len(),
        db_prefix,
        name
    );
    Ok(schema)
}
