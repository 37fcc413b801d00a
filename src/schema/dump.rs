// src/schema/dump.rs

//! XML dumps of the live schema
//!
//! Dumps are written before and after an upgrade, on forced exit and on
//! demand. A failed dump is logged and skipped.

use super::export::export_schema;
use super::xml::write_schema;
use crate::dialect::DialectProfile;
use crate::error::Result;
use rusqlite::Connection;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Table prefixes dumped when none are configured
pub const DEFAULT_DUMP_PREFIXES: [&str; 2] = ["alf_", "act_"];

/// Dump the live schema, one file per table prefix
///
/// Returns the files written; failures are logged as warnings.
pub fn dump_schema(
    conn: &Connection,
    profile: &DialectProfile,
    schema_name: Option<&str>,
    schema_version: Option<i32>,
    output_dir: &Path,
    phase: &str,
    prefixes: &[String],
) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for prefix in prefixes {
        match dump_prefix(conn, profile, schema_name, schema_version, output_dir, phase, prefix) {
            Ok(path) => {
                info!("Dumped '{}' tables ({}) to {}", prefix, phase, path.display());
                files.push(path);
            }
            Err(e) => warn!("Unable to dump schema for prefix '{}': {}", prefix, e),
        }
    }
    files
}

fn dump_prefix(
    conn: &Connection,
    profile: &DialectProfile,
    schema_name: Option<&str>,
    schema_version: Option<i32>,
    output_dir: &Path,
    phase: &str,
    prefix: &str,
) -> Result<PathBuf> {
    let mut schema = export_schema(conn, schema_name, prefix)?;
    schema.version = schema_version;

    let file = tempfile::Builder::new()
        .prefix(&format!(
            "Schema-{}-{}-{}-",
            profile.dialect().resource_name(),
            phase,
            prefix
        ))
        .suffix(".xml")
        .tempfile_in(output_dir)?;
    write_schema(&schema, BufWriter::new(file.as_file()))?;
    let (_, path) = file.keep().map_err(io::Error::from)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::schema::xml::parse_schema;

    #[test]
    fn test_dump_one_file_per_prefix() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE alf_node (id INTEGER PRIMARY KEY, uuid TEXT);
             CREATE TABLE act_ru_task (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let prefixes: Vec<String> = DEFAULT_DUMP_PREFIXES.iter().map(|p| p.to_string()).collect();

        let files = dump_schema(
            &conn,
            &profile,
            None,
            Some(7),
            temp_dir.path(),
            "pre-upgrade",
            &prefixes,
        );
        assert_eq!(files.len(), 2);

        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Schema-SQLiteDialect-pre-upgrade-alf_-"));
        assert!(name.ends_with(".xml"));

        let schema = parse_schema(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(schema.version, Some(7));
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(schema.tables[0].name, "alf_node");
    }

    #[test]
    fn test_dump_failure_is_not_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let files = dump_schema(
            &conn,
            &profile,
            None,
            None,
            Path::new("/nonexistent/schemaboot/dumps"),
            "forced-exit",
            &["alf_".to_string()],
        );
        assert!(files.is_empty());
    }
}
