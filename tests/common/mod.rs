// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use rusqlite::Connection;
use schemaboot::db::{AppliedPatchRecord, AppliedPatchTable};
use schemaboot::{BootstrapConfig, MemoryLoader, PatchRegistry};
use std::path::PathBuf;
use tempfile::TempDir;

/// Version produced by [`CREATE_SCRIPT`]
pub const SCHEMA_VERSION: i32 = 100;

pub const CREATE_SCRIPT: &str = "\
-- application tables
CREATE TABLE app_store (
    id INTEGER NOT NULL PRIMARY KEY,
    protocol VARCHAR(50) NOT NULL
);

CREATE TABLE app_node (
    id INTEGER NOT NULL PRIMARY KEY,
    store_id INTEGER NOT NULL,
    uuid VARCHAR(36) NOT NULL
);

CREATE UNIQUE INDEX idx_app_node_uuid ON app_node (uuid);

INSERT INTO app_store (id, protocol) VALUES (1, 'workspace');
";

/// Reference schema matching [`CREATE_SCRIPT`]
pub const REFERENCE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<schema name="reference" dbprefix="app_" version="100">
  <objects>
    <table name="app_node">
      <columns>
        <column name="id" order="1"><type>INTEGER</type><nullable>false</nullable></column>
        <column name="store_id" order="2"><type>INTEGER</type><nullable>false</nullable></column>
        <column name="uuid" order="3"><type>VARCHAR(36)</type><nullable>false</nullable></column>
      </columns>
      <primarykey name="pk_app_node"><columnnames><columnname order="1">id</columnname></columnnames></primarykey>
      <indexes>
        <index name="idx_app_node_uuid" unique="true"><columnnames><columnname order="1">uuid</columnname></columnnames></index>
      </indexes>
    </table>
    <table name="app_store">
      <columns>
        <column name="id" order="1"><type>INTEGER</type><nullable>false</nullable></column>
        <column name="protocol" order="2"><type>varchar(50)</type><nullable>false</nullable></column>
      </columns>
      <primarykey name="pk_app_store"><columnnames><columnname order="1">id</columnname></columnnames></primarykey>
      <indexes/>
    </table>
  </objects>
</schema>
"#;

pub const CREATE_URL: &str = "classpath:db/create/${db.script.dialect}/schema.sql";
pub const REFERENCE_URL: &str = "classpath:db/reference/${db.script.dialect}/schema.xml";

/// Creation script and reference schema, stored under the generic dialect
pub fn base_loader() -> MemoryLoader {
    MemoryLoader::new()
        .with("db/create/Dialect/schema.sql", CREATE_SCRIPT)
        .with("db/reference/Dialect/schema.xml", REFERENCE_XML)
}

/// Registry with only the creation script
pub fn base_registry() -> PatchRegistry {
    let mut registry = PatchRegistry::new(SCHEMA_VERSION);
    registry.add_pre_create_script(CREATE_URL);
    registry
}

/// Configuration writing reports and dumps under `dir`, retrying quickly
pub fn test_config(dir: &TempDir) -> BootstrapConfig {
    BootstrapConfig {
        output_dir: dir.path().to_path_buf(),
        lock_retry_count: 3,
        lock_retry_wait_secs: 0,
        server_id: "node-1".to_string(),
        schema_version: SCHEMA_VERSION,
        schema_reference_urls: vec![REFERENCE_URL.to_string()],
        ..Default::default()
    }
}

/// A file-backed database in a fresh temp dir
///
/// Returns (TempDir, db_path) - keep the TempDir alive to prevent cleanup.
pub fn temp_db() -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("schema.db");
    (temp_dir, db_path)
}

/// Seed an existing schema installed at `version`
pub fn seed_existing_schema(conn: &Connection, version: i32) {
    conn.execute_batch(CREATE_SCRIPT).unwrap();
    conn.execute(
        schemaboot::db::applied_patch::CREATE_APPLIED_PATCH_TABLE,
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO alf_applied_patch (id, description, fixes_to_schema, applied_to_schema, \
         applied_to_server, was_executed, succeeded, report) \
         VALUES ('patch.seed', 'seed', ?1, ?1, 'installer', 0, 1, 'seeded')",
        [version],
    )
    .unwrap();
}

pub fn record(conn: &Connection, id: &str) -> Option<AppliedPatchRecord> {
    AppliedPatchRecord::find_by_id(conn, AppliedPatchTable::Current, id).unwrap()
}

pub fn record_count(conn: &Connection) -> i64 {
    AppliedPatchRecord::count(conn, AppliedPatchTable::Current).unwrap()
}

pub fn query_i64(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

pub fn table_exists(conn: &Connection, table: &str) -> bool {
    schemaboot::db::table_is_queryable(conn, table)
}
