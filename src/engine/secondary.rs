// src/engine/secondary.rs

//! Secondary (process engine) schema
//!
//! The process engine owns a separate set of tables with its own creation
//! routine. It borrows the bootstrap connection and never owns it.

use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// A subsystem that creates its own tables on the shared connection
pub trait SecondarySchemaEngine {
    /// Name used in logs, reports and placeholder records
    fn name(&self) -> &str;

    /// Cheap probe that fails when the tables are absent
    fn tables_exist(&self, conn: &Connection) -> bool;

    /// Create the subsystem's tables
    fn create_schema(&self, conn: &Connection) -> Result<()>;
}

/// Process engine whose schema comes from a DDL script and a probe query
#[derive(Debug, Clone)]
pub struct ScriptedProcessEngine {
    name: String,
    probe_sql: String,
    ddl: String,
}

impl ScriptedProcessEngine {
    pub fn new(name: &str, probe_sql: &str, ddl: &str) -> Self {
        Self {
            name: name.to_string(),
            probe_sql: probe_sql.to_string(),
            ddl: ddl.to_string(),
        }
    }
}

impl SecondarySchemaEngine for ScriptedProcessEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables_exist(&self, conn: &Connection) -> bool {
        let probe = conn.prepare(&self.probe_sql).and_then(|mut stmt| {
            let mut rows = stmt.query([])?;
            rows.next().map(|_| ())
        });
        if let Err(e) = &probe {
            debug!("{} tables not found: {}", self.name, e);
        }
        probe.is_ok()
    }

    fn create_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&self.ddl)?;
        Ok(())
    }
}
