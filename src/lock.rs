// src/lock.rs

//! Cluster-wide bootstrap lock
//!
//! Nodes sharing one database coordinate through a marker table. Creating the
//! table takes the lock: only one `CREATE TABLE` can succeed, so losing that
//! race is the contention signal. Dropping the table releases it.
//!
//! The lock is taken lazily, just before the first statement that would
//! change the schema, so a node with nothing to do never touches it.

use crate::db::table_is_queryable;
use crate::error::{Error, Result};
use crate::script::{ExecutionGate, ScriptExecutionContext};
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Name of the marker table
pub const LOCK_TABLE: &str = "alf_bootstrap_lock";

const CREATE_LOCK_TABLE: &str = "CREATE TABLE alf_bootstrap_lock (charval CHAR(1) NOT NULL)";
const DROP_LOCK_TABLE: &str = "DROP TABLE alf_bootstrap_lock";

/// Outcome of trying to take the bootstrap lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Acquired,
    HeldByOther,
}

/// Outcome of a bootstrap step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step ran to completion
    Done,
    /// Another node holds the bootstrap lock; retry later
    Contended,
}

impl Progress {
    pub fn is_contended(&self) -> bool {
        matches!(self, Progress::Contended)
    }
}

impl From<LockResult> for Progress {
    fn from(result: LockResult) -> Self {
        match result {
            LockResult::Acquired => Progress::Done,
            LockResult::HeldByOther => Progress::Contended,
        }
    }
}

/// The marker-table lock
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterBootstrapLock;

impl ClusterBootstrapLock {
    /// Try to create the marker table
    ///
    /// Any failure means another node got there first (or we may not create
    /// tables at all); either way this node must not proceed.
    pub fn mark_started(&self, conn: &Connection, ctx: &mut ScriptExecutionContext) -> LockResult {
        match conn.execute(CREATE_LOCK_TABLE, []) {
            Ok(_) => {
                ctx.begin();
                info!("Acquired schema bootstrap lock");
                LockResult::Acquired
            }
            Err(e) => {
                debug!("Unable to create {}: {}", LOCK_TABLE, e);
                LockResult::HeldByOther
            }
        }
    }

    /// Drop the marker table and end this attempt's ownership
    pub fn mark_completed(&self, conn: &Connection, ctx: &mut ScriptExecutionContext) -> Result<()> {
        conn.execute(DROP_LOCK_TABLE, [])
            .map_err(|e| Error::PreviousFailedBootstrap(e.to_string()))?;
        ctx.clear();
        info!("Released schema bootstrap lock");
        Ok(())
    }

    /// Best-effort release after a failed attempt
    pub fn release_after_failure(&self, conn: &Connection, ctx: &mut ScriptExecutionContext) {
        if !conn.is_autocommit()
            && let Err(e) = conn.execute_batch("ROLLBACK")
        {
            warn!("Unable to roll back open transaction: {}", e);
        }
        if let Err(e) = self.mark_completed(conn, ctx) {
            warn!("Unable to release schema bootstrap lock after failure: {}", e);
        }
    }

    /// Check whether another node is in the middle of a bootstrap
    ///
    /// Once this attempt has executed a statement it owns the bootstrap and
    /// the marker is no longer consulted.
    pub fn is_another_node_bootstrapping(
        &self,
        conn: &Connection,
        ctx: &ScriptExecutionContext,
    ) -> bool {
        !ctx.has_executed() && table_is_queryable(conn, LOCK_TABLE)
    }

    /// `Contended` if another node is bootstrapping
    pub fn ensure_bootstrapping(&self, conn: &Connection, ctx: &ScriptExecutionContext) -> Progress {
        if self.is_another_node_bootstrapping(conn, ctx) {
            info!("Another node is bootstrapping the schema");
            Progress::Contended
        } else {
            Progress::Done
        }
    }
}

impl ExecutionGate for ClusterBootstrapLock {
    fn on_first_statement(
        &mut self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
    ) -> Result<LockResult> {
        Ok(self.mark_started(conn, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_acquire_and_release() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = ClusterBootstrapLock;
        let mut ctx = ScriptExecutionContext::new();

        assert!(!lock.is_another_node_bootstrapping(&conn, &ctx));
        assert_eq!(lock.mark_started(&conn, &mut ctx), LockResult::Acquired);
        assert!(ctx.has_executed());
        // The owner never sees its own marker as contention
        assert!(!lock.is_another_node_bootstrapping(&conn, &ctx));

        lock.mark_completed(&conn, &mut ctx).unwrap();
        assert!(!ctx.has_executed());
        assert!(!table_is_queryable(&conn, LOCK_TABLE));
    }

    #[test]
    fn test_second_node_is_held_off() {
        let db = NamedTempFile::new().unwrap();
        let node_a = Connection::open(db.path()).unwrap();
        let node_b = Connection::open(db.path()).unwrap();
        let lock = ClusterBootstrapLock;
        let mut ctx_a = ScriptExecutionContext::new();
        let mut ctx_b = ScriptExecutionContext::new();

        assert_eq!(lock.mark_started(&node_a, &mut ctx_a), LockResult::Acquired);
        assert_eq!(lock.mark_started(&node_b, &mut ctx_b), LockResult::HeldByOther);
        assert!(!ctx_b.has_executed());
        assert!(lock.is_another_node_bootstrapping(&node_b, &ctx_b));
        assert_eq!(lock.ensure_bootstrapping(&node_b, &ctx_b), Progress::Contended);

        lock.mark_completed(&node_a, &mut ctx_a).unwrap();
        assert!(!lock.is_another_node_bootstrapping(&node_b, &ctx_b));
        assert_eq!(lock.mark_started(&node_b, &mut ctx_b), LockResult::Acquired);
    }

    #[test]
    fn test_completing_without_marker_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let mut ctx = ScriptExecutionContext::new();
        let err = ClusterBootstrapLock.mark_completed(&conn, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::PreviousFailedBootstrap(_)));
    }

    #[test]
    fn test_release_after_failure_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = ClusterBootstrapLock;
        let mut ctx = ScriptExecutionContext::new();
        lock.mark_started(&conn, &mut ctx);
        conn.execute_batch("BEGIN; CREATE TABLE half_done (x INTEGER);").unwrap();

        lock.release_after_failure(&conn, &mut ctx);
        assert!(conn.is_autocommit());
        assert!(!table_is_queryable(&conn, "half_done"));
        assert!(!table_is_queryable(&conn, LOCK_TABLE));
        assert!(!ctx.has_executed());
    }

    #[test]
    fn test_progress_from_lock_result() {
        assert_eq!(Progress::from(LockResult::Acquired), Progress::Done);
        assert!(Progress::from(LockResult::HeldByOther).is_contended());
    }
}
