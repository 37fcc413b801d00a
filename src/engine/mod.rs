// src/engine/mod.rs

//! Patch application engine
//!
//! Decides between creating a new schema and upgrading an existing one, and
//! walks the registered patch lists in order. Each list is processed twice on
//! upgrade: an apply pass that executes whatever is missing, then a verify
//! pass that rejects the bootstrap if anything applicable is still unapplied.
//!
//! Every step that might change the schema first checks that no other node
//! owns the bootstrap. Contention is reported as [`Progress::Contended`] or
//! [`ApplyOutcome::Contended`] so the caller can back off and retry.

pub mod secondary;

pub use secondary::{ScriptedProcessEngine, SecondarySchemaEngine};

use crate::db::applied_patch::{CREATE_APPLIED_PATCH_TABLE, SCHEMA_CREATED_ID};
use crate::db::{AppliedPatchRecord, AppliedPatchTable};
use crate::error::{Error, Result};
use crate::lock::{ClusterBootstrapLock, LockResult, Progress};
use crate::patch::{Patch, PatchBody, PatchLogic, PatchRegistry};
use crate::script::{ExecutionGate, ScriptExecutionContext, ScriptInterpreter};
use rusqlite::Connection;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Server recorded on secondary schema placeholders
const UNKNOWN_SERVER: &str = "UNKNOWN";

/// Whether the application schema exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Missing,
    Present(AppliedPatchTable),
}

/// Result of one create-or-upgrade attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Upgraded,
    Contended,
}

/// Creates or upgrades the schema from a patch registry
pub struct PatchApplicationEngine<'a> {
    registry: &'a PatchRegistry,
    interpreter: ScriptInterpreter<'a>,
    lock: ClusterBootstrapLock,
    server_id: &'a str,
    schema_name: Option<&'a str>,
    secondary: Option<&'a dyn SecondarySchemaEngine>,
}

impl<'a> PatchApplicationEngine<'a> {
    pub fn new(
        registry: &'a PatchRegistry,
        interpreter: ScriptInterpreter<'a>,
        server_id: &'a str,
    ) -> Self {
        Self {
            registry,
            interpreter,
            lock: ClusterBootstrapLock,
            server_id,
            schema_name: None,
            secondary: None,
        }
    }

    /// Restrict schema detection to one database
    pub fn schema_name(mut self, schema_name: Option<&'a str>) -> Self {
        self.schema_name = schema_name;
        self
    }

    pub fn secondary(mut self, secondary: Option<&'a dyn SecondarySchemaEngine>) -> Self {
        self.secondary = secondary;
        self
    }

    /// Look for the applied patch table
    pub fn detect_schema(&self, conn: &Connection) -> Result<SchemaState> {
        let found = AppliedPatchTable::locate(conn, self.schema_name)?;
        match found.as_slice() {
            [] => {
                info!("No existing schema found");
                Ok(SchemaState::Missing)
            }
            [(table_ref, table)] => {
                let count = AppliedPatchRecord::count(conn, *table).map_err(|e| {
                    Error::MultipleSchemasDetected(format!(
                        "{}.{} could not be read: {}",
                        table_ref.database, table_ref.name, e
                    ))
                })?;
                info!(
                    "Found {} in {} with {} applied patches",
                    table, table_ref.database, count
                );
                Ok(SchemaState::Present(*table))
            }
            many => {
                let names: Vec<String> = many
                    .iter()
                    .map(|(t, _)| format!("{}.{}", t.database, t.name))
                    .collect();
                Err(Error::MultipleSchemasDetected(names.join(", ")))
            }
        }
    }

    /// Create the schema if it is missing, otherwise upgrade it
    pub fn apply(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
    ) -> Result<ApplyOutcome> {
        let start = Instant::now();
        match self.detect_schema(conn)? {
            SchemaState::Missing => {
                if self.create_schema(conn, ctx, gate)?.is_contended()
                    || self
                        .initialise_secondary(conn, ctx, gate, AppliedPatchTable::Current, true)?
                        .is_contended()
                {
                    return Ok(ApplyOutcome::Contended);
                }
                info!("Created schema in {:.2?}", start.elapsed());
                Ok(ApplyOutcome::Created)
            }
            SchemaState::Present(table) => {
                if self.update_schema(conn, ctx, gate, table)?.is_contended() {
                    return Ok(ApplyOutcome::Contended);
                }
                if ctx.has_executed() {
                    info!("Upgraded schema in {:.2?}", start.elapsed());
                }
                Ok(ApplyOutcome::Upgraded)
            }
        }
    }

    /// Run the creation scripts and seed the applied patch table
    pub fn create_schema(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
    ) -> Result<Progress> {
        let version = self.registry.schema_version();
        info!("Creating new schema at version {}", version);

        let scripts = self
            .registry
            .pre_create_scripts()
            .iter()
            .chain(self.registry.post_create_scripts());
        for url in scripts {
            if self
                .interpreter
                .execute_script_url(conn, ctx, gate, url)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }

        if self
            .interpreter
            .execute_sql(conn, ctx, gate, CREATE_APPLIED_PATCH_TABLE, "applied patch table")?
            .is_contended()
        {
            return Ok(Progress::Contended);
        }

        let table = AppliedPatchTable::Current;
        if AppliedPatchRecord::find_by_id(conn, table, SCHEMA_CREATED_ID)?.is_none() {
            AppliedPatchRecord::schema_created(version, self.server_id).insert(conn, table)?;
        }
        let report = format!("Placeholder for new schema at version {}", version);
        let patches = self
            .registry
            .pre_update_patches()
            .iter()
            .chain(self.registry.post_update_patches());
        for patch in patches {
            self.record_placeholder(conn, table, patch, version, self.server_id, &report)?;
        }
        Ok(Progress::Done)
    }

    /// Apply, then verify, every patch list of an existing schema
    pub fn update_schema(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        table: AppliedPatchTable,
    ) -> Result<Progress> {
        for patches in [
            self.registry.pre_update_patches(),
            self.registry.post_update_patches(),
        ] {
            if self
                .check_patches(conn, ctx, gate, table, patches, true)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }

        if self.lock.ensure_bootstrapping(conn, ctx).is_contended()
            || self
                .initialise_secondary(conn, ctx, gate, table, false)?
                .is_contended()
        {
            return Ok(Progress::Contended);
        }

        for patches in [
            self.registry.pre_update_patches(),
            self.registry.post_update_patches(),
        ] {
            if self
                .check_patches(conn, ctx, gate, table, patches, false)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }
        Ok(Progress::Done)
    }

    /// Check that every patch list is fully applied, executing nothing
    pub fn verify_schema(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        table: AppliedPatchTable,
    ) -> Result<Progress> {
        for patches in [
            self.registry.pre_update_patches(),
            self.registry.post_update_patches(),
        ] {
            if self
                .check_patches(conn, ctx, gate, table, patches, false)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }

        if let Some(engine) = self.secondary {
            if !engine.tables_exist(conn) {
                return Err(Error::SecondarySchemaMissing(engine.name().to_string()));
            }
            return self.check_patches(
                conn,
                ctx,
                gate,
                table,
                self.registry.secondary_patches(),
                false,
            );
        }
        Ok(Progress::Done)
    }

    /// Walk one patch list in order
    ///
    /// With `apply` set, missing applicable patches are executed; otherwise
    /// the first one found fails with [`Error::UnrunScript`].
    pub fn check_patches(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        table: AppliedPatchTable,
        patches: &[Patch],
        apply: bool,
    ) -> Result<Progress> {
        if patches.is_empty() {
            return Ok(Progress::Done);
        }
        // A schema without applied patches has nothing to check against
        if AppliedPatchRecord::count(conn, table)? == 0 {
            debug!("No applied patches recorded, skipping {} patches", patches.len());
            return Ok(Progress::Done);
        }
        if self.lock.ensure_bootstrapping(conn, ctx).is_contended() {
            return Ok(Progress::Contended);
        }

        let installed = AppliedPatchRecord::installed_schema_version(conn, table)?;
        for patch in patches {
            if patch.ignored {
                debug!("Patch {} is ignored", patch.id);
                continue;
            }
            if self.alternative_applied(conn, table, patch)? {
                continue;
            }
            if AppliedPatchRecord::did_patch_succeed(conn, table, &patch.id, false)? {
                debug!("Patch {} already applied", patch.id);
                continue;
            }
            if !patch.applies(installed) {
                debug!(
                    "Patch {} does not apply to installed schema {}",
                    patch.id, installed
                );
                continue;
            }
            if !apply {
                return Err(Error::UnrunScript {
                    patch_id: patch.id.clone(),
                    script_url: patch.script_url().to_string(),
                });
            }
            if self
                .run_patch(conn, ctx, gate, table, patch, installed)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }
        Ok(Progress::Done)
    }

    fn alternative_applied(
        &self,
        conn: &Connection,
        table: AppliedPatchTable,
        patch: &Patch,
    ) -> Result<bool> {
        for alternative in &patch.alternatives {
            if AppliedPatchRecord::did_patch_succeed(conn, table, alternative, true)? {
                debug!(
                    "Patch {} is satisfied by alternative {}",
                    patch.id, alternative
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn run_patch(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        table: AppliedPatchTable,
        patch: &Patch,
        installed: i32,
    ) -> Result<Progress> {
        info!("Applying patch {} ({})", patch.id, patch.script_url());
        let start = Instant::now();
        let result = match &patch.body {
            PatchBody::Script(url) => self
                .interpreter
                .execute_script_url(conn, ctx, gate, url)
                .map(|progress| match progress {
                    Progress::Done => Some(format!("Executed script {}", url)),
                    Progress::Contended => None,
                }),
            PatchBody::Inline(logic) => self.run_inline(conn, ctx, gate, logic.as_ref()),
        };

        match result {
            Ok(Some(report)) => {
                self.record_success(conn, table, patch, installed, &report)?;
                info!("Applied patch {} in {:.2?}", patch.id, start.elapsed());
                Ok(Progress::Done)
            }
            Ok(None) => Ok(Progress::Contended),
            Err(e) => {
                self.record_failure(conn, table, patch, installed, &e);
                Err(e)
            }
        }
    }

    /// Run Rust patch logic; `None` if the lock is held elsewhere
    fn run_inline(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        logic: &dyn PatchLogic,
    ) -> Result<Option<String>> {
        if gate.enter(conn, ctx)? == LockResult::HeldByOther {
            return Ok(None);
        }
        logic.apply(conn).map(Some)
    }

    fn record_success(
        &self,
        conn: &Connection,
        table: AppliedPatchTable,
        patch: &Patch,
        installed: i32,
        report: &str,
    ) -> Result<()> {
        let report = self
            .interpreter
            .profile()
            .trim_string_for_text_fields(report)
            .to_string();
        let record =
            AppliedPatchRecord::for_patch(patch, installed, self.server_id, true, true, report);
        if !record.supersede_failure(conn, table)? {
            record.insert(conn, table)?;
        }
        Ok(())
    }

    /// Record a failed attempt unless a row already exists; never fails
    fn record_failure(
        &self,
        conn: &Connection,
        table: AppliedPatchTable,
        patch: &Patch,
        installed: i32,
        error: &Error,
    ) {
        if !conn.is_autocommit()
            && let Err(e) = conn.execute_batch("ROLLBACK")
        {
            warn!("Unable to roll back after patch {} failed: {}", patch.id, e);
        }

        match AppliedPatchRecord::find_by_id(conn, table, &patch.id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let report = self
                    .interpreter
                    .profile()
                    .trim_string_for_text_fields(&error.to_string())
                    .to_string();
                let record = AppliedPatchRecord::for_patch(
                    patch,
                    installed,
                    self.server_id,
                    false,
                    true,
                    report,
                );
                if let Err(e) = record.insert(conn, table) {
                    warn!("Unable to record failure of patch {}: {}", patch.id, e);
                }
            }
            Err(e) => warn!("Unable to look up patch {}: {}", patch.id, e),
        }
    }

    fn record_placeholder(
        &self,
        conn: &Connection,
        table: AppliedPatchTable,
        patch: &Patch,
        version: i32,
        server: &str,
        report: &str,
    ) -> Result<()> {
        if AppliedPatchRecord::find_by_id(conn, table, &patch.id)?.is_some() {
            return Ok(());
        }
        AppliedPatchRecord::for_patch(patch, version, server, true, false, report.to_string())
            .insert(conn, table)
    }

    /// Create the secondary schema, or bring it up to date if it exists
    fn initialise_secondary(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        table: AppliedPatchTable,
        created: bool,
    ) -> Result<Progress> {
        let Some(engine) = self.secondary else {
            return Ok(Progress::Done);
        };
        let patches = self.registry.secondary_patches();

        if engine.tables_exist(conn) {
            if self
                .check_patches(conn, ctx, gate, table, patches, true)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
            return self.check_patches(conn, ctx, gate, table, patches, false);
        }

        if gate.enter(conn, ctx)? == LockResult::HeldByOther {
            return Ok(Progress::Contended);
        }
        info!("Creating {} schema", engine.name());
        engine.create_schema(conn)?;

        let version = if created {
            self.registry.schema_version()
        } else {
            AppliedPatchRecord::installed_schema_version(conn, table)?
        };
        let report = format!(
            "Placeholder for {} bootstrap at schema {}",
            engine.name(),
            version
        );
        for patch in patches {
            self.record_placeholder(conn, table, patch, version, UNKNOWN_SERVER, &report)?;
        }
        Ok(Progress::Done)
    }
}
