// src/bootstrap.rs

//! Schema bootstrap orchestration
//!
//! Runs once per process start, before anything else touches the database:
//!
//! 1. Resolve the dialect profile
//! 2. Create or upgrade the schema, retrying while another node holds the
//!    bootstrap lock
//! 3. Write the executed statements and release the lock
//! 4. Validate and dump the upgraded schema
//!
//! The lock is taken lazily. An up-to-date schema never creates the marker,
//! so a cluster restarting together does not serialize on it. The first node
//! that needs to change something validates and dumps the schema as it was,
//! then takes the lock.

use crate::config::BootstrapConfig;
use crate::dialect::DialectProfile;
use crate::engine::{ApplyOutcome, PatchApplicationEngine, SchemaState, SecondarySchemaEngine};
use crate::error::{Error, Result};
use crate::lock::{ClusterBootstrapLock, LockResult};
use crate::patch::PatchRegistry;
use crate::resource::ResourceLoader;
use crate::schema::dump::dump_schema;
use crate::schema::validator::{SchemaValidator, ValidationReport};
use crate::script::{ExecutionGate, ScriptExecutionContext, ScriptInterpreter};
use rusqlite::Connection;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// What the bootstrap did to the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BootstrapOutcome {
    /// A new schema was created
    Created,
    /// Patches were applied to an existing schema
    Updated,
    /// The schema was already up to date
    Unchanged,
    /// Validate-only mode confirmed the schema is up to date
    Validated,
}

/// Summary of a successful bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub outcome: BootstrapOutcome,
    /// Log of every executed statement, when anything ran
    pub statements_file: Option<PathBuf>,
    /// Attempts needed to get past other nodes' bootstraps
    pub attempts: u32,
    /// Post-upgrade or post-check validation results
    pub validation: Option<ValidationReport>,
}

/// Top-level schema bootstrap
pub struct SchemaBootstrap<'a> {
    config: &'a BootstrapConfig,
    registry: &'a PatchRegistry,
    loader: &'a dyn ResourceLoader,
    secondary: Option<&'a dyn SecondarySchemaEngine>,
}

impl<'a> SchemaBootstrap<'a> {
    pub fn new(
        config: &'a BootstrapConfig,
        registry: &'a PatchRegistry,
        loader: &'a dyn ResourceLoader,
    ) -> Self {
        Self {
            config,
            registry,
            loader,
            secondary: None,
        }
    }

    /// Also create and patch a process engine schema
    pub fn with_secondary(mut self, engine: &'a dyn SecondarySchemaEngine) -> Self {
        self.secondary = Some(engine);
        self
    }

    /// Bring the schema up to date, or check it in validate-only mode
    ///
    /// Failures come back as [`Error::UpdateFailed`] or
    /// [`Error::ValidationFailed`], except [`Error::BootstrapStopped`].
    pub fn run(&self, conn: &Connection) -> Result<BootstrapReport> {
        self.bootstrap(conn).map_err(|e| {
            if !matches!(e, Error::BootstrapStopped) {
                error!("Schema bootstrap failed: {}", e);
            }
            e.wrap_bootstrap(self.config.update_schema)
        })
    }

    /// Validate the live schema against the configured references on demand
    pub fn validate_schema(
        &self,
        conn: &Connection,
        out: Option<&mut dyn Write>,
    ) -> Result<ValidationReport> {
        let profile = self.config.profile()?;
        Ok(self.validator(&profile).validate(
            conn,
            &self.config.schema_reference_urls,
            "on-demand",
            out,
        ))
    }

    /// Dump the live schema on demand
    pub fn dump_schema(&self, conn: &Connection, prefixes: Option<&[String]>) -> Result<Vec<PathBuf>> {
        let profile = self.config.profile()?;
        let prefixes = prefixes.unwrap_or(&self.config.dump_prefixes);
        Ok(self.dump_phase(conn, &profile, "on-demand", prefixes))
    }

    fn bootstrap(&self, conn: &Connection) -> Result<BootstrapReport> {
        let profile = self.config.profile()?;
        info!(
            "Schema managed by database dialect {}",
            profile.dialect().resource_name()
        );

        let interpreter = ScriptInterpreter::new(&profile, self.loader, &self.config.properties);
        let engine = PatchApplicationEngine::new(self.registry, interpreter, &self.config.server_id)
            .schema_name(self.config.schema_name.as_deref())
            .secondary(self.secondary);

        let report = if self.config.update_schema {
            self.update(conn, &profile, &engine)?
        } else {
            self.check(conn, &profile, &engine)?
        };

        if self.config.stop_after_bootstrap {
            self.dump_phase(conn, &profile, "forced-exit", &self.config.dump_prefixes);
            error!("Schema bootstrap stopped on request (stop_after_bootstrap is set)");
            return Err(Error::BootstrapStopped);
        }
        Ok(report)
    }

    fn update(
        &self,
        conn: &Connection,
        profile: &DialectProfile,
        engine: &PatchApplicationEngine<'_>,
    ) -> Result<BootstrapReport> {
        let lock = ClusterBootstrapLock;
        let attempts = self.config.lock_retry_count.max(1);
        let wait = Duration::from_secs(self.config.lock_retry_wait_secs);
        let mut gate = PreUpgradeGate {
            bootstrap: self,
            profile,
            lock,
            checked: false,
        };

        for attempt in 1..=attempts {
            let mut ctx = ScriptExecutionContext::new();
            let outcome = match engine.apply(conn, &mut ctx, &mut gate) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if ctx.has_executed() {
                        lock.release_after_failure(conn, &mut ctx);
                    }
                    return Err(e);
                }
            };

            let outcome = match outcome {
                ApplyOutcome::Contended => {
                    info!(
                        "Waiting for another node to finish bootstrapping the schema (attempt {} of {})",
                        attempt, attempts
                    );
                    if attempt < attempts {
                        thread::sleep(wait);
                    }
                    continue;
                }
                ApplyOutcome::Created => BootstrapOutcome::Created,
                ApplyOutcome::Upgraded => BootstrapOutcome::Updated,
            };
            return self.finish(conn, profile, &mut ctx, outcome, attempt);
        }
        Err(Error::UpgradeInProgressOnAnotherNode { attempts })
    }

    /// Record the statements, release the lock, then validate
    fn finish(
        &self,
        conn: &Connection,
        profile: &DialectProfile,
        ctx: &mut ScriptExecutionContext,
        outcome: BootstrapOutcome,
        attempts: u32,
    ) -> Result<BootstrapReport> {
        if !ctx.has_executed() {
            info!("No changes were made to the schema");
            return Ok(BootstrapReport {
                outcome: BootstrapOutcome::Unchanged,
                statements_file: None,
                attempts,
                validation: None,
            });
        }

        let lock = ClusterBootstrapLock;
        let finished = self
            .write_statements(profile, ctx)
            .and_then(|path| lock.mark_completed(conn, ctx).map(|_| path));
        let statements_file = match finished {
            Ok(path) => path,
            Err(e) => {
                if ctx.has_executed() {
                    lock.release_after_failure(conn, ctx);
                }
                return Err(e);
            }
        };

        let validation = self.validate_phase(conn, profile, "post-upgrade");
        self.dump_phase(conn, profile, "post-upgrade", &self.config.dump_prefixes);
        Ok(BootstrapReport {
            outcome,
            statements_file: Some(statements_file),
            attempts,
            validation: Some(validation),
        })
    }

    /// Validate-only mode: nothing executes
    fn check(
        &self,
        conn: &Connection,
        profile: &DialectProfile,
        engine: &PatchApplicationEngine<'_>,
    ) -> Result<BootstrapReport> {
        info!("Bypassing schema update, checking that the schema is up to date");
        let table = match engine.detect_schema(conn)? {
            SchemaState::Missing => return Err(Error::SchemaMissing),
            SchemaState::Present(table) => table,
        };

        let mut ctx = ScriptExecutionContext::new();
        let mut lock = ClusterBootstrapLock;
        if engine
            .verify_schema(conn, &mut ctx, &mut lock, table)?
            .is_contended()
        {
            return Err(Error::UpgradeInProgressOnAnotherNode { attempts: 0 });
        }

        let validation = self.validate_phase(conn, profile, "post-check");
        Ok(BootstrapReport {
            outcome: BootstrapOutcome::Validated,
            statements_file: None,
            attempts: 1,
            validation: Some(validation),
        })
    }

    fn write_statements(
        &self,
        profile: &DialectProfile,
        ctx: &ScriptExecutionContext,
    ) -> Result<PathBuf> {
        let statements = ctx.executed_statements().unwrap_or_default();
        let path = match &self.config.schema_output_file {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, statements)?;
                path.clone()
            }
            None => {
                let mut file = tempfile::Builder::new()
                    .prefix(&format!(
                        "Schema-{}-All_Statements-",
                        profile.dialect().resource_name()
                    ))
                    .suffix(".sql")
                    .tempfile_in(&self.config.output_dir)?;
                file.write_all(statements.as_bytes())?;
                let (_, path) = file.keep().map_err(io::Error::from)?;
                path
            }
        };
        info!("All executed statements written to {}", path.display());
        Ok(path)
    }

    fn validator<'p>(&'p self, profile: &'p DialectProfile) -> SchemaValidator<'p> {
        SchemaValidator::new(profile, self.loader, self.registry)
            .schema_name(self.config.schema_name.as_deref())
            .output_dir(self.config.output_dir.clone())
    }

    fn validate_phase(
        &self,
        conn: &Connection,
        profile: &DialectProfile,
        phase: &str,
    ) -> ValidationReport {
        self.validator(profile)
            .validate(conn, &self.config.schema_reference_urls, phase, None)
    }

    fn dump_phase(
        &self,
        conn: &Connection,
        profile: &DialectProfile,
        phase: &str,
        prefixes: &[String],
    ) -> Vec<PathBuf> {
        dump_schema(
            conn,
            profile,
            self.config.schema_name.as_deref(),
            Some(self.registry.schema_version()),
            &self.config.output_dir,
            phase,
            prefixes,
        )
    }
}

/// Validates and dumps the untouched schema, then takes the lock
struct PreUpgradeGate<'b, 'a> {
    bootstrap: &'b SchemaBootstrap<'a>,
    profile: &'b DialectProfile,
    lock: ClusterBootstrapLock,
    /// Set once the pre-upgrade snapshot has been taken
    checked: bool,
}

impl ExecutionGate for PreUpgradeGate<'_, '_> {
    fn on_first_statement(
        &mut self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
    ) -> Result<LockResult> {
        if !self.checked {
            self.checked = true;
            self.bootstrap
                .validate_phase(conn, self.profile, "pre-upgrade");
            self.bootstrap.dump_phase(
                conn,
                self.profile,
                "pre-upgrade",
                &self.bootstrap.config.dump_prefixes,
            );
        }
        Ok(self.lock.mark_started(conn, ctx))
    }
}
