// src/schema/validator.rs

//! Schema validation against reference definitions
//!
//! Validation is diagnostic: nothing here fails the caller. Errors while
//! loading a reference, exporting the live schema or writing the report are
//! logged and collected as warnings in the returned [`ValidationReport`].

use super::compare::{Difference, compare};
use super::export::export_schema;
use super::model::Schema;
use super::xml::parse_schema;
use crate::db::{AppliedPatchRecord, AppliedPatchTable};
use crate::dialect::DialectProfile;
use crate::error::Result;
use crate::patch::{Patch, PatchRegistry};
use crate::resource::{ResourceLoader, load_dialect_resource};
use regex::Regex;
use rusqlite::Connection;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Outcome of a validation run
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Differences found across all references
    pub total_problems: usize,
    /// Report files written
    pub files: Vec<PathBuf>,
    /// Errors that stopped a reference from being checked
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// No differences and no errors
    pub fn is_clean(&self) -> bool {
        self.total_problems == 0 && self.warnings.is_empty()
    }
}

/// Compares the live schema with dialect-specific reference schemas
pub struct SchemaValidator<'a> {
    profile: &'a DialectProfile,
    loader: &'a dyn ResourceLoader,
    registry: &'a PatchRegistry,
    schema_name: Option<&'a str>,
    output_dir: PathBuf,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(
        profile: &'a DialectProfile,
        loader: &'a dyn ResourceLoader,
        registry: &'a PatchRegistry,
    ) -> Self {
        Self {
            profile,
            loader,
            registry,
            schema_name: None,
            output_dir: std::env::temp_dir(),
        }
    }

    /// Restrict the live export to one database
    pub fn schema_name(mut self, schema_name: Option<&'a str>) -> Self {
        self.schema_name = schema_name;
        self
    }

    /// Directory for report files
    pub fn output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Validate the live schema against each reference
    ///
    /// With `out` set, reports go to that writer; otherwise each reference
    /// gets its own temp file under the output directory.
    pub fn validate(
        &self,
        conn: &Connection,
        reference_urls: &[String],
        phase: &str,
        mut out: Option<&mut dyn Write>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        for url in reference_urls {
            match self.validate_reference(conn, url, phase, out.as_mut().map(|w| &mut **w as &mut dyn Write)) {
                Ok(Some((problems, file))) => {
                    report.total_problems += problems;
                    report.files.extend(file);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Schema validation against {} failed: {}", url, e);
                    report.warnings.push(format!("{}: {}", url, e));
                }
            }
        }
        report
    }

    fn validate_reference(
        &self,
        conn: &Connection,
        url: &str,
        phase: &str,
        out: Option<&mut dyn Write>,
    ) -> Result<Option<(usize, Option<PathBuf>)>> {
        let Some(resource) = load_dialect_resource(self.loader, self.profile.dialect(), url)? else {
            debug!("No reference schema found for {} at {}", self.profile.dialect(), url);
            return Ok(None);
        };
        let reference = parse_schema(&resource.content)?;
        let target = export_schema(conn, self.schema_name, &reference.db_prefix)?;
        let differences = compare(&reference, &target);
        let explained = self.attribute(conn, &differences)?;
        let text = render_report(&resource.location, phase, &reference, &differences, &explained);

        let file = match out {
            Some(writer) => {
                writer.write_all(text.as_bytes())?;
                None
            }
            None => Some(self.write_report_file(phase, &reference.db_prefix, &text)?),
        };

        if differences.is_empty() {
            info!(
                "Compared database schema with reference schema {} (all OK)",
                resource.location
            );
        } else {
            let destination = file
                .as_ref()
                .map_or_else(|| "the supplied writer".to_string(), |p| p.display().to_string());
            warn!(
                "Schema validation found {} potential problems, results written to: {}",
                differences.len(),
                destination
            );
        }
        Ok(Some((differences.len(), file)))
    }

    /// Find, for each difference, the optional patch that would fix it
    ///
    /// Skipped when no applied patch table exists yet.
    fn attribute(&self, conn: &Connection, differences: &[Difference]) -> Result<Vec<Option<String>>> {
        let located = AppliedPatchTable::locate(conn, self.schema_name)?;
        let Some((_, table)) = located.first() else {
            return Ok(vec![None; differences.len()]);
        };

        let mut candidates: Vec<(&Patch, Vec<Regex>)> = Vec::new();
        for patch in self.registry.optional_patches() {
            if AppliedPatchRecord::did_patch_succeed(conn, *table, &patch.id, false)? {
                continue;
            }
            let effects = patch
                .schema_effects
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            candidates.push((patch, effects));
        }

        Ok(differences
            .iter()
            .map(|difference| {
                candidates
                    .iter()
                    .find(|(_, effects)| effects.iter().any(|re| re.is_match(&difference.path)))
                    .map(|(patch, _)| patch.id.clone())
            })
            .collect())
    }

    fn write_report_file(&self, phase: &str, db_prefix: &str, text: &str) -> Result<PathBuf> {
        let prefix = format!(
            "Schema-{}-Validation-{}-{}-",
            self.profile.dialect().resource_name(),
            phase,
            db_prefix
        );
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".txt")
            .tempfile_in(&self.output_dir)?;
        file.write_all(text.as_bytes())?;
        let (_, path) = file.keep().map_err(io::Error::from)?;
        Ok(path)
    }
}

fn render_report(
    location: &str,
    phase: &str,
    reference: &Schema,
    differences: &[Difference],
    explained: &[Option<String>],
) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Schema validation ({}) against reference {}", phase, location);
    let _ = writeln!(
        text,
        "Reference schema: {} (prefix '{}', version {})",
        reference.name,
        reference.db_prefix,
        reference
            .version
            .map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );
    let _ = writeln!(text, "Potential problems: {}", differences.len());

    let unexplained: Vec<&Difference> = differences
        .iter()
        .zip(explained)
        .filter(|(_, patch)| patch.is_none())
        .map(|(d, _)| d)
        .collect();
    if !unexplained.is_empty() {
        let _ = writeln!(text, "\nDifferences:");
        for difference in unexplained {
            let _ = writeln!(text, "  {}", difference);
        }
    }

    let mut patches: Vec<&str> = Vec::new();
    for patch in explained.iter().flatten() {
        if !patches.contains(&patch.as_str()) {
            patches.push(patch);
        }
    }
    for patch in patches {
        let _ = writeln!(
            text,
            "\nThe following problems will be fixed by running patch {}:",
            patch
        );
        for (difference, _) in differences
            .iter()
            .zip(explained)
            .filter(|(_, p)| p.as_deref() == Some(patch))
        {
            let _ = writeln!(text, "  {}", difference);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::applied_patch::CREATE_APPLIED_PATCH_TABLE;
    use crate::dialect::Dialect;
    use crate::resource::MemoryLoader;

    const REFERENCE: &str = r#"<schema name="reference" dbprefix="alf_" version="1">
  <objects>
    <table name="alf_node">
      <columns>
        <column name="id" order="1"><type>INTEGER</type><nullable>false</nullable></column>
        <column name="uuid" order="2"><type>VARCHAR(36)</type><nullable>false</nullable></column>
      </columns>
      <primarykey><columnnames><columnname order="1">id</columnname></columnnames></primarykey>
      <indexes/>
    </table>
  </objects>
</schema>"#;

    fn live_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE alf_node (id INTEGER NOT NULL PRIMARY KEY, uuid VARCHAR(36) NOT NULL)",
            [],
        )
        .unwrap();
        conn
    }

    fn loader() -> MemoryLoader {
        MemoryLoader::new().with("schema/Dialect/reference.xml", REFERENCE)
    }

    fn urls() -> Vec<String> {
        vec!["classpath:schema/${db.script.dialect}/reference.xml".to_string()]
    }

    #[test]
    fn test_identical_schema_is_clean() {
        let conn = live_db();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let loader = loader();
        let registry = PatchRegistry::new(1);
        let validator = SchemaValidator::new(&profile, &loader, &registry);

        let mut out = Vec::new();
        let report = validator.validate(&conn, &urls(), "test", Some(&mut out));
        assert!(report.is_clean());
        assert!(report.files.is_empty());
        assert!(String::from_utf8(out).unwrap().contains("Potential problems: 0"));
    }

    #[test]
    fn test_extra_column_reported_to_file() {
        let conn = live_db();
        conn.execute("ALTER TABLE alf_node ADD COLUMN extra TEXT", []).unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let loader = loader();
        let registry = PatchRegistry::new(1);
        let validator = SchemaValidator::new(&profile, &loader, &registry)
            .output_dir(temp_dir.path().to_path_buf());

        let report = validator.validate(&conn, &urls(), "post-upgrade", None);
        assert_eq!(report.total_problems, 1);
        assert_eq!(report.files.len(), 1);
        let name = report.files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Schema-SQLiteDialect-Validation-post-upgrade-alf_-"));
        let text = std::fs::read_to_string(&report.files[0]).unwrap();
        assert!(text.contains("alf_node.columns.extra"));
    }

    #[test]
    fn test_difference_attributed_to_optional_patch() {
        let conn = live_db();
        conn.execute("ALTER TABLE alf_node ADD COLUMN extra TEXT", []).unwrap();
        conn.execute(CREATE_APPLIED_PATCH_TABLE, []).unwrap();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let loader = loader();
        let mut registry = PatchRegistry::new(1);
        registry
            .add_post_update_patch(
                Patch::script("patch.dropExtra", "db/drop-extra.sql").effect(r"^alf_node\.columns\.extra$"),
            )
            .unwrap();
        let validator = SchemaValidator::new(&profile, &loader, &registry);

        let mut out = Vec::new();
        let report = validator.validate(&conn, &urls(), "test", Some(&mut out));
        // The patch table itself is not part of the reference
        assert_eq!(report.total_problems, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("The following problems will be fixed by running patch patch.dropExtra"));
        assert!(text.contains("Unexpected in database: alf_applied_patch"));
    }

    #[test]
    fn test_no_attribution_without_patch_table() {
        let conn = live_db();
        conn.execute("ALTER TABLE alf_node ADD COLUMN extra TEXT", []).unwrap();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let loader = loader();
        let mut registry = PatchRegistry::new(1);
        registry
            .add_post_update_patch(Patch::script("patch.dropExtra", "db/x.sql").effect("extra"))
            .unwrap();
        let validator = SchemaValidator::new(&profile, &loader, &registry);

        let mut out = Vec::new();
        validator.validate(&conn, &urls(), "test", Some(&mut out));
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("running patch"));
        assert!(text.contains("Unexpected in database: alf_node.columns.extra"));
    }

    #[test]
    fn test_errors_become_warnings() {
        let conn = live_db();
        let profile = DialectProfile::resolve(Dialect::Sqlite, 0).unwrap();
        let loader = MemoryLoader::new().with("schema/broken.xml", "<schema><table></schema>");
        let registry = PatchRegistry::new(1);
        let validator = SchemaValidator::new(&profile, &loader, &registry);

        let urls = vec!["schema/broken.xml".to_string(), "schema/missing.xml".to_string()];
        let report = validator.validate(&conn, &urls, "test", Some(&mut Vec::new()));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.total_problems, 0);
        assert!(!report.is_clean());
    }
}
