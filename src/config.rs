// src/config.rs

//! Bootstrap configuration
//!
//! Loaded from a TOML file. Every key is optional:
//!
//! ```toml
//! dialect = "postgresql"
//! schema_version = 5000
//! lock_retry_count = 24
//! pre_create_scripts = ["classpath:db/create/${db.script.dialect}/schema.sql"]
//!
//! [properties]
//! "system.upgrade.default.batchsize" = 5000
//!
//! [[post_update_patches]]
//! id = "patch.db-V5001-NodeIndex"
//! script = "classpath:db/upgrade/${db.script.dialect}/node-index.sql"
//! fixes_to_schema = 5000
//! target_schema = 5001
//! ```

use crate::dialect::{Dialect, DialectProfile};
use crate::engine::ScriptedProcessEngine;
use crate::error::{Error, Result};
use crate::patch::{Patch, PatchRegistry};
use crate::resource::{DirectoryLoader, ResourceLoader, load_dialect_resource};
use crate::schema::dump::DEFAULT_DUMP_PREFIXES;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::IntoEnumIterator;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Apply patches; `false` only checks that the schema is up to date
    #[serde(default = "default_true")]
    pub update_schema: bool,

    /// Dump the schema and fail once the bootstrap has finished
    #[serde(default)]
    pub stop_after_bootstrap: bool,

    /// Attempts of the detect and apply cycle while another node holds the lock
    #[serde(default = "default_lock_retry_count")]
    pub lock_retry_count: u32,

    /// Seconds to wait between attempts
    #[serde(default = "default_lock_retry_wait_secs")]
    pub lock_retry_wait_secs: u64,

    /// Maximum string column length (0 = dialect default)
    #[serde(default)]
    pub max_string_length: usize,

    /// Restrict schema detection and export to one database
    #[serde(default)]
    pub schema_name: Option<String>,

    /// Dialect name, see [`Dialect`]
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Schema version produced by the creation scripts
    #[serde(default)]
    pub schema_version: i32,

    /// Recorded as the applying server
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Where to write the executed statements (temp file if unset)
    #[serde(default)]
    pub schema_output_file: Option<PathBuf>,

    /// Directory for validation reports and schema dumps
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directories searched for scripts and reference schemas
    #[serde(default = "default_script_roots")]
    pub script_roots: Vec<PathBuf>,

    #[serde(default)]
    pub pre_create_scripts: Vec<String>,

    #[serde(default)]
    pub post_create_scripts: Vec<String>,

    /// Reference schema documents to validate against
    #[serde(default)]
    pub schema_reference_urls: Vec<String>,

    /// Table prefixes included in schema dumps
    #[serde(default = "default_dump_prefixes")]
    pub dump_prefixes: Vec<String>,

    /// Script properties (batch sizes)
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: HashMap<String, String>,

    #[serde(default)]
    pub pre_update_patches: Vec<PatchConfig>,

    #[serde(default)]
    pub post_update_patches: Vec<PatchConfig>,

    /// Patches for the process engine tables
    #[serde(default)]
    pub secondary_patches: Vec<PatchConfig>,

    /// Process engine schema
    #[serde(default)]
    pub secondary: Option<SecondaryConfig>,
}

/// A `[[..._patches]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub script: String,

    /// Unbounded when absent
    #[serde(default)]
    pub fixes_from_schema: Option<i32>,

    #[serde(default = "default_fixes_to_schema")]
    pub fixes_to_schema: i32,

    #[serde(default)]
    pub target_schema: i32,

    #[serde(default)]
    pub alternatives: Vec<String>,

    #[serde(default)]
    pub ignored: bool,

    /// Regexes over schema difference paths
    #[serde(default)]
    pub schema_effects: Vec<String>,
}

impl PatchConfig {
    pub fn to_patch(&self) -> Patch {
        let mut patch = Patch::script(&self.id, &self.script)
            .describe(&self.description)
            .fixes(self.fixes_from_schema, self.fixes_to_schema)
            .target(self.target_schema);
        for alternative in &self.alternatives {
            patch = patch.alternative(alternative);
        }
        for effect in &self.schema_effects {
            patch = patch.effect(effect);
        }
        if self.ignored {
            patch = patch.ignore();
        }
        patch
    }
}

/// The `[secondary]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryConfig {
    pub name: String,
    /// Query that fails when the tables are absent
    pub probe_sql: String,
    /// DDL script creating the tables
    pub create_script: String,
}

fn default_true() -> bool {
    true
}

fn default_lock_retry_count() -> u32 {
    24
}

fn default_lock_retry_wait_secs() -> u64 {
    5
}

fn default_dialect() -> String {
    Dialect::Sqlite.to_string()
}

fn default_server_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_script_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_dump_prefixes() -> Vec<String> {
    DEFAULT_DUMP_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_fixes_to_schema() -> i32 {
    i32::MAX
}

/// Accept strings, numbers and booleans as property values
fn deserialize_properties<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, toml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "property '{}' must be a scalar, got {}",
                        key,
                        other.type_str()
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            update_schema: true,
            stop_after_bootstrap: false,
            lock_retry_count: default_lock_retry_count(),
            lock_retry_wait_secs: default_lock_retry_wait_secs(),
            max_string_length: 0,
            schema_name: None,
            dialect: default_dialect(),
            schema_version: 0,
            server_id: default_server_id(),
            schema_output_file: None,
            output_dir: default_output_dir(),
            script_roots: default_script_roots(),
            pre_create_scripts: Vec::new(),
            post_create_scripts: Vec::new(),
            schema_reference_urls: Vec::new(),
            dump_prefixes: default_dump_prefixes(),
            properties: HashMap::new(),
            pre_update_patches: Vec::new(),
            post_update_patches: Vec::new(),
            secondary_patches: Vec::new(),
            secondary: None,
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from a TOML file
    ///
    /// Relative script roots are taken relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for root in &mut config.script_roots {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: BootstrapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.profile()?;
        if self.server_id.is_empty() {
            return Err(Error::InvalidConfig("server_id must not be empty".to_string()));
        }
        if self.dump_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidConfig(
                "dump_prefixes must not contain empty prefixes".to_string(),
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// The configured dialect
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_str(&self.dialect).map_err(|_| {
            let valid: Vec<String> = Dialect::iter().map(|d| d.to_string()).collect();
            Error::InvalidConfig(format!(
                "Unknown dialect '{}', expected one of: {}",
                self.dialect,
                valid.join(", ")
            ))
        })
    }

    /// Resolve the dialect profile
    pub fn profile(&self) -> Result<DialectProfile> {
        DialectProfile::resolve(self.dialect()?, self.max_string_length)
    }

    /// Build the patch registry
    pub fn registry(&self) -> Result<PatchRegistry> {
        let mut registry = PatchRegistry::new(self.schema_version);
        for url in &self.pre_create_scripts {
            registry.add_pre_create_script(url);
        }
        for url in &self.post_create_scripts {
            registry.add_post_create_script(url);
        }
        for patch in &self.pre_update_patches {
            registry.add_pre_update_patch(patch.to_patch())?;
        }
        for patch in &self.post_update_patches {
            registry.add_post_update_patch(patch.to_patch())?;
        }
        for patch in &self.secondary_patches {
            registry.add_secondary_patch(patch.to_patch())?;
        }
        Ok(registry)
    }

    /// Loader over the configured script roots
    pub fn loader(&self) -> DirectoryLoader {
        DirectoryLoader::new(self.script_roots.clone())
    }

    /// Build the process engine, loading its DDL script
    pub fn secondary_engine(
        &self,
        loader: &dyn ResourceLoader,
    ) -> Result<Option<ScriptedProcessEngine>> {
        let Some(secondary) = &self.secondary else {
            return Ok(None);
        };
        let ddl = load_dialect_resource(loader, self.dialect()?, &secondary.create_script)?
            .ok_or_else(|| Error::ScriptNotFound(secondary.create_script.clone()))?;
        Ok(Some(ScriptedProcessEngine::new(
            &secondary.name,
            &secondary.probe_sql,
            &ddl.content,
        )))
    }
}
