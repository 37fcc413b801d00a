// src/resource.rs

//! Script and reference-file resources
//!
//! Resources are addressed by URL-ish strings such as
//! `classpath:db/create/${db.script.dialect}/schema.sql`. The dialect
//! placeholder is replaced with the active dialect's resource name and, when
//! nothing exists there, with each ancestor dialect in turn.

use crate::dialect::Dialect;
use crate::error::Result;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Placeholder replaced by the dialect resource name
pub const DIALECT_PLACEHOLDER: &str = "${db.script.dialect}";

/// Source of script and reference resources
pub trait ResourceLoader {
    /// Load a resource, returning `None` if it does not exist
    fn load(&self, location: &str) -> Result<Option<String>>;
}

/// Strip the scheme prefixes accepted in resource URLs
pub fn strip_scheme(location: &str) -> &str {
    location
        .strip_prefix("classpath:")
        .or_else(|| location.strip_prefix("file:"))
        .unwrap_or(location)
        .trim_start_matches('/')
}

/// Loads resources from a list of root directories, first match wins
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    roots: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn candidates(&self, location: &str) -> Vec<PathBuf> {
        let absolute = location
            .strip_prefix("file:")
            .map(Path::new)
            .filter(|p| p.is_absolute());
        if let Some(path) = absolute {
            return vec![path.to_path_buf()];
        }
        let relative = strip_scheme(location);
        self.roots.iter().map(|root| root.join(relative)).collect()
    }
}

impl ResourceLoader for DirectoryLoader {
    fn load(&self, location: &str) -> Result<Option<String>> {
        for path in self.candidates(location) {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    debug!("Loaded resource {} from {}", location, path.display());
                    return Ok(Some(content));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

/// In-memory resources keyed by location (scheme prefixes ignored)
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    resources: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, replacing any previous content at that location
    pub fn insert(&mut self, location: &str, content: impl Into<String>) {
        self.resources
            .insert(strip_scheme(location).to_string(), content.into());
    }

    /// Builder-style variant of [`MemoryLoader::insert`]
    pub fn with(mut self, location: &str, content: impl Into<String>) -> Self {
        self.insert(location, content);
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn load(&self, location: &str) -> Result<Option<String>> {
        Ok(self.resources.get(strip_scheme(location)).cloned())
    }
}

/// Substitute a dialect into a resource URL
pub fn dialect_url(location: &str, dialect: Dialect) -> String {
    location.replace(DIALECT_PLACEHOLDER, dialect.resource_name())
}

/// A resource found for a dialect
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    /// The concrete location that was loaded
    pub location: String,
    pub content: String,
}

/// Load the closest resource for the dialect, walking up the dialect lineage
pub fn load_dialect_resource(
    loader: &dyn ResourceLoader,
    dialect: Dialect,
    location: &str,
) -> Result<Option<ResolvedResource>> {
    if !location.contains(DIALECT_PLACEHOLDER) {
        return Ok(loader.load(location)?.map(|content| ResolvedResource {
            location: location.to_string(),
            content,
        }));
    }

    for candidate in dialect.lineage() {
        let concrete = dialect_url(location, candidate);
        if let Some(content) = loader.load(&concrete)? {
            return Ok(Some(ResolvedResource {
                location: concrete,
                content,
            }));
        }
        debug!("No resource at {}, trying parent dialect", concrete);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("classpath:db/a.sql"), "db/a.sql");
        assert_eq!(strip_scheme("file:db/a.sql"), "db/a.sql");
        assert_eq!(strip_scheme("/db/a.sql"), "db/a.sql");
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::new().with("classpath:db/a.sql", "SELECT 1;");
        assert_eq!(
            loader.load("db/a.sql").unwrap().as_deref(),
            Some("SELECT 1;")
        );
        assert!(loader.load("db/b.sql").unwrap().is_none());
    }

    #[test]
    fn test_directory_loader_searches_roots() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::create_dir_all(second.path().join("db")).unwrap();
        fs::write(second.path().join("db/a.sql"), "SELECT 2;").unwrap();

        let loader = DirectoryLoader::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(
            loader.load("classpath:db/a.sql").unwrap().as_deref(),
            Some("SELECT 2;")
        );
        assert!(loader.load("db/missing.sql").unwrap().is_none());
    }

    #[test]
    fn test_dialect_fallback_to_parent() {
        let loader = MemoryLoader::new()
            .with("db/MySQLDialect/create.sql", "mysql")
            .with("db/Dialect/create.sql", "generic");

        let found = load_dialect_resource(
            &loader,
            Dialect::MysqlClusterNdb,
            "db/${db.script.dialect}/create.sql",
        )
        .unwrap()
        .unwrap();
        assert_eq!(found.location, "db/MySQLDialect/create.sql");
        assert_eq!(found.content, "mysql");

        let found =
            load_dialect_resource(&loader, Dialect::Postgresql, "db/${db.script.dialect}/create.sql")
                .unwrap()
                .unwrap();
        assert_eq!(found.content, "generic");
    }

    #[test]
    fn test_dialect_resource_missing() {
        let loader = MemoryLoader::new();
        assert!(
            load_dialect_resource(&loader, Dialect::Sqlite, "db/${db.script.dialect}/x.sql")
                .unwrap()
                .is_none()
        );
    }
}
