// src/patch/registry.rs

//! Ordered registration of creation scripts and upgrade patches

use super::Patch;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Creation scripts and upgrade patches, in registration order
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    /// Schema version produced by the creation scripts
    schema_version: i32,
    pre_create_scripts: Vec<String>,
    post_create_scripts: Vec<String>,
    pre_update_patches: Vec<Patch>,
    post_update_patches: Vec<Patch>,
    secondary_patches: Vec<Patch>,
    ids: HashSet<String>,
}

impl PatchRegistry {
    pub fn new(schema_version: i32) -> Self {
        Self {
            schema_version,
            ..Self::default()
        }
    }

    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    pub fn add_pre_create_script(&mut self, url: &str) {
        self.pre_create_scripts.push(url.to_string());
    }

    pub fn add_post_create_script(&mut self, url: &str) {
        self.post_create_scripts.push(url.to_string());
    }

    pub fn add_pre_update_patch(&mut self, patch: Patch) -> Result<()> {
        self.check_new(&patch)?;
        self.pre_update_patches.push(patch);
        Ok(())
    }

    pub fn add_post_update_patch(&mut self, patch: Patch) -> Result<()> {
        self.check_new(&patch)?;
        self.post_update_patches.push(patch);
        Ok(())
    }

    /// Register a patch for the secondary (process engine) tables
    pub fn add_secondary_patch(&mut self, patch: Patch) -> Result<()> {
        self.check_new(&patch)?;
        self.secondary_patches.push(patch);
        Ok(())
    }

    fn check_new(&mut self, patch: &Patch) -> Result<()> {
        if patch.id.is_empty() {
            return Err(Error::InvalidConfig("Patch id must not be empty".to_string()));
        }
        if patch.alternatives.iter().any(|alt| alt == &patch.id) {
            return Err(Error::InvalidConfig(format!(
                "Patch '{}' lists itself as an alternative",
                patch.id
            )));
        }
        for pattern in &patch.schema_effects {
            Regex::new(pattern)?;
        }
        if !self.ids.insert(patch.id.clone()) {
            return Err(Error::InvalidConfig(format!(
                "Patch '{}' is registered more than once",
                patch.id
            )));
        }
        debug!("Registered patch {}", patch.id);
        Ok(())
    }

    pub fn pre_create_scripts(&self) -> &[String] {
        &self.pre_create_scripts
    }

    pub fn post_create_scripts(&self) -> &[String] {
        &self.post_create_scripts
    }

    pub fn pre_update_patches(&self) -> &[Patch] {
        &self.pre_update_patches
    }

    pub fn post_update_patches(&self) -> &[Patch] {
        &self.post_update_patches
    }

    pub fn secondary_patches(&self) -> &[Patch] {
        &self.secondary_patches
    }

    /// Every registered patch, in list then registration order
    pub fn all_patches(&self) -> impl Iterator<Item = &Patch> {
        self.pre_update_patches
            .iter()
            .chain(&self.post_update_patches)
            .chain(&self.secondary_patches)
    }

    pub fn find(&self, id: &str) -> Option<&Patch> {
        self.all_patches().find(|p| p.id == id)
    }

    /// Patches that declare schema effects, candidates for explaining differences
    pub fn optional_patches(&self) -> impl Iterator<Item = &Patch> {
        self.all_patches()
            .filter(|p| !p.ignored && !p.schema_effects.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order() {
        let mut registry = PatchRegistry::new(100);
        registry.add_pre_create_script("db/create-1.sql");
        registry.add_post_create_script("db/create-2.sql");
        registry
            .add_pre_update_patch(Patch::script("a", "db/a.sql"))
            .unwrap();
        registry
            .add_post_update_patch(Patch::script("b", "db/b.sql"))
            .unwrap();
        registry
            .add_secondary_patch(Patch::script("c", "db/c.sql"))
            .unwrap();

        let ids: Vec<&str> = registry.all_patches().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.schema_version(), 100);
        assert_eq!(registry.pre_create_scripts(), ["db/create-1.sql"]);
        assert!(registry.find("b").is_some());
        assert!(registry.find("z").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = PatchRegistry::new(1);
        registry
            .add_pre_update_patch(Patch::script("a", "db/a.sql"))
            .unwrap();
        let result = registry.add_secondary_patch(Patch::script("a", "db/other.sql"));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_effect_rejected() {
        let mut registry = PatchRegistry::new(1);
        let result = registry.add_pre_update_patch(Patch::script("a", "db/a.sql").effect("(("));
        assert!(matches!(result, Err(Error::Regex(_))));
    }

    #[test]
    fn test_optional_patches() {
        let mut registry = PatchRegistry::new(1);
        registry
            .add_pre_update_patch(Patch::script("a", "db/a.sql"))
            .unwrap();
        registry
            .add_post_update_patch(Patch::script("b", "db/b.sql").effect(r"^alf_node\."))
            .unwrap();
        let ids: Vec<&str> = registry.optional_patches().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
