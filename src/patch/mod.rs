// src/patch/mod.rs

//! Schema patches and their registry
//!
//! A patch is a named unit of schema migration with an applicability range
//! over the installed schema version. Patches are registered once at startup
//! and never change afterwards.

mod registry;

pub use registry::PatchRegistry;

use crate::error::Result;
use rusqlite::Connection;
use std::fmt;
use std::sync::Arc;

/// Rust logic run in place of a script
pub trait PatchLogic: Send + Sync {
    /// Apply the patch, returning the text stored as the patch report
    fn apply(&self, conn: &Connection) -> Result<String>;
}

/// What a patch does when it runs
#[derive(Clone)]
pub enum PatchBody {
    /// Execute a script resource through the script interpreter
    Script(String),
    /// Execute Rust logic
    Inline(Arc<dyn PatchLogic>),
}

impl fmt::Debug for PatchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchBody::Script(url) => f.debug_tuple("Script").field(url).finish(),
            PatchBody::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

/// A registered schema patch
#[derive(Debug, Clone)]
pub struct Patch {
    pub id: String,
    pub description: String,
    /// Inclusive lower bound of the installed schema versions it fixes; `None` is unbounded
    pub fixes_from_schema: Option<i32>,
    /// Inclusive upper bound of the installed schema versions it fixes
    pub fixes_to_schema: i32,
    /// Schema version reached once the patch has run
    pub target_schema: i32,
    /// Patches whose executed success makes this one unnecessary
    pub alternatives: Vec<String>,
    pub ignored: bool,
    pub body: PatchBody,
    /// Regexes over schema difference paths this patch would fix when run
    pub schema_effects: Vec<String>,
}

impl Patch {
    /// Create a script patch that applies to every installed schema version
    pub fn script(id: &str, script_url: &str) -> Self {
        Self::with_body(id, PatchBody::Script(script_url.to_string()))
    }

    /// Create a patch backed by Rust logic
    pub fn inline(id: &str, logic: Arc<dyn PatchLogic>) -> Self {
        Self::with_body(id, PatchBody::Inline(logic))
    }

    fn with_body(id: &str, body: PatchBody) -> Self {
        Self {
            id: id.to_string(),
            description: String::new(),
            fixes_from_schema: None,
            fixes_to_schema: i32::MAX,
            target_schema: 0,
            alternatives: Vec::new(),
            ignored: false,
            body,
            schema_effects: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the inclusive range of installed schema versions this patch fixes
    pub fn fixes(mut self, from: Option<i32>, to: i32) -> Self {
        self.fixes_from_schema = from;
        self.fixes_to_schema = to;
        self
    }

    pub fn target(mut self, target_schema: i32) -> Self {
        self.target_schema = target_schema;
        self
    }

    pub fn alternative(mut self, patch_id: &str) -> Self {
        self.alternatives.push(patch_id.to_string());
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn effect(mut self, pattern: &str) -> Self {
        self.schema_effects.push(pattern.to_string());
        self
    }

    /// Check whether the patch fixes the given installed schema version
    pub fn applies(&self, installed_schema: i32) -> bool {
        self.fixes_from_schema
            .is_none_or(|from| from <= installed_schema)
            && installed_schema <= self.fixes_to_schema
    }

    /// The script location, or a marker for inline patches
    pub fn script_url(&self) -> &str {
        match &self.body {
            PatchBody::Script(url) => url,
            PatchBody::Inline(_) => "<inline>",
        }
    }
}
