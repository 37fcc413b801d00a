// src/dialect.rs

//! SQL dialects and their resolved profiles
//!
//! A `Dialect` is a closed set of supported database products. Everything that
//! varies by product (boolean literal spellings, maximum string column length,
//! DDL rewrites, resource names) is resolved once into a `DialectProfile` at
//! startup and passed by reference afterwards.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Default maximum length of string columns
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1024;

/// Maximum length of string columns on MySQL Cluster NDB
pub const DEFAULT_MAX_STRING_LENGTH_NDB: usize = 400;

/// Supported SQL dialects
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Root of the dialect hierarchy; matches generic scripts only
    Generic,
    #[default]
    Sqlite,
    #[strum(to_string = "postgresql", serialize = "postgres")]
    Postgresql,
    Mysql,
    #[strum(to_string = "mysqlinnodb", serialize = "innodb")]
    MysqlInnodb,
    #[strum(to_string = "mysqlclusterndb", serialize = "ndb")]
    MysqlClusterNdb,
    Oracle,
    #[strum(to_string = "sqlserver", serialize = "mssql")]
    Sqlserver,
}

impl Dialect {
    /// Name substituted for the dialect placeholder in resource URLs
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Generic => "Dialect",
            Self::Sqlite => "SQLiteDialect",
            Self::Postgresql => "PostgreSQLDialect",
            Self::Mysql => "MySQLDialect",
            Self::MysqlInnodb => "MySQLInnoDBDialect",
            Self::MysqlClusterNdb => "MySQLClusterNDBDialect",
            Self::Oracle => "Oracle9Dialect",
            Self::Sqlserver => "SQLServerDialect",
        }
    }

    /// The dialect this one specialises, if any
    pub fn parent(&self) -> Option<Dialect> {
        match self {
            Self::Generic => None,
            Self::MysqlClusterNdb => Some(Self::MysqlInnodb),
            Self::MysqlInnodb => Some(Self::Mysql),
            _ => Some(Self::Generic),
        }
    }

    /// This dialect followed by its ancestors, most specific first
    pub fn lineage(&self) -> Vec<Dialect> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(parent) = current.parent() {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Check if `other` is this dialect or one of its ancestors
    pub fn is_a(&self, other: Dialect) -> bool {
        self.lineage().contains(&other)
    }

    fn default_max_string_length(&self) -> usize {
        if self.is_a(Self::MysqlClusterNdb) {
            DEFAULT_MAX_STRING_LENGTH_NDB
        } else if self.is_a(Self::MysqlInnodb) {
            usize::MAX
        } else {
            DEFAULT_MAX_STRING_LENGTH
        }
    }

    fn minimum_max_string_length(&self) -> usize {
        if self.is_a(Self::MysqlClusterNdb) {
            DEFAULT_MAX_STRING_LENGTH_NDB
        } else {
            DEFAULT_MAX_STRING_LENGTH
        }
    }
}

/// A textual DDL rewrite applied to every statement
#[derive(Debug, Clone)]
struct Rewrite {
    pattern: Regex,
    replacement: String,
}

impl Rewrite {
    fn new(pattern: &str, replacement: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }
}

/// Everything the bootstrap needs to know about the active dialect
#[derive(Debug, Clone)]
pub struct DialectProfile {
    dialect: Dialect,
    max_string_length: usize,
    true_literal: &'static str,
    false_literal: &'static str,
    upper_true_literal: &'static str,
    upper_false_literal: &'static str,
    rewrites: Vec<Rewrite>,
}

impl DialectProfile {
    /// Resolve the profile for a dialect
    ///
    /// A non-zero `max_string_length` overrides the dialect default but may not
    /// go below the dialect minimum.
    pub fn resolve(dialect: Dialect, max_string_length: usize) -> Result<Self> {
        let minimum = dialect.minimum_max_string_length();
        let max_string_length = match max_string_length {
            0 => dialect.default_max_string_length(),
            n if n < minimum => {
                return Err(Error::InvalidConfig(format!(
                    "The maximum string length must be >= {} characters (got {})",
                    minimum, n
                )));
            }
            n => n,
        };

        let (true_literal, false_literal, upper_true_literal, upper_false_literal) =
            if dialect.is_a(Dialect::Postgresql) {
                ("true", "false", "TRUE", "FALSE")
            } else {
                ("1", "0", "1", "0")
            };

        let mut rewrites = Vec::new();
        if dialect == Dialect::MysqlInnodb {
            rewrites.push(Rewrite::new(r"(?i)TYPE=InnoDB", "ENGINE=InnoDB")?);
        }
        if dialect.is_a(Dialect::MysqlClusterNdb) {
            rewrites.push(Rewrite::new(r"(?i)TYPE=InnoDB", "ENGINE=NDB")?);
            rewrites.push(Rewrite::new(r"(?i)ENGINE=InnoDB", "ENGINE=NDB")?);
            rewrites.push(Rewrite::new(r"(?i) BIT ", " BOOLEAN ")?);
            rewrites.push(Rewrite::new(r"(?i) BIT,", " BOOLEAN,")?);
            rewrites.push(Rewrite::new(
                r"(?i) string_value text",
                &format!(" string_value VARCHAR({})", DEFAULT_MAX_STRING_LENGTH_NDB),
            )?);
            rewrites.push(Rewrite::new(r"(?i) VARCHAR\(4000\)", " TEXT(4000)")?);
        }

        Ok(Self {
            dialect,
            max_string_length,
            true_literal,
            false_literal,
            upper_true_literal,
            upper_false_literal,
            rewrites,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Maximum number of characters a string column can hold
    pub fn max_string_length(&self) -> usize {
        self.max_string_length
    }

    /// Always-present script variables for boolean literals
    pub fn boolean_variables(&self) -> [(&'static str, &'static str); 4] {
        [
            ("true", self.true_literal),
            ("false", self.false_literal),
            ("TRUE", self.upper_true_literal),
            ("FALSE", self.upper_false_literal),
        ]
    }

    /// Apply the dialect's DDL rewrites to a statement
    pub fn rewrite(&self, sql: &str) -> String {
        let mut sql = sql.to_string();
        for rewrite in &self.rewrites {
            sql = rewrite
                .pattern
                .replace_all(&sql, rewrite.replacement.as_str())
                .into_owned();
        }
        sql
    }

    /// Truncate a value so that it fits into the string columns of the schema
    pub fn trim_string_for_text_fields<'a>(&self, value: &'a str) -> &'a str {
        match value.char_indices().nth(self.max_string_length) {
            Some((idx, _)) => &value[..idx],
            None => value,
        }
    }
}
