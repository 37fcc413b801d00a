// src/schema/model.rs

//! In-memory schema model shared by the exporter, XML codec and comparator

/// A set of tables sharing a name prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    /// Only tables starting with this prefix belong to the schema
    pub db_prefix: String,
    /// Schema version recorded in the reference, if any
    pub version: Option<i32>,
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new(name: &str, db_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            db_prefix: db_prefix.to_string(),
            ..Self::default()
        }
    }

    /// Find a table by name, ignoring case
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Check whether a table name falls under this schema's prefix
    pub fn owns_table(&self, name: &str) -> bool {
        name.to_ascii_lowercase()
            .starts_with(&self.db_prefix.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declared type as reported by the database
    pub column_type: String,
    pub nullable: bool,
    /// 1-based position in the table
    pub order: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Constraint name; SQLite does not name primary keys
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}
