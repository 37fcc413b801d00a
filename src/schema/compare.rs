// src/schema/compare.rs

//! Structural comparison of a reference schema against a target schema

use super::model::{Index, PrimaryKey, Schema, Table};
use std::fmt;

/// Which side a difference was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceKind {
    /// Present in the reference, missing from the target
    ReferenceOnly,
    /// Present in the target, missing from the reference
    TargetOnly,
    /// Present on both sides with different values
    Different,
}

/// A single structural difference, addressed by a dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub kind: DifferenceKind,
    /// e.g. `alf_node.columns.uuid.type`
    pub path: String,
    pub reference: Option<String>,
    pub target: Option<String>,
}

impl Difference {
    fn reference_only(path: String, value: &str) -> Self {
        Self {
            kind: DifferenceKind::ReferenceOnly,
            path,
            reference: Some(value.to_string()),
            target: None,
        }
    }

    fn target_only(path: String, value: &str) -> Self {
        Self {
            kind: DifferenceKind::TargetOnly,
            path,
            reference: None,
            target: Some(value.to_string()),
        }
    }

    fn different(path: String, reference: String, target: String) -> Self {
        Self {
            kind: DifferenceKind::Different,
            path,
            reference: Some(reference),
            target: Some(target),
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reference = self.reference.as_deref().unwrap_or("");
        let target = self.target.as_deref().unwrap_or("");
        match self.kind {
            DifferenceKind::ReferenceOnly => {
                write!(f, "Missing from database: {} ({})", self.path, reference)
            }
            DifferenceKind::TargetOnly => {
                write!(f, "Unexpected in database: {} ({})", self.path, target)
            }
            DifferenceKind::Different => write!(
                f,
                "Difference at {}: expected '{}', found '{}'",
                self.path, reference, target
            ),
        }
    }
}

fn normalize_type(column_type: &str) -> String {
    column_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Compare a reference schema against a target schema
pub fn compare(reference: &Schema, target: &Schema) -> Vec<Difference> {
    let mut differences = Vec::new();

    for ref_table in &reference.tables {
        match target.table(&ref_table.name) {
            Some(target_table) => compare_tables(ref_table, target_table, &mut differences),
            None => differences.push(Difference::reference_only(
                ref_table.name.clone(),
                &ref_table.name,
            )),
        }
    }
    for target_table in &target.tables {
        if reference.table(&target_table.name).is_none() {
            differences.push(Difference::target_only(
                target_table.name.clone(),
                &target_table.name,
            ));
        }
    }
    differences
}

fn compare_tables(reference: &Table, target: &Table, out: &mut Vec<Difference>) {
    let table = reference.name.to_ascii_lowercase();

    for ref_column in &reference.columns {
        let path = format!("{}.columns.{}", table, ref_column.name.to_ascii_lowercase());
        let Some(target_column) = target.column(&ref_column.name) else {
            out.push(Difference::reference_only(path, &ref_column.name));
            continue;
        };
        if normalize_type(&ref_column.column_type) != normalize_type(&target_column.column_type) {
            out.push(Difference::different(
                format!("{}.type", path),
                ref_column.column_type.clone(),
                target_column.column_type.clone(),
            ));
        }
        if ref_column.nullable != target_column.nullable {
            out.push(Difference::different(
                format!("{}.nullable", path),
                ref_column.nullable.to_string(),
                target_column.nullable.to_string(),
            ));
        }
    }
    for target_column in &target.columns {
        if reference.column(&target_column.name).is_none() {
            out.push(Difference::target_only(
                format!("{}.columns.{}", table, target_column.name.to_ascii_lowercase()),
                &target_column.name,
            ));
        }
    }

    compare_primary_keys(
        &table,
        reference.primary_key.as_ref(),
        target.primary_key.as_ref(),
        out,
    );
    compare_indexes(&table, &reference.indexes, &target.indexes, out);
}

fn compare_primary_keys(
    table: &str,
    reference: Option<&PrimaryKey>,
    target: Option<&PrimaryKey>,
    out: &mut Vec<Difference>,
) {
    let path = format!("{}.primarykey", table);
    match (reference, target) {
        (Some(r), Some(t)) => {
            if !same_columns(&r.columns, &t.columns) {
                out.push(Difference::different(
                    format!("{}.columns", path),
                    r.columns.join(","),
                    t.columns.join(","),
                ));
            }
        }
        (Some(r), None) => out.push(Difference::reference_only(path, &r.columns.join(","))),
        (None, Some(t)) => out.push(Difference::target_only(path, &t.columns.join(","))),
        (None, None) => {}
    }
}

fn compare_indexes(table: &str, reference: &[Index], target: &[Index], out: &mut Vec<Difference>) {
    let mut matched = vec![false; target.len()];

    for ref_index in reference {
        let path = format!("{}.indexes.{}", table, ref_index.name.to_ascii_lowercase());
        let position = target
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(&ref_index.name))
            .or_else(|| {
                target.iter().enumerate().position(|(i, t)| {
                    !matched[i] && same_columns(&t.columns, &ref_index.columns)
                })
            });
        let Some(i) = position else {
            out.push(Difference::reference_only(path, &ref_index.name));
            continue;
        };
        matched[i] = true;
        let target_index = &target[i];
        if ref_index.unique != target_index.unique {
            out.push(Difference::different(
                format!("{}.unique", path),
                ref_index.unique.to_string(),
                target_index.unique.to_string(),
            ));
        }
        if !same_columns(&ref_index.columns, &target_index.columns) {
            out.push(Difference::different(
                format!("{}.columns", path),
                ref_index.columns.join(","),
                target_index.columns.join(","),
            ));
        }
    }

    for (i, target_index) in target.iter().enumerate() {
        if !matched[i] {
            out.push(Difference::target_only(
                format!("{}.indexes.{}", table, target_index.name.to_ascii_lowercase()),
                &target_index.name,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::Column;

    fn column(name: &str, column_type: &str, nullable: bool, order: usize) -> Column {
        Column {
            name: name.to_string(),
            column_type: column_type.to_string(),
            nullable,
            order,
        }
    }

    fn node_table() -> Table {
        let mut table = Table::new("alf_node");
        table.columns.push(column("id", "INTEGER", false, 1));
        table.columns.push(column("uuid", "VARCHAR(36)", false, 2));
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["id".to_string()],
        });
        table.indexes.push(Index {
            name: "idx_alf_node_uuid".to_string(),
            unique: true,
            columns: vec!["uuid".to_string()],
        });
        table
    }

    fn schema_with(table: Table) -> Schema {
        let mut schema = Schema::new("s", "alf_");
        schema.tables.push(table);
        schema
    }

    #[test]
    fn test_identical_schemas() {
        let reference = schema_with(node_table());
        let mut table = node_table();
        table.name = "ALF_NODE".to_string();
        table.columns[1].column_type = "varchar( 36 )".to_string();
        assert!(compare(&reference, &schema_with(table)).is_empty());
    }

    #[test]
    fn test_extra_column() {
        let reference = schema_with(node_table());
        let mut table = node_table();
        table.columns.push(column("extra", "TEXT", true, 3));

        let diffs = compare(&reference, &schema_with(table));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::TargetOnly);
        assert_eq!(diffs[0].path, "alf_node.columns.extra");
    }

    #[test]
    fn test_column_changes() {
        let reference = schema_with(node_table());
        let mut table = node_table();
        table.columns[1].column_type = "TEXT".to_string();
        table.columns[1].nullable = true;

        let paths: Vec<String> = compare(&reference, &schema_with(table))
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(
            paths,
            vec!["alf_node.columns.uuid.type", "alf_node.columns.uuid.nullable"]
        );
    }

    #[test]
    fn test_missing_table_and_index() {
        let reference = schema_with(node_table());
        let diffs = compare(&reference, &Schema::new("s", "alf_"));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::ReferenceOnly);
        assert!(diffs[0].to_string().contains("Missing from database: alf_node"));

        let mut table = node_table();
        table.indexes.clear();
        let diffs = compare(&reference, &schema_with(table));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "alf_node.indexes.idx_alf_node_uuid");
    }

    #[test]
    fn test_index_matched_by_columns() {
        let reference = schema_with(node_table());
        let mut table = node_table();
        table.indexes[0].name = "sqlite_renamed".to_string();
        table.indexes[0].unique = false;

        let diffs = compare(&reference, &schema_with(table));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "alf_node.indexes.idx_alf_node_uuid.unique");
    }

    #[test]
    fn test_primary_key_columns() {
        let reference = schema_with(node_table());
        let mut table = node_table();
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["uuid".to_string()],
        });
        let diffs = compare(&reference, &schema_with(table));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "alf_node.primarykey.columns");
        assert_eq!(diffs[0].kind, DifferenceKind::Different);
    }
}
