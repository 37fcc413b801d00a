// src/db/catalog.rs

//! Catalog introspection
//!
//! SQLite exposes each attached database as a schema. Table lookups either
//! span every visible database or are restricted to the configured schema name.

use crate::db::quote_ident;
use crate::error::Result;
use crate::schema::model::{Column, Index, PrimaryKey, Table};
use rusqlite::Connection;
use tracing::trace;

/// A table found in one of the visible databases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: String,
    pub name: String,
}

/// Names of the databases visible through the connection
pub fn databases(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// User tables in a single database, ordered by name
pub fn list_tables(conn: &Connection, database: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        quote_ident(database)
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Find tables matching a predicate across the visible databases
///
/// With `schema_name` set only that database is searched.
pub fn find_tables<F>(conn: &Connection, schema_name: Option<&str>, mut matches: F) -> Result<Vec<TableRef>>
where
    F: FnMut(&str) -> bool,
{
    let mut found = Vec::new();
    for database in databases(conn)? {
        if schema_name.is_some_and(|wanted| !wanted.eq_ignore_ascii_case(&database)) {
            continue;
        }
        for name in list_tables(conn, &database)? {
            if matches(&name) {
                trace!("Found table {}.{}", database, name);
                found.push(TableRef {
                    database: database.clone(),
                    name,
                });
            }
        }
    }
    Ok(found)
}

/// Read the definition of a table: columns, primary key and indexes
pub fn describe_table(conn: &Connection, database: &str, table: &str) -> Result<Table> {
    let db = quote_ident(database);
    let ident = quote_ident(table);

    let mut stmt = conn.prepare(&format!("PRAGMA {}.table_info({})", db, ident))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut columns = Vec::with_capacity(rows.len());
    let mut pk_columns: Vec<(i64, String)> = Vec::new();
    for (cid, name, column_type, not_null, pk) in rows {
        if pk > 0 {
            pk_columns.push((pk, name.clone()));
        }
        columns.push(Column {
            name,
            column_type,
            // SQLite leaves primary key columns nullable unless declared otherwise
            nullable: !not_null && pk == 0,
            order: (cid + 1) as usize,
        });
    }
    pk_columns.sort_by_key(|(position, _)| *position);
    let primary_key = (!pk_columns.is_empty()).then(|| PrimaryKey {
        name: None,
        columns: pk_columns.into_iter().map(|(_, name)| name).collect(),
    });

    let mut stmt = conn.prepare(&format!("PRAGMA {}.index_list({})", db, ident))?;
    let index_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut indexes = Vec::new();
    for (name, unique, origin) in index_rows {
        if origin == "pk" {
            continue;
        }
        let mut stmt = conn.prepare(&format!(
            "PRAGMA {}.index_info({})",
            db,
            quote_ident(&name)
        ))?;
        let mut index_columns = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        index_columns.sort_by_key(|(seq, _)| *seq);
        indexes.push(Index {
            name,
            unique,
            columns: index_columns
                .into_iter()
                .filter_map(|(_, column)| column)
                .collect(),
        });
    }
    indexes.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Table {
        name: table.to_string(),
        columns,
        primary_key,
        indexes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE alf_node (
                id INTEGER NOT NULL PRIMARY KEY,
                uuid VARCHAR(36) NOT NULL,
                store_id INTEGER
            );
            CREATE UNIQUE INDEX idx_alf_node_uuid ON alf_node (uuid, store_id);
            CREATE TABLE alf_child (
                parent_id INTEGER NOT NULL,
                child_id INTEGER NOT NULL,
                PRIMARY KEY (parent_id, child_id)
            );
            CREATE TABLE other (x INTEGER);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_databases_includes_main() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(databases(&conn).unwrap().contains(&"main".to_string()));
    }

    #[test]
    fn test_find_tables() {
        let conn = create_test_db();
        let found = find_tables(&conn, None, |name| name.starts_with("alf_")).unwrap();
        let names: Vec<&str> = found.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alf_child", "alf_node"]);

        let none = find_tables(&conn, Some("elsewhere"), |_| true).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_find_tables_in_attached_database() {
        let conn = create_test_db();
        conn.execute_batch("ATTACH DATABASE ':memory:' AS aux; CREATE TABLE aux.alf_store (id INTEGER);")
            .unwrap();
        let found = find_tables(&conn, None, |name| name == "alf_store").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].database, "aux");
    }

    #[test]
    fn test_describe_table() {
        let conn = create_test_db();
        let table = describe_table(&conn, "main", "alf_node").unwrap();
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.columns[1].name, "uuid");
        assert_eq!(table.columns[1].column_type, "VARCHAR(36)");
        assert!(!table.columns[1].nullable);
        assert!(table.columns[2].nullable);
        assert_eq!(table.primary_key.as_ref().unwrap().columns, vec!["id"]);
        assert_eq!(table.indexes.len(), 1);
        assert!(table.indexes[0].unique);
        assert_eq!(table.indexes[0].columns, vec!["uuid", "store_id"]);
    }

    #[test]
    fn test_composite_primary_key_skips_autoindex() {
        let conn = create_test_db();
        let table = describe_table(&conn, "main", "alf_child").unwrap();
        assert_eq!(
            table.primary_key.unwrap().columns,
            vec!["parent_id", "child_id"]
        );
        assert!(table.indexes.is_empty());
    }
}
