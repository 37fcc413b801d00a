// src/schema/xml.rs

//! Reference schema XML
//!
//! Reference definitions and schema dumps share one document layout:
//!
//! ```text
//! <schema name="..." dbprefix="alf_" version="N">
//!   <objects>
//!     <table name="...">
//!       <columns>
//!         <column name="..." order="1"><type>..</type><nullable>false</nullable></column>
//!       </columns>
//!       <primarykey name="..."><columnnames><columnname order="1">..</columnname></columnnames></primarykey>
//!       <indexes>
//!         <index name="..." unique="true"><columnnames><columnname>..</columnname></columnnames></index>
//!       </indexes>
//!     </table>
//!   </objects>
//! </schema>
//! ```

use super::model::{Column, Index, PrimaryKey, Schema, Table};
use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

#[derive(Debug, Clone, Copy)]
enum TextField {
    Type,
    Nullable,
    ColumnName,
}

#[derive(Default)]
struct ParseState {
    schema: Schema,
    seen_root: bool,
    table: Option<Table>,
    column: Option<Column>,
    primary_key: Option<PrimaryKey>,
    index: Option<Index>,
    text: Option<TextField>,
}

impl ParseState {
    fn start(&mut self, e: &BytesStart) -> Result<()> {
        match e.name().as_ref() {
            b"schema" => {
                self.seen_root = true;
                self.schema.name = attribute(e, "name")?.unwrap_or_default();
                self.schema.db_prefix = attribute(e, "dbprefix")?.unwrap_or_default();
                self.schema.version = match attribute(e, "version")? {
                    Some(v) => Some(v.trim().parse().map_err(|_| {
                        Error::InvalidSchemaDocument(format!("bad schema version '{}'", v))
                    })?),
                    None => None,
                };
            }
            b"table" => {
                let name = required(e, "name", "table")?;
                self.table = Some(Table::new(&name));
            }
            b"column" => {
                let name = required(e, "name", "column")?;
                let order = match attribute(e, "order")? {
                    Some(v) => v.trim().parse().map_err(|_| {
                        Error::InvalidSchemaDocument(format!(
                            "bad order '{}' on column {}",
                            v, name
                        ))
                    })?,
                    None => self.table.as_ref().map_or(0, |t| t.columns.len()) + 1,
                };
                self.column = Some(Column {
                    name,
                    column_type: String::new(),
                    nullable: true,
                    order,
                });
            }
            b"primarykey" => {
                self.primary_key = Some(PrimaryKey {
                    name: attribute(e, "name")?,
                    columns: Vec::new(),
                });
            }
            b"index" => {
                let name = required(e, "name", "index")?;
                let unique = attribute(e, "unique")?.is_some_and(|v| v.eq_ignore_ascii_case("true"));
                self.index = Some(Index {
                    name,
                    unique,
                    columns: Vec::new(),
                });
            }
            b"type" => self.text = Some(TextField::Type),
            b"nullable" => self.text = Some(TextField::Nullable),
            b"columnname" => self.text = Some(TextField::ColumnName),
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        match self.text {
            Some(TextField::Type) => {
                if let Some(column) = self.column.as_mut() {
                    column.column_type = text.to_string();
                }
            }
            Some(TextField::Nullable) => {
                if let Some(column) = self.column.as_mut() {
                    column.nullable = text.eq_ignore_ascii_case("true");
                }
            }
            Some(TextField::ColumnName) => {
                if let Some(index) = self.index.as_mut() {
                    index.columns.push(text.to_string());
                } else if let Some(pk) = self.primary_key.as_mut() {
                    pk.columns.push(text.to_string());
                }
            }
            None => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"column" => {
                if let (Some(column), Some(table)) = (self.column.take(), self.table.as_mut()) {
                    table.columns.push(column);
                }
            }
            b"primarykey" => {
                if let Some(table) = self.table.as_mut() {
                    table.primary_key = self.primary_key.take();
                }
            }
            b"index" => {
                if let (Some(index), Some(table)) = (self.index.take(), self.table.as_mut()) {
                    table.indexes.push(index);
                }
            }
            b"table" => {
                if let Some(table) = self.table.take() {
                    self.schema.tables.push(table);
                }
            }
            b"type" | b"nullable" | b"columnname" => self.text = None,
            _ => {}
        }
    }
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required(e: &BytesStart, name: &str, element: &str) -> Result<String> {
    attribute(e, name)?.ok_or_else(|| {
        Error::InvalidSchemaDocument(format!("<{}> without a {} attribute", element, name))
    })
}

/// Parse a reference schema document
pub fn parse_schema(xml: &str) -> Result<Schema> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut state = ParseState::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => state.start(&e)?,
            Event::Empty(e) => {
                state.start(&e)?;
                state.end(e.name().as_ref());
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                state.text(&text);
            }
            Event::End(e) => state.end(e.name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }

    if !state.seen_root {
        return Err(Error::InvalidSchemaDocument(
            "missing <schema> root element".to_string(),
        ));
    }
    Ok(state.schema)
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn column_names<W: Write>(writer: &mut Writer<W>, columns: &[String]) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("columnnames")))?;
    for (i, column) in columns.iter().enumerate() {
        let order = (i + 1).to_string();
        let start = BytesStart::new("columnname").with_attributes([("order", order.as_str())]);
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(column)))?;
        writer.write_event(Event::End(BytesEnd::new("columnname")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("columnnames")))?;
    Ok(())
}

fn write_table<W: Write>(writer: &mut Writer<W>, table: &Table) -> Result<()> {
    let start = BytesStart::new("table").with_attributes([("name", table.name.as_str())]);
    writer.write_event(Event::Start(start))?;

    writer.write_event(Event::Start(BytesStart::new("columns")))?;
    for column in &table.columns {
        let order = column.order.to_string();
        let start = BytesStart::new("column")
            .with_attributes([("name", column.name.as_str()), ("order", order.as_str())]);
        writer.write_event(Event::Start(start))?;
        text_element(writer, "type", &column.column_type)?;
        text_element(writer, "nullable", if column.nullable { "true" } else { "false" })?;
        writer.write_event(Event::End(BytesEnd::new("column")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("columns")))?;

    if let Some(pk) = &table.primary_key {
        let mut start = BytesStart::new("primarykey");
        if let Some(name) = &pk.name {
            start.push_attribute(("name", name.as_str()));
        }
        writer.write_event(Event::Start(start))?;
        column_names(writer, &pk.columns)?;
        writer.write_event(Event::End(BytesEnd::new("primarykey")))?;
    }

    writer.write_event(Event::Start(BytesStart::new("indexes")))?;
    for index in &table.indexes {
        let start = BytesStart::new("index").with_attributes([
            ("name", index.name.as_str()),
            ("unique", if index.unique { "true" } else { "false" }),
        ]);
        writer.write_event(Event::Start(start))?;
        column_names(writer, &index.columns)?;
        writer.write_event(Event::End(BytesEnd::new("index")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("indexes")))?;

    writer.write_event(Event::End(BytesEnd::new("table")))?;
    Ok(())
}

/// Write a schema in reference format
pub fn write_schema<W: Write>(schema: &Schema, out: W) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("schema");
    root.push_attribute(("name", schema.name.as_str()));
    root.push_attribute(("dbprefix", schema.db_prefix.as_str()));
    let version = schema.version.map(|v| v.to_string());
    if let Some(version) = &version {
        root.push_attribute(("version", version.as_str()));
    }
    writer.write_event(Event::Start(root))?;

    writer.write_event(Event::Start(BytesStart::new("objects")))?;
    for table in &schema.tables {
        write_table(&mut writer, table)?;
    }
    writer.write_event(Event::End(BytesEnd::new("objects")))?;
    writer.write_event(Event::End(BytesEnd::new("schema")))?;

    let mut out = writer.into_inner();
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<schema name="reference" dbprefix="alf_" version="42">
  <objects>
    <table name="alf_node">
      <columns>
        <column name="id" order="1">
          <type>INTEGER</type>
          <nullable>false</nullable>
        </column>
        <column name="uuid" order="2">
          <type>VARCHAR(36)</type>
          <nullable>false</nullable>
        </column>
      </columns>
      <primarykey>
        <columnnames>
          <columnname order="1">id</columnname>
        </columnnames>
      </primarykey>
      <indexes>
        <index name="idx_alf_node_uuid" unique="true">
          <columnnames>
            <columnname>uuid</columnname>
          </columnnames>
        </index>
      </indexes>
    </table>
    <table name="alf_empty"/>
  </objects>
</schema>
"#;

    #[test]
    fn test_parse_reference() {
        let schema = parse_schema(REFERENCE).unwrap();
        assert_eq!(schema.name, "reference");
        assert_eq!(schema.db_prefix, "alf_");
        assert_eq!(schema.version, Some(42));
        assert_eq!(schema.tables.len(), 2);

        let node = &schema.tables[0];
        assert_eq!(node.columns.len(), 2);
        assert_eq!(node.columns[1].column_type, "VARCHAR(36)");
        assert!(!node.columns[1].nullable);
        assert_eq!(node.primary_key.as_ref().unwrap().columns, vec!["id"]);
        assert_eq!(node.indexes[0].columns, vec!["uuid"]);
        assert!(node.indexes[0].unique);
        assert_eq!(schema.tables[1].name, "alf_empty");
    }

    #[test]
    fn test_dump_parses_back() {
        let schema = parse_schema(REFERENCE).unwrap();
        let mut out = Vec::new();
        write_schema(&schema, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<?xml"));
        assert_eq!(parse_schema(&text).unwrap(), schema);
    }

    #[test]
    fn test_rejects_non_schema_document() {
        let result = parse_schema("<other/>");
        assert!(matches!(result, Err(Error::InvalidSchemaDocument(_))));

        let result = parse_schema(r#"<schema><objects><table/></objects></schema>"#);
        assert!(matches!(result, Err(Error::InvalidSchemaDocument(_))));
    }
}
