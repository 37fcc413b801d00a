// src/script/interpreter.rs

//! Line-oriented SQL script interpreter

use super::{ScriptExecutionContext, ScriptSyntaxError};
use crate::db::value_to_string;
use crate::dialect::DialectProfile;
use crate::error::{Error, Result};
use crate::lock::{LockResult, Progress};
use crate::resource::{ResourceLoader, load_dialect_resource};
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::{debug, error};

/// Maximum number of nested scripts, counting the outermost one
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Property consulted when a `--FOREACH` batch size property is not set
pub const DEFAULT_BATCH_SIZE_PROPERTY: &str = "system.upgrade.default.batchsize";

/// Batch size used when neither property is set
pub const DEFAULT_BATCH_SIZE: i64 = 10_000;

const DEFAULT_DELIMITER: &str = ";";

/// Hook run before the first statement of a bootstrap attempt
///
/// The gate decides whether this attempt may start modifying the schema,
/// normally by taking the cluster bootstrap lock.
pub trait ExecutionGate {
    fn on_first_statement(
        &mut self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
    ) -> Result<LockResult>;

    /// Pass the gate unless this attempt has already started executing
    fn enter(&mut self, conn: &Connection, ctx: &mut ScriptExecutionContext) -> Result<LockResult> {
        if ctx.has_executed() {
            return Ok(LockResult::Acquired);
        }
        let result = self.on_first_statement(conn, ctx)?;
        if result == LockResult::Acquired {
            ctx.begin();
        }
        Ok(result)
    }
}

/// Pending `--ASSIGN:` capture
#[derive(Debug, Clone)]
struct Assignment {
    variable: String,
    column: String,
    default: Option<String>,
}

impl Assignment {
    fn parse(line: &str) -> Option<Self> {
        let spec = line.strip_prefix("--ASSIGN:")?;
        let (variable, rest) = spec.split_once('=')?;
        let (column, default) = match rest.split_once('!') {
            Some((column, default)) => (column, Some(default.to_string())),
            None => (rest, None),
        };
        let (variable, column) = (variable.trim(), column.trim());
        if variable.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self {
            variable: variable.to_string(),
            column: column.to_string(),
            default,
        })
    }
}

/// Parsed `--FOREACH` arguments
#[derive(Debug)]
struct Foreach<'l> {
    table: &'l str,
    column: &'l str,
    property: &'l str,
}

impl<'l> Foreach<'l> {
    fn parse(line: &'l str) -> Option<Self> {
        let mut args = line.strip_prefix("--FOREACH")?.split_whitespace();
        let target = args.next()?;
        let property = args.next()?;
        if args.next().is_some() {
            return None;
        }
        let (table, column) = target.split_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self {
            table,
            column,
            property,
        })
    }
}

/// Id windows for a `--FOREACH` statement
#[derive(Debug, Clone, Copy)]
struct BatchWindow {
    upper_limit: Option<i64>,
    batch_size: i64,
}

impl BatchWindow {
    fn bounds(&self) -> Vec<(i64, i64)> {
        match self.upper_limit {
            None => vec![(0, 0)],
            Some(upper) => (0..=upper)
                .step_by(self.batch_size as usize)
                .map(|lower| (lower, lower.saturating_add(self.batch_size - 1)))
                .collect(),
        }
    }
}

/// Variables and delimiter of one running script
///
/// Each script, included ones too, starts with a fresh frame.
#[derive(Debug)]
struct ScriptFrame {
    variables: HashMap<String, Option<String>>,
    delimiter: String,
}

impl ScriptFrame {
    fn new(profile: &DialectProfile) -> Self {
        let mut variables = HashMap::new();
        for (name, value) in profile.boolean_variables() {
            variables.insert(name.to_string(), Some(value.to_string()));
        }
        let now = chrono::Utc::now().timestamp_millis().to_string();
        variables.insert("now".to_string(), Some(now.clone()));
        variables.insert("NOW".to_string(), Some(now));
        Self {
            variables,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }

    fn set(&mut self, name: &str, value: Option<String>) {
        self.variables.insert(name.to_string(), value);
    }

    /// Replace `${name}` tokens; unset values become `null`
    fn substitute(&self, sql: &str) -> String {
        let mut sql = sql.to_string();
        for (name, value) in &self.variables {
            let token = format!("${{{}}}", name);
            if sql.contains(&token) {
                sql = sql.replace(&token, value.as_deref().unwrap_or("null"));
            }
        }
        sql
    }
}

/// A terminated statement waiting to run
struct PendingStatement {
    text: String,
    assignment: Option<Assignment>,
    window: Option<BatchWindow>,
    optional: bool,
    line: usize,
}

/// Where a statement came from
struct StatementSite<'s> {
    url: &'s str,
    line: usize,
    optional: bool,
}

enum StatementOutcome {
    Contended,
    /// Ran; carries the fetched column value, if one was requested
    Executed(Option<String>),
    /// Optional statement failed
    Ignored,
}

/// Executes schema scripts against a connection
pub struct ScriptInterpreter<'a> {
    profile: &'a DialectProfile,
    loader: &'a dyn ResourceLoader,
    properties: &'a HashMap<String, String>,
}

impl<'a> ScriptInterpreter<'a> {
    pub fn new(
        profile: &'a DialectProfile,
        loader: &'a dyn ResourceLoader,
        properties: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            profile,
            loader,
            properties,
        }
    }

    pub fn profile(&self) -> &DialectProfile {
        self.profile
    }

    /// Load a script for the active dialect and execute it
    pub fn execute_script_url(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        url: &str,
    ) -> Result<Progress> {
        let resource = load_dialect_resource(self.loader, self.profile.dialect(), url)?
            .ok_or_else(|| Error::ScriptNotFound(url.to_string()))?;
        self.execute_script(conn, ctx, gate, &resource.location, &resource.content)
    }

    /// Execute script text; `url` is used for error reporting and include tracking
    pub fn execute_script(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        url: &str,
        script: &str,
    ) -> Result<Progress> {
        if ctx.is_running(url) {
            let mut chain = ctx.include_chain().to_vec();
            chain.push(url.to_string());
            return Err(Error::IncludeCycle {
                chain: chain.join(" -> "),
            });
        }
        if ctx.include_chain().len() >= MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeDepthExceeded {
                url: url.to_string(),
                max: MAX_INCLUDE_DEPTH,
            });
        }

        debug!("Executing script {}", url);
        ctx.enter_script(url);
        let result = self.run_script(conn, ctx, gate, url, script);
        ctx.leave_script();
        result
    }

    /// Execute a single statement outside any script
    pub fn execute_sql(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        sql: &str,
        source: &str,
    ) -> Result<Progress> {
        let site = StatementSite {
            url: source,
            line: 0,
            optional: false,
        };
        let sql = self.profile.rewrite(sql);
        match self.execute_statement(conn, ctx, gate, &sql, None, &site)? {
            StatementOutcome::Contended => Ok(Progress::Contended),
            StatementOutcome::Executed(_) | StatementOutcome::Ignored => Ok(Progress::Done),
        }
    }

    fn run_script(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        url: &str,
        script: &str,
    ) -> Result<Progress> {
        let syntax = |line: usize, kind: ScriptSyntaxError| Error::ScriptSyntax {
            url: url.to_string(),
            line,
            kind,
        };

        let mut frame = ScriptFrame::new(self.profile);
        let mut buffer = String::new();
        let mut assignment: Option<Assignment> = None;
        let mut window: Option<BatchWindow> = None;
        let mut line_no = 0;

        for (index, raw) in script.lines().enumerate() {
            line_no = index + 1;
            let line = raw.trim();

            if let Some(include) = line.strip_prefix("--INCLUDE:") {
                if !buffer.is_empty() {
                    return Err(syntax(line_no, ScriptSyntaxError::IncludeBeforeSql));
                }
                if self
                    .execute_script_url(conn, ctx, gate, include.trim())?
                    .is_contended()
                {
                    return Ok(Progress::Contended);
                }
                continue;
            }

            if line.starts_with("--ASSIGN:") {
                if !buffer.is_empty() {
                    return Err(syntax(line_no, ScriptSyntaxError::AssignmentBeforeSql));
                }
                let parsed = Assignment::parse(line).ok_or_else(|| {
                    syntax(line_no, ScriptSyntaxError::AssignmentFormat(line.to_string()))
                })?;
                assignment = Some(parsed);
                continue;
            }

            if line.starts_with("--FOREACH") {
                if !buffer.is_empty() {
                    return Err(syntax(line_no, ScriptSyntaxError::ForeachBeforeSql));
                }
                let foreach = Foreach::parse(line).ok_or_else(|| {
                    syntax(line_no, ScriptSyntaxError::ForeachFormat(line.to_string()))
                })?;
                let batch_size = self.batch_size(foreach.property)?;
                let sql = format!(
                    "SELECT MAX({}) AS upper_limit FROM {}",
                    foreach.column, foreach.table
                );
                let site = StatementSite {
                    url,
                    line: line_no,
                    optional: false,
                };
                let upper = match self.execute_statement(conn, ctx, gate, &sql, Some("upper_limit"), &site)? {
                    StatementOutcome::Contended => return Ok(Progress::Contended),
                    StatementOutcome::Executed(value) => value,
                    StatementOutcome::Ignored => None,
                };
                let upper_limit = match upper {
                    Some(value) => Some(parse_upper_limit(&value).ok_or_else(|| {
                        syntax(line_no, ScriptSyntaxError::ForeachFormat(line.to_string()))
                    })?),
                    None => None,
                };
                window = Some(BatchWindow {
                    upper_limit,
                    batch_size,
                });
                continue;
            }

            if (line.starts_with("--BEGIN TXN") || line.starts_with("--END TXN"))
                && !buffer.is_empty()
            {
                return Err(syntax(line_no, ScriptSyntaxError::TransactionBeforeSql));
            }

            if line.starts_with("--BEGIN TXN") {
                if conn.is_autocommit() {
                    conn.execute_batch("BEGIN")?;
                    debug!("Started explicit transaction ({}, line {})", url, line_no);
                }
                continue;
            }

            if line.starts_with("--END TXN") {
                if !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")?;
                    debug!("Committed explicit transaction ({}, line {})", url, line_no);
                }
                continue;
            }

            if let Some(delimiter) = line.strip_prefix("--SET-DELIMITER:") {
                if !buffer.is_empty() {
                    return Err(syntax(line_no, ScriptSyntaxError::DelimiterBeforeSql));
                }
                let delimiter = delimiter.trim();
                if delimiter.is_empty() {
                    return Err(syntax(line_no, ScriptSyntaxError::DelimiterInvalid));
                }
                frame.delimiter = delimiter.to_string();
                continue;
            }

            if line.is_empty()
                || line.starts_with("--")
                || line.starts_with("//")
                || line.starts_with("/*")
            {
                if !buffer.is_empty() {
                    return Err(syntax(
                        line_no,
                        ScriptSyntaxError::UnterminatedStatement {
                            delimiter: frame.delimiter.clone(),
                        },
                    ));
                }
                continue;
            }

            let (text, terminated, optional) = split_terminator(line, &frame.delimiter);
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            let indent = raw.chars().take_while(|c| c.is_whitespace()).count();
            buffer.extend(std::iter::repeat_n(' ', indent));
            buffer.push_str(text);
            if !terminated {
                continue;
            }

            let pending = PendingStatement {
                text: std::mem::take(&mut buffer),
                assignment: assignment.take(),
                window: window.take(),
                optional,
                line: line_no,
            };
            if self
                .run_statement(conn, ctx, gate, &mut frame, pending, url)?
                .is_contended()
            {
                return Ok(Progress::Contended);
            }
        }

        if !buffer.is_empty() {
            return Err(syntax(
                line_no,
                ScriptSyntaxError::UnterminatedStatement {
                    delimiter: frame.delimiter.clone(),
                },
            ));
        }
        Ok(Progress::Done)
    }

    /// Run a terminated statement once, or once per `--FOREACH` window
    fn run_statement(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        frame: &mut ScriptFrame,
        pending: PendingStatement,
        url: &str,
    ) -> Result<Progress> {
        let site = StatementSite {
            url,
            line: pending.line,
            optional: pending.optional,
        };
        let fetch_column = pending.assignment.as_ref().map(|a| a.column.as_str());
        let windows: Vec<Option<(i64, i64)>> = match pending.window {
            Some(window) => window.bounds().into_iter().map(Some).collect(),
            None => vec![None],
        };

        for bounds in windows {
            if let Some((lower, upper)) = bounds {
                frame.set("LOWERBOUND", Some(lower.to_string()));
                frame.set("UPPERBOUND", Some(upper.to_string()));
            }
            let sql = self.profile.rewrite(&frame.substitute(&pending.text));
            match self.execute_statement(conn, ctx, gate, &sql, fetch_column, &site)? {
                StatementOutcome::Contended => return Ok(Progress::Contended),
                StatementOutcome::Executed(value) => {
                    if let Some(assignment) = &pending.assignment {
                        let value = value.or_else(|| assignment.default.clone());
                        debug!("Assigned {} = {:?}", assignment.variable, value);
                        frame.set(&assignment.variable, value);
                    }
                }
                StatementOutcome::Ignored => {
                    if let Some(assignment) = &pending.assignment {
                        frame.set(&assignment.variable, assignment.default.clone());
                    }
                }
            }
        }
        Ok(Progress::Done)
    }

    fn execute_statement(
        &self,
        conn: &Connection,
        ctx: &mut ScriptExecutionContext,
        gate: &mut dyn ExecutionGate,
        sql: &str,
        fetch_column: Option<&str>,
        site: &StatementSite<'_>,
    ) -> Result<StatementOutcome> {
        if gate.enter(conn, ctx)? == LockResult::HeldByOther {
            return Ok(StatementOutcome::Contended);
        }

        debug!("Executing statement: {}", sql);
        match run_sql(conn, sql, fetch_column) {
            Ok(value) => {
                ctx.record(sql);
                Ok(StatementOutcome::Executed(value))
            }
            Err(e) if site.optional => {
                debug!(
                    "Optional statement failed (script {}, line {}): {}\n   SQL: {}",
                    site.url, site.line, e, sql
                );
                Ok(StatementOutcome::Ignored)
            }
            Err(e) => {
                error!(
                    "Statement execution failed:\n   SQL: {}\n   Error: {}\n   File: {}\n   Line: {}",
                    sql, e, site.url, site.line
                );
                Err(Error::StatementFailed {
                    sql: sql.to_string(),
                    url: site.url.to_string(),
                    line: site.line,
                    source: e,
                })
            }
        }
    }

    fn batch_size(&self, property: &str) -> Result<i64> {
        let value = self
            .properties
            .get(property)
            .or_else(|| self.properties.get(DEFAULT_BATCH_SIZE_PROPERTY));
        let Some(value) = value else {
            return Ok(DEFAULT_BATCH_SIZE);
        };
        match value.trim().parse::<i64>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(Error::InvalidConfig(format!(
                "Batch size for '{}' must be a positive integer (got '{}')",
                property, value
            ))),
        }
    }
}

/// Split a line into statement text and terminator flags (terminated, optional)
fn split_terminator<'l>(line: &'l str, delimiter: &str) -> (&'l str, bool, bool) {
    if let Some(sql) = line.strip_suffix(delimiter) {
        return (sql, true, false);
    }
    if (line.ends_with("(optional)") || line.ends_with("(OPTIONAL)"))
        && let Some(end) = line.rfind(delimiter)
    {
        return (&line[..end], true, true);
    }
    (line, false, false)
}

fn parse_upper_limit(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|v| v.floor() as i64))
}

/// Execute one statement, fetching `fetch_column` from the first row if asked
fn run_sql(
    conn: &Connection,
    sql: &str,
    fetch_column: Option<&str>,
) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(None);
    }

    let column = fetch_column.and_then(|name| {
        (0..stmt.column_count()).find(|&i| {
            stmt.column_name(i)
                .is_ok_and(|column| column.eq_ignore_ascii_case(name))
        })
    });
    let mut rows = stmt.query([])?;
    let value = match (column, rows.next()?) {
        (Some(i), Some(row)) => value_to_string(row.get_ref(i)?),
        _ => None,
    };
    Ok(value)
}
