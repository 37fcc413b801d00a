// src/script/context.rs

//! Per-attempt script execution state

use tracing::trace;

/// Initial capacity of the executed statement log
const STATEMENT_LOG_CAPACITY: usize = 8094;

/// State carried through one bootstrap attempt
///
/// The statement log doubles as the lock ownership flag: it is `None` until
/// this attempt has taken the bootstrap lock and executed its first statement,
/// and is cleared again once the lock is released.
#[derive(Debug, Default)]
pub struct ScriptExecutionContext {
    executed: Option<String>,
    include_chain: Vec<String>,
}

impl ScriptExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this attempt owns the bootstrap and may execute statements
    pub fn has_executed(&self) -> bool {
        self.executed.is_some()
    }

    /// Start the statement log once the lock has been acquired
    pub fn begin(&mut self) {
        if self.executed.is_none() {
            self.executed = Some(String::with_capacity(STATEMENT_LOG_CAPACITY));
        }
    }

    /// Append an executed statement to the log
    pub fn record(&mut self, sql: &str) {
        if let Some(log) = self.executed.as_mut() {
            log.push_str(sql);
            log.push_str(";\n\n");
        }
    }

    /// Every statement executed in this attempt, in order
    pub fn executed_statements(&self) -> Option<&str> {
        self.executed.as_deref()
    }

    /// Drop the statement log; the attempt no longer owns the bootstrap
    pub fn clear(&mut self) {
        self.executed = None;
    }

    /// Scripts currently being executed, outermost first
    pub fn include_chain(&self) -> &[String] {
        &self.include_chain
    }

    pub(crate) fn is_running(&self, url: &str) -> bool {
        self.include_chain.iter().any(|u| u == url)
    }

    pub(crate) fn enter_script(&mut self, url: &str) {
        trace!("Entering script {} at depth {}", url, self.include_chain.len());
        self.include_chain.push(url.to_string());
    }

    pub(crate) fn leave_script(&mut self) {
        self.include_chain.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_starts_on_begin() {
        let mut ctx = ScriptExecutionContext::new();
        ctx.record("ignored");
        assert!(!ctx.has_executed());
        assert!(ctx.executed_statements().is_none());

        ctx.begin();
        ctx.record("CREATE TABLE t (x INTEGER)");
        ctx.record("DROP TABLE t");
        assert!(ctx.has_executed());
        assert_eq!(
            ctx.executed_statements().unwrap(),
            "CREATE TABLE t (x INTEGER);\n\nDROP TABLE t;\n\n"
        );

        ctx.clear();
        assert!(!ctx.has_executed());
    }

    #[test]
    fn test_include_chain() {
        let mut ctx = ScriptExecutionContext::new();
        ctx.enter_script("a.sql");
        ctx.enter_script("b.sql");
        assert!(ctx.is_running("a.sql"));
        assert_eq!(ctx.include_chain(), ["a.sql", "b.sql"]);
        ctx.leave_script();
        assert!(!ctx.is_running("b.sql"));
    }
}
