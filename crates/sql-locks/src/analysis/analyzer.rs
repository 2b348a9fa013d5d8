//! Per-statement analysis pipeline
//!
//! `parse → classify → extract → assign`. Every failure along the way is
//! folded into the returned [`AnalyzedQuery`] instead of crossing this
//! boundary as an `Err`.

use super::assign::{TableReference, TableRole, assign};
use super::classify::{Classification, classify};
use super::extract::extract_tables;
use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::lock::LockMode;
use crate::parsing::{ParsedStatement, ParserHandle};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Outcome of analyzing one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedQuery {
    classification: Classification,
    tables: Vec<String>,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
    #[serde(skip)]
    primary: Option<String>,
    #[serde(skip)]
    secondary: Option<String>,
    #[serde(skip)]
    references: Vec<TableReference>,
}

impl AnalyzedQuery {
    /// An analysis that failed before any statement was available
    fn failed(error: Error) -> Self {
        Self {
            classification: Classification::Unrecognized,
            tables: Vec::new(),
            valid: false,
            error: Some(error),
            primary: None,
            secondary: None,
            references: Vec::new(),
        }
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// Base tables in discovery order, CTE aliases removed
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Explicit target named by the statement, if any
    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Associated table of a dual-primary statement, if any
    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// Lock information for every table, or the analysis error
    pub fn lock_info(&self) -> Result<Vec<TableLockInfo>> {
        if !self.valid {
            return Err(self.error.clone().unwrap_or(Error::NoTablesFound));
        }
        Ok(self.references.iter().map(TableLockInfo::from).collect())
    }
}

/// One table's lock as seen by another transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableLockInfo {
    pub table: String,
    pub lock_mode: LockMode,
    pub description: String,
    /// Modes another transaction could not acquire on this table
    pub conflicts: Vec<LockMode>,
    pub role: TableRole,
}

impl From<&TableReference> for TableLockInfo {
    fn from(reference: &TableReference) -> Self {
        Self {
            table: reference.table.clone(),
            lock_mode: reference.lock_mode,
            description: reference.lock_mode.describe().to_string(),
            conflicts: reference.lock_mode.conflict_set(),
            role: reference.role,
        }
    }
}

/// Analyze a statement that has already been parsed
pub fn analyze_statement(statement: &ParsedStatement) -> AnalyzedQuery {
    let classified = classify(statement);
    let tables = extract_tables(statement);

    tracing::debug!(
        "Classified statement as {} with {} table(s)",
        classified.classification,
        tables.len()
    );

    let result = assign(&classified, &tables).and_then(|references| {
        if references.is_empty() {
            Err(Error::NoTablesFound)
        } else {
            Ok(references)
        }
    });

    let (valid, error, references) = match result {
        Ok(references) => (true, None, references),
        Err(e) => (false, Some(e), Vec::new()),
    };

    AnalyzedQuery {
        classification: classified.classification,
        tables,
        valid,
        error,
        primary: classified.primary,
        secondary: classified.secondary,
        references,
    }
}

enum HandleSource {
    Global,
    Owned(Arc<ParserHandle>),
}

/// Stateless analyzer over a parser handle
pub struct LockAnalyzer {
    handle: HandleSource,
}

impl LockAnalyzer {
    /// Analyzer on the process-wide parser handle
    pub fn new() -> Self {
        Self {
            handle: HandleSource::Global,
        }
    }

    /// Analyzer for `config`. The default grammar settings share the
    /// process-wide handle; anything else gets a private one.
    pub fn with_config(config: AnalyzerConfig) -> Self {
        let defaults = AnalyzerConfig::default();
        if config.dialect == defaults.dialect && config.recursion_limit == defaults.recursion_limit
        {
            return Self::new();
        }
        Self::with_handle(Arc::new(ParserHandle::new(config)))
    }

    /// Analyzer on a caller-supplied handle
    pub fn with_handle(handle: Arc<ParserHandle>) -> Self {
        Self {
            handle: HandleSource::Owned(handle),
        }
    }

    pub fn handle(&self) -> &ParserHandle {
        match &self.handle {
            HandleSource::Global => ParserHandle::global(),
            HandleSource::Owned(handle) => handle,
        }
    }

    /// Analyze the first statement in `sql`. Later statements are ignored.
    pub fn analyze(&self, sql: &str) -> AnalyzedQuery {
        match self.handle().parse(sql) {
            Ok(statements) => {
                if statements.len() > 1 {
                    tracing::debug!(
                        "Analyzing first of {} statements, ignoring the rest",
                        statements.len()
                    );
                }
                match statements.first() {
                    Some(statement) => analyze_statement(statement),
                    None => AnalyzedQuery::failed(Error::EmptyInput),
                }
            }
            Err(e) => AnalyzedQuery::failed(e),
        }
    }

    /// Analyze every statement in `sql`.
    ///
    /// A parse failure anywhere in the script yields a single failed analysis.
    pub fn analyze_script(&self, sql: &str) -> Vec<AnalyzedQuery> {
        match self.handle().parse(sql) {
            Ok(statements) => statements.iter().map(analyze_statement).collect(),
            Err(e) => vec![AnalyzedQuery::failed(e)],
        }
    }
}

impl Default for LockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockAnalyzer")
            .field("handle", self.handle())
            .finish()
    }
}

/// Analyzer that remembers recent results by statement text
pub struct CachingAnalyzer {
    analyzer: LockAnalyzer,
    cache: LruCache<String, Arc<AnalyzedQuery>>,
}

impl CachingAnalyzer {
    /// Create a caching analyzer with the default configuration
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    /// Create a caching analyzer; `config.cache_capacity` bounds the cache
    pub fn with_config(config: AnalyzerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            analyzer: LockAnalyzer::with_config(config),
            cache: LruCache::new(capacity),
        }
    }

    /// Analyze with caching
    pub fn analyze(&mut self, sql: &str) -> Arc<AnalyzedQuery> {
        let normalized = normalize_sql(sql);

        if let Some(analysis) = self.cache.get(&normalized) {
            tracing::debug!("Analysis cache hit");
            return analysis.clone();
        }

        let analysis = Arc::new(self.analyzer.analyze(&normalized));
        self.cache.put(normalized, analysis.clone());
        analysis
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for CachingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize SQL for consistent caching
#[inline]
fn normalize_sql(sql: &str) -> String {
    sql.trim().to_string()
}
