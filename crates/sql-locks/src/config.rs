//! Analyzer configuration

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect};

/// Default capacity of the analysis cache
const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default nesting depth the grammar accepts before giving up
const DEFAULT_RECURSION_LIMIT: usize = 50;

/// Grammar dialect handed to the SQL parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    PostgreSql,
    Generic,
}

impl SqlDialect {
    pub(crate) fn dialect(self) -> Box<dyn Dialect + Send + Sync> {
        match self {
            SqlDialect::PostgreSql => Box::new(PostgreSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Configuration for [`LockAnalyzer`](crate::LockAnalyzer) and
/// [`CachingAnalyzer`](crate::CachingAnalyzer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Grammar dialect
    pub dialect: SqlDialect,

    /// Maximum expression nesting depth accepted by the parser
    pub recursion_limit: usize,

    /// Number of analyses kept by the caching analyzer
    pub cache_capacity: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::default(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl AnalyzerConfig {
    /// Set the grammar dialect
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the parser recursion limit
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Set the analysis cache capacity
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
