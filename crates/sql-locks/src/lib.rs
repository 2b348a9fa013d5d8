//! Table-level lock inference for PostgreSQL statements
//!
//! This crate answers "which tables does this statement lock, and how
//! strongly?" without touching a database:
//! - Classifies each statement into a closed set of command variants
//! - Extracts every base table it reads or writes, minus CTE aliases
//! - Assigns each table a PostgreSQL table lock mode
//! - Compares two statements and reports the tables whose locks conflict

pub mod analysis;
pub mod compare;
pub mod config;
pub mod error;
pub mod lock;
pub mod parsing;

// Re-export main types
pub use analysis::{
    AnalyzedQuery, CachingAnalyzer, Classification, LockAnalyzer, RolePolicy, TableLockInfo,
    TableRole,
};
pub use compare::{
    CompatibleTable, ComparisonResult, ConflictingTable, UniqueTables, compare, compare_locks,
};
pub use config::{AnalyzerConfig, SqlDialect};
pub use error::{Error, Result};
pub use lock::LockMode;
pub use parsing::{InitStatus, ParserHandle};

/// Analyze the first statement in `sql` with the process-wide parser
pub fn analyze(sql: &str) -> AnalyzedQuery {
    LockAnalyzer::new().analyze(sql)
}

/// Analyze two statements and compare their locks
pub fn compare_sql(a: &str, b: &str) -> ComparisonResult {
    let analyzer = LockAnalyzer::new();
    compare(&analyzer.analyze(a), &analyzer.analyze(b))
}
