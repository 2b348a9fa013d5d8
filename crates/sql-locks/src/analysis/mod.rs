//! Statement analysis: classification, table extraction and lock assignment

pub mod analyzer;
pub mod assign;
pub mod classify;
pub mod extract;

pub use analyzer::{AnalyzedQuery, CachingAnalyzer, LockAnalyzer, TableLockInfo, analyze_statement};
pub use assign::{TableReference, TableRole, assign};
pub use classify::{Classification, Classified, RolePolicy, classify};
pub use extract::{TableExtractor, extract_tables};
