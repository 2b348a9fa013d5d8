//! Lock conflict comparison between two analyzed statements

use crate::analysis::{AnalyzedQuery, TableLockInfo};
use crate::lock::LockMode;
use serde::Serialize;
use std::collections::HashMap;

/// A table both statements lock in conflicting modes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingTable {
    pub table: String,
    pub lock_a: LockMode,
    pub lock_b: LockMode,
    pub reason: String,
}

/// A table both statements lock in compatible modes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibleTable {
    pub table: String,
    pub lock_a: LockMode,
    pub lock_b: LockMode,
}

/// Tables only one side touches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueTables {
    pub side_a_only: Vec<String>,
    pub side_b_only: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub is_compatible: bool,
    pub conflicting_tables: Vec<ConflictingTable>,
    pub compatible_tables: Vec<CompatibleTable>,
    pub unique_tables: UniqueTables,
}

impl ComparisonResult {
    /// Result for inputs that could not be analyzed. Never reported as safe.
    pub fn incompatible() -> Self {
        Self {
            is_compatible: false,
            conflicting_tables: Vec::new(),
            compatible_tables: Vec::new(),
            unique_tables: UniqueTables::default(),
        }
    }

    /// One-line description derived from the counts
    pub fn summary(&self) -> String {
        let shared = self.conflicting_tables.len() + self.compatible_tables.len();
        let unique = self.unique_tables.side_a_only.len() + self.unique_tables.side_b_only.len();

        if self.is_compatible {
            format!("Compatible: {shared} shared table(s), no lock conflicts, {unique} unique table(s)")
        } else if self.conflicting_tables.is_empty() {
            "Incompatible: lock information unavailable for at least one statement".to_string()
        } else {
            format!(
                "Incompatible: {} of {shared} shared table(s) conflict, {unique} unique table(s)",
                self.conflicting_tables.len()
            )
        }
    }
}

/// Compare the locks of two statements table by table.
///
/// Shared tables are reported in side A's order. An invalid side makes the
/// whole comparison incompatible with no detail.
pub fn compare_locks(
    a: &[TableLockInfo],
    a_valid: bool,
    b: &[TableLockInfo],
    b_valid: bool,
) -> ComparisonResult {
    if !a_valid || !b_valid {
        return ComparisonResult::incompatible();
    }

    let a_modes: HashMap<&str, LockMode> = a.iter().map(|i| (i.table.as_str(), i.lock_mode)).collect();
    let b_modes: HashMap<&str, LockMode> = b.iter().map(|i| (i.table.as_str(), i.lock_mode)).collect();

    let mut conflicting_tables = Vec::new();
    let mut compatible_tables = Vec::new();
    let mut unique_tables = UniqueTables::default();

    for info in a {
        let lock_a = info.lock_mode;
        match b_modes.get(info.table.as_str()) {
            Some(&lock_b) if lock_a.conflicts_with(lock_b) || lock_b.conflicts_with(lock_a) => {
                conflicting_tables.push(ConflictingTable {
                    table: info.table.clone(),
                    lock_a,
                    lock_b,
                    reason: format!("{lock_a} on side A conflicts with {lock_b} on side B"),
                });
            }
            Some(&lock_b) => compatible_tables.push(CompatibleTable {
                table: info.table.clone(),
                lock_a,
                lock_b,
            }),
            None => unique_tables.side_a_only.push(info.table.clone()),
        }
    }

    unique_tables.side_b_only = b
        .iter()
        .filter(|info| !a_modes.contains_key(info.table.as_str()))
        .map(|info| info.table.clone())
        .collect();

    ComparisonResult {
        is_compatible: conflicting_tables.is_empty(),
        conflicting_tables,
        compatible_tables,
        unique_tables,
    }
}

/// Compare two analyses
pub fn compare(a: &AnalyzedQuery, b: &AnalyzedQuery) -> ComparisonResult {
    match (a.lock_info(), b.lock_info()) {
        (Ok(a_locks), Ok(b_locks)) => compare_locks(&a_locks, true, &b_locks, true),
        _ => ComparisonResult::incompatible(),
    }
}
