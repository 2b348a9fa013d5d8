//! Role and lock assignment

use super::classify::{Classified, RolePolicy};
use crate::error::{Error, Result};
use crate::lock::LockMode;
use serde::Serialize;

/// Why a table is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableRole {
    /// Acted upon by the statement, including both tables of a dual-primary
    /// statement
    Primary,
    /// Read by the statement, or named by a foreign key it creates
    Referenced,
}

/// One extracted table with its role and resolved lock mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub table: String,
    pub role: TableRole,
    pub lock_mode: LockMode,
}

/// Spread the classification's lock mode over `tables` according to its policy.
///
/// A primary hint that is not among `tables` is ignored and the first table
/// takes its place. A dual-primary statement without a usable secondary
/// behaves like single-primary. Tables written by a `WITH` query always get
/// `ROW EXCLUSIVE`, and foreign-key targets at least `SHARE ROW EXCLUSIVE`.
pub fn assign(classified: &Classified, tables: &[String]) -> Result<Vec<TableReference>> {
    let classification = classified.classification;
    let (Some(mode), Some(policy)) = (classification.lock_mode(), classification.policy()) else {
        return Err(Error::UnknownClassification(classified.kind.clone()));
    };

    let known = |name: &&str| tables.iter().any(|table| table == name);
    let primary = classified
        .primary
        .as_deref()
        .filter(known)
        .or_else(|| tables.first().map(String::as_str));
    let secondary = match policy {
        RolePolicy::Dual => classified
            .secondary
            .as_deref()
            .filter(known)
            .filter(|name| Some(*name) != primary),
        RolePolicy::Single | RolePolicy::All => None,
    };
    // A locking set that covers none of the tables (only CTEs, say) falls
    // back to every table
    let locked = classified
        .locked
        .as_deref()
        .filter(|locked| locked.iter().any(|name| known(&name.as_str())));
    let listed = |list: &[String], name: &str| list.iter().any(|entry| entry == name);

    let references = tables
        .iter()
        .map(|table| {
            let name = Some(table.as_str());
            let (role, lock_mode) = match policy {
                _ if listed(&classified.modified, table) => {
                    (TableRole::Primary, LockMode::RowExclusive)
                }
                RolePolicy::All => match locked {
                    Some(locked) if !listed(locked, table) => {
                        (TableRole::Referenced, LockMode::AccessShare)
                    }
                    _ => (TableRole::Primary, mode),
                },
                _ if name == primary || name == secondary => (TableRole::Primary, mode),
                _ if listed(&classified.fk_references, table) => {
                    (TableRole::Referenced, LockMode::ShareRowExclusive)
                }
                RolePolicy::Single | RolePolicy::Dual => {
                    (TableRole::Referenced, LockMode::AccessShare)
                }
            };
            TableReference {
                table: table.clone(),
                role,
                lock_mode,
            }
        })
        .collect();

    Ok(references)
}
