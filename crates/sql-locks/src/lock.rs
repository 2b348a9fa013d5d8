//! Table-level lock modes and their conflict relation
//!
//! Mirrors PostgreSQL's eight table lock modes. The conflict relation is
//! stored once as unordered pairs, so `a.conflicts_with(b)` and
//! `b.conflicts_with(a)` always agree.
//!
//! One pair goes beyond PostgreSQL's lock table: ROW EXCLUSIVE against
//! SHARE UPDATE EXCLUSIVE. `CREATE INDEX CONCURRENTLY` holds only SHARE
//! UPDATE EXCLUSIVE but waits for every transaction writing the table, so
//! writers and online maintenance are reported as conflicting.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Table lock modes, declared weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Plain reads
    #[serde(rename = "ACCESS SHARE")]
    AccessShare,
    /// Locking reads (`SELECT ... FOR UPDATE/SHARE`)
    #[serde(rename = "ROW SHARE")]
    RowShare,
    /// Row modification (`INSERT`, `UPDATE`, `DELETE`, `MERGE`)
    #[serde(rename = "ROW EXCLUSIVE")]
    RowExclusive,
    /// Online maintenance (`VACUUM`, `ANALYZE`, `CREATE INDEX CONCURRENTLY`)
    #[serde(rename = "SHARE UPDATE EXCLUSIVE")]
    ShareUpdateExclusive,
    /// `CREATE INDEX`
    #[serde(rename = "SHARE")]
    Share,
    /// Triggers and foreign keys
    #[serde(rename = "SHARE ROW EXCLUSIVE")]
    ShareRowExclusive,
    /// `REFRESH MATERIALIZED VIEW CONCURRENTLY`
    #[serde(rename = "EXCLUSIVE")]
    Exclusive,
    /// Most DDL, `TRUNCATE`, `VACUUM FULL`
    #[serde(rename = "ACCESS EXCLUSIVE")]
    AccessExclusive,
}

use LockMode::*;

/// Every conflicting pair, each listed once regardless of orientation.
const CONFLICTING_PAIRS: &[(LockMode, LockMode)] = &[
    (AccessShare, AccessExclusive),
    (RowShare, Exclusive),
    (RowShare, AccessExclusive),
    (RowExclusive, ShareUpdateExclusive),
    (RowExclusive, Share),
    (RowExclusive, ShareRowExclusive),
    (RowExclusive, Exclusive),
    (RowExclusive, AccessExclusive),
    (ShareUpdateExclusive, ShareUpdateExclusive),
    (ShareUpdateExclusive, Share),
    (ShareUpdateExclusive, ShareRowExclusive),
    (ShareUpdateExclusive, Exclusive),
    (ShareUpdateExclusive, AccessExclusive),
    (Share, ShareRowExclusive),
    (Share, Exclusive),
    (Share, AccessExclusive),
    (ShareRowExclusive, ShareRowExclusive),
    (ShareRowExclusive, Exclusive),
    (ShareRowExclusive, AccessExclusive),
    (Exclusive, Exclusive),
    (Exclusive, AccessExclusive),
    (AccessExclusive, AccessExclusive),
];

impl LockMode {
    /// All modes in strength order
    pub const fn all() -> [LockMode; 8] {
        [
            AccessShare,
            RowShare,
            RowExclusive,
            ShareUpdateExclusive,
            Share,
            ShareRowExclusive,
            Exclusive,
            AccessExclusive,
        ]
    }

    /// Check whether a holder of `self` blocks a request for `other` on the same table
    pub fn conflicts_with(self, other: LockMode) -> bool {
        CONFLICTING_PAIRS
            .iter()
            .any(|&(a, b)| (a == self && b == other) || (a == other && b == self))
    }

    /// Modes that conflict with this one, weakest first
    pub fn conflict_set(self) -> Vec<LockMode> {
        Self::all()
            .into_iter()
            .filter(|other| self.conflicts_with(*other))
            .collect()
    }

    /// Whether two transactions can both hold this mode on one table
    pub fn is_self_conflicting(self) -> bool {
        self.conflicts_with(self)
    }

    /// PostgreSQL name of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            AccessShare => "ACCESS SHARE",
            RowShare => "ROW SHARE",
            RowExclusive => "ROW EXCLUSIVE",
            ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            Share => "SHARE",
            ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            Exclusive => "EXCLUSIVE",
            AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            AccessShare => {
                "Acquired by plain SELECT. Blocks only ACCESS EXCLUSIVE, so reads never wait on writers."
            }
            RowShare => {
                "Acquired by SELECT FOR UPDATE / FOR NO KEY UPDATE / FOR SHARE / FOR KEY SHARE. \
                 Blocks EXCLUSIVE and ACCESS EXCLUSIVE."
            }
            RowExclusive => {
                "Acquired by INSERT, UPDATE, DELETE, MERGE and COPY FROM. \
                 Conflicts with SHARE UPDATE EXCLUSIVE and stronger, so index builds wait for writers."
            }
            ShareUpdateExclusive => {
                "Acquired by VACUUM, ANALYZE, CREATE INDEX CONCURRENTLY and some ALTER TABLE forms. \
                 Guards against concurrent schema changes and maintenance; conflicts with itself."
            }
            Share => {
                "Acquired by CREATE INDEX (without CONCURRENTLY). \
                 Blocks all data modification on the table."
            }
            ShareRowExclusive => {
                "Acquired by CREATE TRIGGER and ALTER TABLE ADD FOREIGN KEY. \
                 Blocks data modification and conflicts with itself."
            }
            Exclusive => {
                "Acquired by REFRESH MATERIALIZED VIEW CONCURRENTLY. \
                 Only ACCESS SHARE readers may proceed."
            }
            AccessExclusive => {
                "Acquired by most ALTER TABLE forms, DROP, TRUNCATE, VACUUM FULL, CLUSTER \
                 and plain REFRESH MATERIALIZED VIEW. Blocks every other access, including SELECT."
            }
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = Error;

    /// Accepts the PostgreSQL spelling in any case, with or without a trailing `MODE`
    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<String> = s.split_whitespace().map(str::to_uppercase).collect();
        let words = match words.split_last() {
            Some((last, rest)) if last == "MODE" => rest,
            _ => &words[..],
        };
        let name = words.join(" ");

        Self::all()
            .into_iter()
            .find(|mode| mode.as_str() == name)
            .ok_or_else(|| Error::UnknownLockMode(s.trim().to_string()))
    }
}
