//! Command classification
//!
//! Maps a parsed statement to one [`Classification`]. Every classification
//! carries its lock mode and role policy in exhaustive tables, so a new
//! variant cannot be added without deciding both.

use crate::lock::LockMode;
use crate::parsing::{
    AlterAction, LockStrength, ParsedStatement, ReindexTarget, UtilityStatement, fold_ident,
    object_name,
};
use serde::{Serialize, Serializer};
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CopySource, FromTable, LockClause, LockType,
    ObjectType, OnInsert, Query, SetExpr, Statement, TableConstraint, TableFactor,
    TableWithJoins,
};
use std::fmt;

/// Fine-grained statement kinds that differ in the locks they take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Select,
    SelectForUpdate,
    SelectForNoKeyUpdate,
    SelectForShare,
    SelectForKeyShare,
    Insert,
    InsertOnConflict,
    Update,
    Delete,
    Merge,
    CopyFrom,
    CopyTo,
    CreateTable,
    CreateTableAs,
    CreateView,
    CreateMaterializedView,
    CreateIndex,
    CreateIndexConcurrently,
    CreateTrigger,
    DropTable,
    DropView,
    DropIndex,
    Truncate,
    Vacuum,
    VacuumFull,
    Analyze,
    RefreshMaterializedView,
    RefreshMaterializedViewConcurrently,
    Reindex,
    ReindexConcurrently,
    Cluster,
    /// `LOCK TABLE ... IN <mode> MODE`
    LockTable(LockMode),
    AlterTableAddColumn,
    AlterTableAddForeignKey,
    AlterTableValidateConstraint,
    AlterTableAttachPartition,
    AlterTableDetachPartition,
    AlterTableDetachPartitionConcurrently,
    AlterTableSetTablespace,
    AlterTableDisableTrigger,
    AlterTableEnableTrigger,
    AlterTableOther,
    /// Parsed, but no lock policy is defined for it
    Unrecognized,
}

/// How a classification's lock mode is spread over the extracted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RolePolicy {
    /// One primary table takes the mode, the rest are read
    Single,
    /// Every table takes the mode. A locking read narrows this to the
    /// relations its locking clauses cover.
    All,
    /// The primary and one associated table take the mode, the rest are read
    Dual,
}

impl Classification {
    /// Table lock mode taken on the primary table(s)
    pub fn lock_mode(self) -> Option<LockMode> {
        use Classification::*;
        let mode = match self {
            Select | CopyTo => LockMode::AccessShare,
            SelectForUpdate | SelectForNoKeyUpdate | SelectForShare | SelectForKeyShare => {
                LockMode::RowShare
            }
            Insert | InsertOnConflict | Update | Delete | Merge | CopyFrom => LockMode::RowExclusive,
            CreateIndexConcurrently
            | Vacuum
            | Analyze
            | ReindexConcurrently
            | AlterTableValidateConstraint
            | AlterTableAttachPartition
            | AlterTableDetachPartitionConcurrently => LockMode::ShareUpdateExclusive,
            CreateIndex | Reindex => LockMode::Share,
            CreateTrigger
            | AlterTableAddForeignKey
            | AlterTableDisableTrigger
            | AlterTableEnableTrigger => LockMode::ShareRowExclusive,
            RefreshMaterializedViewConcurrently => LockMode::Exclusive,
            CreateTable
            | CreateTableAs
            | CreateView
            | CreateMaterializedView
            | DropTable
            | DropView
            | DropIndex
            | Truncate
            | VacuumFull
            | RefreshMaterializedView
            | Cluster
            | AlterTableAddColumn
            | AlterTableDetachPartition
            | AlterTableSetTablespace
            | AlterTableOther => LockMode::AccessExclusive,
            LockTable(mode) => mode,
            Unrecognized => return None,
        };
        Some(mode)
    }

    pub fn policy(self) -> Option<RolePolicy> {
        use Classification::*;
        let policy = match self {
            SelectForUpdate | SelectForNoKeyUpdate | SelectForShare | SelectForKeyShare => {
                RolePolicy::All
            }
            DropTable | DropView | DropIndex | Truncate | Vacuum | VacuumFull | Analyze => {
                RolePolicy::All
            }
            LockTable(_) => RolePolicy::All,
            AlterTableAddForeignKey
            | AlterTableAttachPartition
            | AlterTableDetachPartition
            | AlterTableDetachPartitionConcurrently => RolePolicy::Dual,
            Select
            | Insert
            | InsertOnConflict
            | Update
            | Delete
            | Merge
            | CopyFrom
            | CopyTo
            | CreateTable
            | CreateTableAs
            | CreateView
            | CreateMaterializedView
            | CreateIndex
            | CreateIndexConcurrently
            | CreateTrigger
            | RefreshMaterializedView
            | RefreshMaterializedViewConcurrently
            | Reindex
            | ReindexConcurrently
            | Cluster
            | AlterTableAddColumn
            | AlterTableValidateConstraint
            | AlterTableSetTablespace
            | AlterTableDisableTrigger
            | AlterTableEnableTrigger
            | AlterTableOther => RolePolicy::Single,
            Unrecognized => return None,
        };
        Some(policy)
    }

    /// Whether the statement writes rows of its primary table
    fn modifies_rows(self) -> bool {
        use Classification::*;
        matches!(self, Insert | InsertOnConflict | Update | Delete | Merge)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Classification::*;
        let name = match self {
            Select => "SELECT",
            SelectForUpdate => "SELECT FOR UPDATE",
            SelectForNoKeyUpdate => "SELECT FOR NO KEY UPDATE",
            SelectForShare => "SELECT FOR SHARE",
            SelectForKeyShare => "SELECT FOR KEY SHARE",
            Insert => "INSERT",
            InsertOnConflict => "INSERT ON CONFLICT",
            Update => "UPDATE",
            Delete => "DELETE",
            Merge => "MERGE",
            CopyFrom => "COPY FROM",
            CopyTo => "COPY TO",
            CreateTable => "CREATE TABLE",
            CreateTableAs => "CREATE TABLE AS",
            CreateView => "CREATE VIEW",
            CreateMaterializedView => "CREATE MATERIALIZED VIEW",
            CreateIndex => "CREATE INDEX",
            CreateIndexConcurrently => "CREATE INDEX CONCURRENTLY",
            CreateTrigger => "CREATE TRIGGER",
            DropTable => "DROP TABLE",
            DropView => "DROP VIEW",
            DropIndex => "DROP INDEX",
            Truncate => "TRUNCATE",
            Vacuum => "VACUUM",
            VacuumFull => "VACUUM FULL",
            Analyze => "ANALYZE",
            RefreshMaterializedView => "REFRESH MATERIALIZED VIEW",
            RefreshMaterializedViewConcurrently => "REFRESH MATERIALIZED VIEW CONCURRENTLY",
            Reindex => "REINDEX",
            ReindexConcurrently => "REINDEX CONCURRENTLY",
            Cluster => "CLUSTER",
            LockTable(mode) => return write!(f, "LOCK TABLE IN {} MODE", mode),
            AlterTableAddColumn => "ALTER TABLE ADD COLUMN",
            AlterTableAddForeignKey => "ALTER TABLE ADD FOREIGN KEY",
            AlterTableValidateConstraint => "ALTER TABLE VALIDATE CONSTRAINT",
            AlterTableAttachPartition => "ALTER TABLE ATTACH PARTITION",
            AlterTableDetachPartition => "ALTER TABLE DETACH PARTITION",
            AlterTableDetachPartitionConcurrently => "ALTER TABLE DETACH PARTITION CONCURRENTLY",
            AlterTableSetTablespace => "ALTER TABLE SET TABLESPACE",
            AlterTableDisableTrigger => "ALTER TABLE DISABLE TRIGGER",
            AlterTableEnableTrigger => "ALTER TABLE ENABLE TRIGGER",
            AlterTableOther => "ALTER TABLE",
            Unrecognized => "UNRECOGNIZED",
        };
        f.write_str(name)
    }
}

impl Serialize for Classification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Classifier output: the classification plus the tables the statement
/// names explicitly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub classification: Classification,
    /// Explicit target (`UPDATE t`, `CREATE INDEX ... ON t`)
    pub primary: Option<String>,
    /// Second table of a dual-primary statement
    pub secondary: Option<String>,
    /// Tables written by data-modifying `WITH` queries, other than `primary`
    pub modified: Vec<String>,
    /// Relations a locking read's clauses cover; `None` leaves every table
    /// to the role policy
    pub locked: Option<Vec<String>>,
    /// Tables named by `REFERENCES` clauses
    pub fk_references: Vec<String>,
    /// Leading keywords of the statement, used in error messages
    pub kind: String,
}

impl Classified {
    pub fn new(classification: Classification) -> Self {
        Self {
            classification,
            primary: None,
            secondary: None,
            modified: Vec::new(),
            locked: None,
            fk_references: Vec::new(),
            kind: classification.to_string(),
        }
    }

    fn primary(mut self, table: Option<String>) -> Self {
        self.primary = table;
        self
    }

    fn secondary(mut self, table: Option<String>) -> Self {
        self.secondary = table;
        self
    }

    fn fk_references(mut self, tables: Vec<String>) -> Self {
        self.fk_references = tables;
        self
    }
}

/// Classify one parsed statement. Never fails; shapes without a lock policy
/// come back as [`Classification::Unrecognized`].
pub fn classify(statement: &ParsedStatement) -> Classified {
    match statement {
        ParsedStatement::Sql {
            statement,
            lock_strengths,
            with,
        } => absorb_with_writes(
            classify_sql(statement, lock_strengths),
            with.iter().map(|query| classify_sql(&query.body, &[])),
        ),
        ParsedStatement::Utility(utility) => classify_utility(utility),
    }
}

fn classify_sql(statement: &Statement, strengths: &[LockStrength]) -> Classified {
    use Classification as C;
    match statement {
        Statement::Query(query) => classify_query(query, strengths),
        Statement::Explain { statement, .. } => classify_sql(statement, strengths),

        Statement::Insert(insert) => {
            let classification = match &insert.on {
                Some(OnInsert::OnConflict(_) | OnInsert::DuplicateKeyUpdate(_)) => {
                    C::InsertOnConflict
                }
                _ => C::Insert,
            };
            Classified::new(classification).primary(Some(object_name(&insert.table_name)))
        }
        Statement::Update { table, .. } => {
            Classified::new(C::Update).primary(relation_name(&table.relation))
        }
        Statement::Delete(delete) => {
            let target = match delete.tables.first() {
                Some(name) => Some(object_name(name)),
                None => match &delete.from {
                    FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => {
                        from.first().and_then(|t| relation_name(&t.relation))
                    }
                },
            };
            Classified::new(C::Delete).primary(target)
        }
        Statement::Merge { table, .. } => Classified::new(C::Merge).primary(relation_name(table)),
        Statement::Copy { source, to, .. } => {
            let classification = if *to { C::CopyTo } else { C::CopyFrom };
            let target = match source {
                CopySource::Table { table_name, .. } => Some(object_name(table_name)),
                CopySource::Query(_) => None,
            };
            Classified::new(classification).primary(target)
        }

        Statement::CreateTable(create) => {
            let classification = if create.query.is_some() {
                C::CreateTableAs
            } else {
                C::CreateTable
            };
            let mut references: Vec<_> =
                create.columns.iter().flat_map(column_references).collect();
            references.extend(create.constraints.iter().filter_map(constraint_reference));
            Classified::new(classification)
                .primary(Some(object_name(&create.name)))
                .fk_references(references)
        }
        Statement::CreateView {
            materialized, name, ..
        } => {
            let classification = if *materialized {
                C::CreateMaterializedView
            } else {
                C::CreateView
            };
            Classified::new(classification).primary(Some(object_name(name)))
        }
        Statement::CreateIndex(index) => {
            let classification = if index.concurrently {
                C::CreateIndexConcurrently
            } else {
                C::CreateIndex
            };
            Classified::new(classification).primary(Some(object_name(&index.table_name)))
        }
        Statement::CreateTrigger { table_name, .. } => {
            Classified::new(C::CreateTrigger).primary(Some(object_name(table_name)))
        }

        Statement::Drop { object_type, .. } => match object_type {
            ObjectType::Table => Classified::new(C::DropTable),
            ObjectType::View => Classified::new(C::DropView),
            ObjectType::Index => Classified::new(C::DropIndex),
            _ => unrecognized(statement),
        },
        Statement::Truncate { .. } => Classified::new(C::Truncate),
        Statement::Analyze { .. } => Classified::new(C::Analyze),

        Statement::AlterTable {
            name, operations, ..
        } => {
            let (classification, secondary) = strongest_alter_operation(operations);
            let references = operations
                .iter()
                .flat_map(|operation| match operation {
                    AlterTableOperation::AddConstraint(constraint) => {
                        constraint_reference(constraint).into_iter().collect()
                    }
                    AlterTableOperation::AddColumn { column_def, .. } => {
                        column_references(column_def)
                    }
                    _ => Vec::new(),
                })
                .collect();
            Classified::new(classification)
                .primary(Some(object_name(name)))
                .secondary(secondary)
                .fk_references(references)
        }

        _ => unrecognized(statement),
    }
}

/// Plain and locking reads, plus data-modifying statements under a `WITH`.
///
/// A `WITH` query that writes makes its target a written table too. When the
/// outer statement is a plain read, the first such query decides the
/// classification.
fn classify_query(query: &Query, strengths: &[LockStrength]) -> Classified {
    let classified = match query.body.as_ref() {
        SetExpr::Insert(statement) | SetExpr::Update(statement) => {
            classify_sql(statement, strengths)
        }
        _ => classify_read(query, strengths),
    };

    match &query.with {
        Some(with) => absorb_with_writes(
            classified,
            with.cte_tables
                .iter()
                .map(|cte| classify_query(&cte.query, &[])),
        ),
        None => classified,
    }
}

/// Fold the classifications of a statement's `WITH` queries into its own
fn absorb_with_writes(
    mut classified: Classified,
    queries: impl Iterator<Item = Classified>,
) -> Classified {
    for inner in queries {
        if !inner.classification.modifies_rows() {
            continue;
        }
        if classified.classification == Classification::Select {
            classified = inner;
        } else {
            classified.modified.extend(inner.primary);
            classified.modified.extend(inner.modified);
        }
    }
    classified
}

fn classify_read(query: &Query, strengths: &[LockStrength]) -> Classified {
    let Some((level, locks)) = locking_level(query) else {
        return Classified::new(Classification::Select);
    };

    // The outermost locking clauses are the last ones in the text
    let recorded = strengths
        .len()
        .checked_sub(locks.len())
        .and_then(|start| strengths[start..].iter().max().copied());
    let strength = recorded.unwrap_or_else(|| {
        if locks.iter().any(|lock| lock.lock_type == LockType::Update) {
            LockStrength::Update
        } else {
            LockStrength::Share
        }
    });

    let mut classified = Classified::new(match strength {
        LockStrength::Update => Classification::SelectForUpdate,
        LockStrength::NoKeyUpdate => Classification::SelectForNoKeyUpdate,
        LockStrength::Share => Classification::SelectForShare,
        LockStrength::KeyShare => Classification::SelectForKeyShare,
    });
    classified.locked = locked_relations(level, locks);
    classified
}

/// The outermost query carrying locking clauses, looking through redundant
/// parentheses
fn locking_level(query: &Query) -> Option<(&Query, &[LockClause])> {
    if !query.locks.is_empty() {
        return Some((query, query.locks.as_slice()));
    }
    match query.body.as_ref() {
        SetExpr::Query(inner) => locking_level(inner),
        _ => None,
    }
}

/// Tables whose rows the locking clauses cover: the `FROM` items of the
/// locked query, or only those named by `OF`. Subqueries in `FROM` count
/// with every table they read from; subqueries elsewhere are not locked.
fn locked_relations(level: &Query, locks: &[LockClause]) -> Option<Vec<String>> {
    let SetExpr::Select(select) = level.body.as_ref() else {
        return None;
    };
    let mut bindings = Vec::new();
    from_bindings(&select.from, &mut bindings);

    let mut locked = Vec::new();
    for lock in locks {
        match &lock.of {
            None => locked.extend(bindings.iter().map(|(_, table)| table.clone())),
            Some(name) => {
                let wanted = object_name(name);
                locked.extend(
                    bindings
                        .iter()
                        .filter(|(binding, table)| *binding == wanted || *table == wanted)
                        .map(|(_, table)| table.clone()),
                );
            }
        }
    }
    Some(locked)
}

/// `(name visible to OF, table)` for every relation in a `FROM` list
fn from_bindings(from: &[TableWithJoins], out: &mut Vec<(String, String)>) {
    for item in from {
        factor_bindings(&item.relation, out);
        for join in &item.joins {
            factor_bindings(&join.relation, out);
        }
    }
}

fn factor_bindings(factor: &TableFactor, out: &mut Vec<(String, String)>) {
    match factor {
        TableFactor::Table {
            name,
            alias,
            args: None,
            ..
        } => {
            let binding = match alias {
                Some(alias) => fold_ident(&alias.name),
                None => name.0.last().map(fold_ident).unwrap_or_default(),
            };
            out.push((binding, object_name(name)));
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let binding = alias
                .as_ref()
                .map(|alias| fold_ident(&alias.name))
                .unwrap_or_default();
            let mut inner = Vec::new();
            query_bindings(subquery, &mut inner);
            out.extend(inner.into_iter().map(|(_, table)| (binding.clone(), table)));
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => from_bindings(std::slice::from_ref(table_with_joins.as_ref()), out),
        _ => {}
    }
}

fn query_bindings(query: &Query, out: &mut Vec<(String, String)>) {
    match query.body.as_ref() {
        SetExpr::Select(select) => from_bindings(&select.from, out),
        SetExpr::Query(inner) => query_bindings(inner, out),
        _ => {}
    }
}

/// Several `ALTER TABLE` actions take the strongest action's lock; ties go
/// to the first listed.
fn strongest_alter_operation(operations: &[AlterTableOperation]) -> (Classification, Option<String>) {
    let mut strongest: Option<(Classification, Option<String>)> = None;
    for operation in operations {
        let candidate = classify_alter_operation(operation);
        let stronger = match &strongest {
            Some((current, _)) => candidate.0.lock_mode() > current.lock_mode(),
            None => true,
        };
        if stronger {
            strongest = Some(candidate);
        }
    }
    strongest.unwrap_or((Classification::AlterTableOther, None))
}

fn classify_alter_operation(operation: &AlterTableOperation) -> (Classification, Option<String>) {
    match operation {
        AlterTableOperation::AddColumn { .. } => (Classification::AlterTableAddColumn, None),
        AlterTableOperation::AddConstraint(TableConstraint::ForeignKey {
            foreign_table, ..
        }) => (
            Classification::AlterTableAddForeignKey,
            Some(object_name(foreign_table)),
        ),
        AlterTableOperation::DisableTrigger { .. } => {
            (Classification::AlterTableDisableTrigger, None)
        }
        AlterTableOperation::EnableTrigger { .. }
        | AlterTableOperation::EnableAlwaysTrigger { .. }
        | AlterTableOperation::EnableReplicaTrigger { .. } => {
            (Classification::AlterTableEnableTrigger, None)
        }
        _ => (Classification::AlterTableOther, None),
    }
}

/// Table named by a `FOREIGN KEY ... REFERENCES` constraint
fn constraint_reference(constraint: &TableConstraint) -> Option<String> {
    match constraint {
        TableConstraint::ForeignKey { foreign_table, .. } => Some(object_name(foreign_table)),
        _ => None,
    }
}

/// Tables named by inline `REFERENCES` options of a column
fn column_references(column: &ColumnDef) -> Vec<String> {
    column
        .options
        .iter()
        .filter_map(|option| match &option.option {
            ColumnOption::ForeignKey { foreign_table, .. } => Some(object_name(foreign_table)),
            _ => None,
        })
        .collect()
}

fn classify_utility(statement: &UtilityStatement) -> Classified {
    use Classification as C;
    match statement {
        UtilityStatement::Vacuum { full, .. } => {
            Classified::new(if *full { C::VacuumFull } else { C::Vacuum })
        }
        UtilityStatement::Analyze { .. } => Classified::new(C::Analyze),
        UtilityStatement::RefreshMaterializedView { concurrently, view } => {
            let classification = if *concurrently {
                C::RefreshMaterializedViewConcurrently
            } else {
                C::RefreshMaterializedView
            };
            Classified::new(classification).primary(Some(view.clone()))
        }
        UtilityStatement::Reindex {
            target,
            concurrently,
            name,
        } => {
            let classification = if *concurrently {
                C::ReindexConcurrently
            } else {
                C::Reindex
            };
            let primary = match target {
                ReindexTarget::Index | ReindexTarget::Table => name.clone(),
                ReindexTarget::Schema | ReindexTarget::Database | ReindexTarget::System => None,
            };
            Classified::new(classification).primary(primary)
        }
        UtilityStatement::Cluster { table } => Classified::new(C::Cluster).primary(table.clone()),
        UtilityStatement::LockTable { mode, .. } => Classified::new(C::LockTable(*mode)),
        UtilityStatement::AlterTable { table, action } => {
            let (classification, secondary) = match action {
                AlterAction::ValidateConstraint => (C::AlterTableValidateConstraint, None),
                AlterAction::AttachPartition { partition } => {
                    (C::AlterTableAttachPartition, Some(partition.clone()))
                }
                AlterAction::DetachPartition {
                    partition,
                    concurrently: false,
                } => (C::AlterTableDetachPartition, Some(partition.clone())),
                AlterAction::DetachPartition {
                    partition,
                    concurrently: true,
                } => (C::AlterTableDetachPartitionConcurrently, Some(partition.clone())),
                AlterAction::SetTablespace => (C::AlterTableSetTablespace, None),
            };
            Classified::new(classification)
                .primary(Some(table.clone()))
                .secondary(secondary)
        }
    }
}

fn unrecognized(statement: &Statement) -> Classified {
    let kind = statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    Classified {
        kind,
        ..Classified::new(Classification::Unrecognized)
    }
}

/// Name of a plain table reference
fn relation_name(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, args: None, .. } => Some(object_name(name)),
        _ => None,
    }
}
