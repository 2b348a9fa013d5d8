//! Table extraction
//!
//! Walks a statement tree and collects every base table it reads or writes,
//! in first-discovery order and without duplicates. Names introduced by a
//! `WITH` clause are excluded.
//!
//! CTE exclusion is by bare name, without scope tracking: a CTE named `x`
//! hides a real table `x` anywhere in the same statement, and views are
//! reported as-is rather than resolved to their base tables.

use crate::parsing::{ParsedStatement, fold_ident, object_name};
use sqlparser::ast::{
    AlterTableOperation, Assignment, ColumnOption, ColumnOptionDef, CopySource, Expr, FromTable,
    Function, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint,
    JoinOperator, MergeAction, MergeInsertKind, ObjectName, ObjectType, OnConflictAction,
    OnInsert, Query, Select, SelectItem, SetExpr, Statement, TableConstraint, TableFactor,
    TableWithJoins, Values, Visit, Visitor,
};
use std::collections::HashSet;
use std::ops::ControlFlow;

/// Extract the tables of one parsed statement
pub fn extract_tables(statement: &ParsedStatement) -> Vec<String> {
    let mut extractor = TableExtractor::new();
    match statement {
        ParsedStatement::Sql {
            statement, with, ..
        } => {
            for query in with {
                extractor.with_query(&query.name, &query.body);
            }
            extractor.statement(statement);
        }
        ParsedStatement::Utility(utility) => {
            for table in utility.tables() {
                extractor.add_name(table);
            }
        }
    }
    extractor.finish()
}

/// Statement walker holding the discovered tables and the CTE names to exclude
#[derive(Debug, Default)]
pub struct TableExtractor {
    found: Vec<String>,
    seen: HashSet<String>,
    ctes: HashSet<String>,
}

impl TableExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovered tables minus CTE names, in discovery order
    pub fn finish(self) -> Vec<String> {
        let Self { found, ctes, .. } = self;
        found
            .into_iter()
            .filter(|table| !table.is_empty() && !ctes.contains(table))
            .collect()
    }

    fn add(&mut self, name: &ObjectName) {
        self.add_name(object_name(name));
    }

    fn add_name(&mut self, name: String) {
        if self.seen.insert(name.clone()) {
            self.found.push(name);
        }
    }

    pub fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Query(query) => self.query(query),
            Statement::Explain { statement, .. } => self.statement(statement),

            Statement::Insert(insert) => {
                self.add(&insert.table_name);
                if let Some(source) = &insert.source {
                    self.query(source);
                }
                match &insert.on {
                    Some(OnInsert::DuplicateKeyUpdate(assignments)) => self.assignments(assignments),
                    Some(OnInsert::OnConflict(conflict)) => match &conflict.action {
                        OnConflictAction::DoUpdate(update) => {
                            self.assignments(&update.assignments);
                            self.opt_expr(update.selection.as_ref());
                        }
                        OnConflictAction::DoNothing => {}
                    },
                    Some(other) => self.fallback(other),
                    None => {}
                }
                self.returning(insert.returning.as_deref());
            }
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                returning,
                ..
            } => {
                self.table_with_joins(table);
                if let Some(from) = from {
                    self.table_with_joins(from);
                }
                self.assignments(assignments);
                self.opt_expr(selection.as_ref());
                self.returning(returning.as_deref());
            }
            Statement::Delete(delete) => {
                for name in &delete.tables {
                    self.add(name);
                }
                match &delete.from {
                    FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => {
                        for table in from {
                            self.table_with_joins(table);
                        }
                    }
                }
                for table in delete.using.iter().flatten() {
                    self.table_with_joins(table);
                }
                self.opt_expr(delete.selection.as_ref());
                self.returning(delete.returning.as_deref());
                for order in &delete.order_by {
                    self.expr(&order.expr);
                }
                self.opt_expr(delete.limit.as_ref());
            }
            Statement::Merge {
                table,
                source,
                on,
                clauses,
                ..
            } => {
                self.table_factor(table);
                self.table_factor(source);
                self.expr(on);
                for clause in clauses {
                    self.opt_expr(clause.predicate.as_ref());
                    match &clause.action {
                        MergeAction::Insert(insert) => match &insert.kind {
                            MergeInsertKind::Values(values) => self.values(values),
                            MergeInsertKind::Row => {}
                        },
                        MergeAction::Update { assignments } => self.assignments(assignments),
                        MergeAction::Delete => {}
                    }
                }
            }
            Statement::Copy { source, .. } => match source {
                CopySource::Table { table_name, .. } => self.add(table_name),
                CopySource::Query(query) => self.query(query),
            },

            Statement::CreateTable(create) => {
                self.add(&create.name);
                for column in &create.columns {
                    self.column_options(&column.options);
                }
                for constraint in &create.constraints {
                    if let TableConstraint::ForeignKey { foreign_table, .. } = constraint {
                        self.add(foreign_table);
                    }
                }
                for source in create.like.iter().chain(create.clone.iter()) {
                    self.add(source);
                }
                if let Some(query) = &create.query {
                    self.query(query);
                }
            }
            Statement::CreateView { name, query, .. } => {
                self.add(name);
                self.query(query);
            }
            Statement::CreateIndex(index) => {
                self.add(&index.table_name);
                self.opt_expr(index.predicate.as_ref());
            }
            Statement::CreateTrigger {
                table_name,
                referenced_table_name,
                condition,
                ..
            } => {
                self.add(table_name);
                if let Some(referenced) = referenced_table_name {
                    self.add(referenced);
                }
                self.opt_expr(condition.as_ref());
            }
            Statement::AlterTable {
                name, operations, ..
            } => {
                self.add(name);
                for operation in operations {
                    match operation {
                        AlterTableOperation::AddConstraint(TableConstraint::ForeignKey {
                            foreign_table,
                            ..
                        }) => self.add(foreign_table),
                        AlterTableOperation::AddColumn { column_def, .. } => {
                            self.column_options(&column_def.options)
                        }
                        _ => {}
                    }
                }
            }

            Statement::Drop {
                object_type: ObjectType::Table | ObjectType::View | ObjectType::Index,
                names,
                ..
            } => {
                for name in names {
                    self.add(name);
                }
            }
            // Schemas, roles, sequences and types are not tables
            Statement::Drop { .. } => {}
            Statement::Truncate { table_names, .. } => {
                for target in table_names {
                    self.add(&target.name);
                }
            }
            Statement::Analyze { table_name, .. } => self.add(table_name),

            other => self.fallback(other),
        }
    }

    /// A named `WITH` query kept apart from its statement
    pub fn with_query(&mut self, name: &str, body: &Statement) {
        self.ctes.insert(name.to_string());
        self.statement(body);
    }

    pub fn query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                // Recorded before the body so a recursive CTE excludes itself
                self.ctes.insert(fold_ident(&cte.alias.name));
                self.query(&cte.query);
            }
        }

        self.set_expr(&query.body);

        if let Some(order_by) = &query.order_by {
            for order in &order_by.exprs {
                self.expr(&order.expr);
            }
        }
        self.opt_expr(query.limit.as_ref());
        for expr in &query.limit_by {
            self.expr(expr);
        }
        if let Some(offset) = &query.offset {
            self.expr(&offset.value);
        }
        if let Some(fetch) = &query.fetch {
            self.opt_expr(fetch.quantity.as_ref());
        }
    }

    pub fn set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.select(select),
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left);
                self.set_expr(right);
            }
            SetExpr::Values(values) => self.values(values),
            SetExpr::Insert(statement) | SetExpr::Update(statement) => self.statement(statement),
            // `TABLE name` keeps no quoting information; fold like an unquoted name
            SetExpr::Table(table) => {
                if let Some(name) = &table.table_name {
                    let name = match &table.schema_name {
                        Some(schema) => format!("{schema}.{name}"),
                        None => name.clone(),
                    };
                    self.add_name(name.to_lowercase());
                }
            }
        }
    }

    fn select(&mut self, select: &Select) {
        self.select_items(&select.projection);
        for table in &select.from {
            self.table_with_joins(table);
        }
        for view in &select.lateral_views {
            self.expr(&view.lateral_view);
        }
        self.opt_expr(select.prewhere.as_ref());
        self.opt_expr(select.selection.as_ref());
        match &select.group_by {
            GroupByExpr::Expressions(exprs, _) => self.exprs(exprs),
            GroupByExpr::All(_) => {}
        }
        self.exprs(&select.cluster_by);
        self.exprs(&select.distribute_by);
        self.exprs(&select.sort_by);
        self.opt_expr(select.having.as_ref());
        self.opt_expr(select.qualify.as_ref());
        if let Some(connect_by) = &select.connect_by {
            self.expr(&connect_by.condition);
            self.exprs(&connect_by.relationships);
        }
    }

    fn select_items(&mut self, items: &[SelectItem]) {
        for item in items {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr(expr)
                }
                SelectItem::QualifiedWildcard(..) | SelectItem::Wildcard(_) => {}
            }
        }
    }

    fn returning(&mut self, items: Option<&[SelectItem]>) {
        if let Some(items) = items {
            self.select_items(items);
        }
    }

    pub fn table_with_joins(&mut self, table: &TableWithJoins) {
        self.table_factor(&table.relation);
        for join in &table.joins {
            self.table_factor(&join.relation);
            match &join.join_operator {
                JoinOperator::Inner(constraint)
                | JoinOperator::LeftOuter(constraint)
                | JoinOperator::RightOuter(constraint)
                | JoinOperator::FullOuter(constraint)
                | JoinOperator::Semi(constraint)
                | JoinOperator::LeftSemi(constraint)
                | JoinOperator::RightSemi(constraint)
                | JoinOperator::Anti(constraint)
                | JoinOperator::LeftAnti(constraint)
                | JoinOperator::RightAnti(constraint) => self.join_constraint(constraint),
                JoinOperator::AsOf {
                    match_condition,
                    constraint,
                } => {
                    self.expr(match_condition);
                    self.join_constraint(constraint);
                }
                JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => {}
            }
        }
    }

    fn join_constraint(&mut self, constraint: &JoinConstraint) {
        match constraint {
            JoinConstraint::On(expr) => self.expr(expr),
            JoinConstraint::Using(_) | JoinConstraint::Natural | JoinConstraint::None => {}
        }
    }

    pub fn table_factor(&mut self, factor: &TableFactor) {
        match factor {
            // With arguments the name is a set-returning function, not a table
            TableFactor::Table {
                name, args: None, ..
            } => self.add(name),
            TableFactor::Table {
                args: Some(args), ..
            } => self.function_args(&args.args),
            TableFactor::Derived { subquery, .. } => self.query(subquery),
            TableFactor::TableFunction { expr, .. } => self.expr(expr),
            TableFactor::Function { args, .. } => self.function_args(args),
            TableFactor::UNNEST { array_exprs, .. } => self.exprs(array_exprs),
            TableFactor::JsonTable { json_expr, .. }
            | TableFactor::OpenJsonTable { json_expr, .. } => self.expr(json_expr),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins),
            TableFactor::Pivot { .. }
            | TableFactor::Unpivot { .. }
            | TableFactor::MatchRecognize { .. } => self.fallback(factor),
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            // Leaves
            Expr::Identifier(_)
            | Expr::CompoundIdentifier(_)
            | Expr::Value(_)
            | Expr::IntroducedString { .. }
            | Expr::TypedString { .. }
            | Expr::MatchAgainst { .. }
            | Expr::Wildcard(_)
            | Expr::QualifiedWildcard(..) => {}

            Expr::Subquery(query)
            | Expr::Exists {
                subquery: query, ..
            } => self.query(query),
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr);
                self.query(subquery);
            }

            Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsUnknown(inner)
            | Expr::IsNotUnknown(inner)
            | Expr::Nested(inner)
            | Expr::OuterJoin(inner)
            | Expr::Prior(inner)
            | Expr::JsonAccess { value: inner, .. }
            | Expr::CompositeAccess { expr: inner, .. }
            | Expr::UnaryOp { expr: inner, .. }
            | Expr::Cast { expr: inner, .. }
            | Expr::Extract { expr: inner, .. }
            | Expr::Ceil { expr: inner, .. }
            | Expr::Floor { expr: inner, .. }
            | Expr::Collate { expr: inner, .. }
            | Expr::Named { expr: inner, .. } => self.expr(inner),

            Expr::IsDistinctFrom(left, right)
            | Expr::IsNotDistinctFrom(left, right)
            | Expr::BinaryOp { left, right, .. }
            | Expr::AnyOp { left, right, .. }
            | Expr::AllOp { left, right, .. }
            | Expr::Like {
                expr: left,
                pattern: right,
                ..
            }
            | Expr::ILike {
                expr: left,
                pattern: right,
                ..
            }
            | Expr::SimilarTo {
                expr: left,
                pattern: right,
                ..
            }
            | Expr::RLike {
                expr: left,
                pattern: right,
                ..
            }
            | Expr::InUnnest {
                expr: left,
                array_expr: right,
                ..
            }
            | Expr::AtTimeZone {
                timestamp: left,
                time_zone: right,
            }
            | Expr::Position {
                expr: left,
                r#in: right,
            } => {
                self.expr(left);
                self.expr(right);
            }

            Expr::InList { expr, list, .. } => {
                self.expr(expr);
                self.exprs(list);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr);
                self.expr(low);
                self.expr(high);
            }
            Expr::Convert { expr, styles, .. } => {
                self.expr(expr);
                self.exprs(styles);
            }
            Expr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                self.expr(expr);
                self.opt_expr(substring_from.as_deref());
                self.opt_expr(substring_for.as_deref());
            }
            Expr::Trim {
                expr,
                trim_what,
                trim_characters,
                ..
            } => {
                self.expr(expr);
                self.opt_expr(trim_what.as_deref());
                if let Some(characters) = trim_characters {
                    self.exprs(characters);
                }
            }
            Expr::Overlay {
                expr,
                overlay_what,
                overlay_from,
                overlay_for,
            } => {
                self.expr(expr);
                self.expr(overlay_what);
                self.expr(overlay_from);
                self.opt_expr(overlay_for.as_deref());
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                self.opt_expr(operand.as_deref());
                self.exprs(conditions);
                self.exprs(results);
                self.opt_expr(else_result.as_deref());
            }
            Expr::Function(function) => self.function(function),
            Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
                for set in sets {
                    self.exprs(set);
                }
            }
            Expr::Tuple(exprs) | Expr::Struct { values: exprs, .. } => self.exprs(exprs),
            Expr::Array(array) => self.exprs(&array.elem),
            Expr::Interval(interval) => self.expr(&interval.value),

            Expr::MapAccess { .. }
            | Expr::Method(_)
            | Expr::Dictionary(_)
            | Expr::Map(_)
            | Expr::Subscript { .. }
            | Expr::Lambda(_) => self.fallback(expr),
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) {
        for expr in exprs {
            self.expr(expr);
        }
    }

    fn opt_expr(&mut self, expr: Option<&Expr>) {
        if let Some(expr) = expr {
            self.expr(expr);
        }
    }

    pub fn function(&mut self, function: &Function) {
        for arguments in [&function.parameters, &function.args] {
            match arguments {
                FunctionArguments::None => {}
                FunctionArguments::Subquery(query) => self.query(query),
                FunctionArguments::List(list) => {
                    self.function_args(&list.args);
                    if !list.clauses.is_empty() {
                        self.fallback(&list.clauses);
                    }
                }
            }
        }
        self.opt_expr(function.filter.as_deref());
        for order in &function.within_group {
            self.expr(&order.expr);
        }
        if let Some(over) = &function.over {
            self.fallback(over);
        }
    }

    fn function_args(&mut self, args: &[FunctionArg]) {
        for arg in args {
            let arg = match arg {
                FunctionArg::Named { arg, .. }
                | FunctionArg::ExprNamed { arg, .. }
                | FunctionArg::Unnamed(arg) => arg,
            };
            match arg {
                FunctionArgExpr::Expr(expr) => self.expr(expr),
                FunctionArgExpr::QualifiedWildcard(_) | FunctionArgExpr::Wildcard => {}
            }
        }
    }

    fn assignments(&mut self, assignments: &[Assignment]) {
        for assignment in assignments {
            self.expr(&assignment.value);
        }
    }

    fn values(&mut self, values: &Values) {
        for row in &values.rows {
            self.exprs(row);
        }
    }

    fn column_options(&mut self, options: &[ColumnOptionDef]) {
        for option in options {
            if let ColumnOption::ForeignKey { foreign_table, .. } = &option.option {
                self.add(foreign_table);
            }
        }
    }

    /// Walk a node without a dedicated arm through sqlparser's generic
    /// visitor. Relations outside any query are taken directly; each
    /// outermost nested query goes back through [`Self::query`] so CTE
    /// exclusion still applies.
    fn fallback<V: Visit>(&mut self, node: &V) {
        let mut nested = NestedNodes::default();
        let _ = node.visit(&mut nested);

        tracing::debug!(
            "Generic walk found {} relations and {} nested queries",
            nested.relations.len(),
            nested.queries.len()
        );

        for relation in &nested.relations {
            self.add(relation);
        }
        for query in &nested.queries {
            self.query(query);
        }
    }
}

/// Collects outermost queries and free-standing relations
#[derive(Default)]
struct NestedNodes {
    queries: Vec<Query>,
    relations: Vec<ObjectName>,
    depth: usize,
}

impl Visitor for NestedNodes {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.queries.push(query.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.relations.push(relation.clone());
        }
        ControlFlow::Continue(())
    }
}
