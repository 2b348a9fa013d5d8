//! Token-level recognizer for PostgreSQL utility commands
//!
//! sqlparser has no grammar for these, so they are matched directly on the
//! tokenizer output. A statement that starts like a utility command but does
//! not match completely is left for the grammar, which then reports the
//! parse error.

use super::{bare_word, significant_indices};
use crate::error::Result;
use crate::lock::LockMode;
use serde::Serialize;
use sqlparser::tokenizer::{Token, TokenWithSpan};

/// A recognized utility statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UtilityStatement {
    Vacuum { full: bool, tables: Vec<String> },
    Analyze { tables: Vec<String> },
    RefreshMaterializedView { concurrently: bool, view: String },
    Reindex {
        target: ReindexTarget,
        concurrently: bool,
        name: Option<String>,
    },
    /// `table` is `None` for a bare `CLUSTER`, which reclusters every
    /// previously clustered table.
    Cluster { table: Option<String> },
    LockTable { tables: Vec<String>, mode: LockMode },
    AlterTable { table: String, action: AlterAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReindexTarget {
    Index,
    Table,
    Schema,
    Database,
    System,
}

/// `ALTER TABLE` actions the grammar cannot parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlterAction {
    ValidateConstraint,
    AttachPartition { partition: String },
    /// `concurrently` also covers `FINALIZE`, which completes a concurrent detach
    DetachPartition { partition: String, concurrently: bool },
    SetTablespace,
}

impl UtilityStatement {
    /// Relations named by the statement, in textual order.
    ///
    /// An index name stands in for its table (`REINDEX INDEX`, old-style
    /// `CLUSTER index ON table` names the table instead).
    pub fn tables(&self) -> Vec<String> {
        match self {
            UtilityStatement::Vacuum { tables, .. }
            | UtilityStatement::Analyze { tables }
            | UtilityStatement::LockTable { tables, .. } => tables.clone(),
            UtilityStatement::RefreshMaterializedView { view, .. } => vec![view.clone()],
            UtilityStatement::Reindex {
                target: ReindexTarget::Index | ReindexTarget::Table,
                name: Some(name),
                ..
            } => vec![name.clone()],
            UtilityStatement::Reindex { .. } => Vec::new(),
            UtilityStatement::Cluster { table } => table.iter().cloned().collect(),
            UtilityStatement::AlterTable { table, action } => match action {
                AlterAction::AttachPartition { partition }
                | AlterAction::DetachPartition { partition, .. } => {
                    vec![table.clone(), partition.clone()]
                }
                AlterAction::ValidateConstraint | AlterAction::SetTablespace => {
                    vec![table.clone()]
                }
            },
        }
    }
}

/// Try to recognize one statement's tokens. A trailing semicolon is ignored.
///
/// Returns `Ok(None)` when the tokens are not a utility command. The only
/// error is a `LOCK TABLE` naming a mode that does not exist.
pub fn recognize(tokens: &[TokenWithSpan]) -> Result<Option<UtilityStatement>> {
    let mut cursor = Cursor::new(tokens);

    let statement = match cursor.next_word().as_deref() {
        Some("VACUUM") => vacuum(&mut cursor),
        Some("ANALYZE" | "ANALYSE") => analyze(&mut cursor),
        Some("REFRESH") => refresh(&mut cursor),
        Some("REINDEX") => reindex(&mut cursor),
        Some("CLUSTER") => cluster(&mut cursor),
        Some("LOCK") => lock_table(&mut cursor)?,
        Some("ALTER") => alter_table(&mut cursor),
        _ => None,
    };

    Ok(statement.filter(|_| cursor.is_done()))
}

fn vacuum(c: &mut Cursor) -> Option<UtilityStatement> {
    let mut full = false;
    if let Some(options) = c.parenthesized() {
        full = option_enabled(&options, "FULL");
    } else {
        while let Some(word) = c.peek_word() {
            match word.as_str() {
                "FULL" => full = true,
                "FREEZE" | "VERBOSE" | "ANALYZE" | "ANALYSE" => {}
                _ => break,
            }
            c.advance();
        }
    }
    let tables = c.name_list()?;
    Some(UtilityStatement::Vacuum { full, tables })
}

fn analyze(c: &mut Cursor) -> Option<UtilityStatement> {
    if c.parenthesized().is_none() {
        c.eat("VERBOSE");
    }
    let tables = c.name_list()?;
    Some(UtilityStatement::Analyze { tables })
}

fn refresh(c: &mut Cursor) -> Option<UtilityStatement> {
    if !(c.eat("MATERIALIZED") && c.eat("VIEW")) {
        return None;
    }
    let concurrently = c.eat("CONCURRENTLY");
    let view = c.name()?;
    if c.eat("WITH") {
        c.eat("NO");
        if !c.eat("DATA") {
            return None;
        }
    }
    Some(UtilityStatement::RefreshMaterializedView { concurrently, view })
}

fn reindex(c: &mut Cursor) -> Option<UtilityStatement> {
    c.parenthesized();
    let target = match c.next_word()?.as_str() {
        "INDEX" => ReindexTarget::Index,
        "TABLE" => ReindexTarget::Table,
        "SCHEMA" => ReindexTarget::Schema,
        "DATABASE" => ReindexTarget::Database,
        "SYSTEM" => ReindexTarget::System,
        _ => return None,
    };
    let concurrently = c.eat("CONCURRENTLY");
    let name = match target {
        ReindexTarget::Database | ReindexTarget::System if c.is_done() => None,
        _ => Some(c.name()?),
    };
    Some(UtilityStatement::Reindex {
        target,
        concurrently,
        name,
    })
}

fn cluster(c: &mut Cursor) -> Option<UtilityStatement> {
    if c.parenthesized().is_none() {
        c.eat("VERBOSE");
    }
    if c.is_done() {
        return Some(UtilityStatement::Cluster { table: None });
    }
    let first = c.name()?;
    let table = if c.eat("ON") {
        c.name()?
    } else {
        if c.eat("USING") {
            c.name()?;
        }
        first
    };
    Some(UtilityStatement::Cluster { table: Some(table) })
}

fn lock_table(c: &mut Cursor) -> Result<Option<UtilityStatement>> {
    // MySQL's LOCK TABLES has its own grammar rule
    if c.peek_word().as_deref() == Some("TABLES") {
        return Ok(None);
    }
    c.eat("TABLE");

    let mut tables = Vec::new();
    loop {
        c.eat("ONLY");
        let Some(name) = c.name() else {
            return Ok(None);
        };
        tables.push(name);
        c.eat_token(&Token::Mul);
        if !c.eat_token(&Token::Comma) {
            break;
        }
    }

    let mut mode = LockMode::AccessExclusive;
    if c.eat("IN") {
        let mut words = Vec::new();
        loop {
            match c.next_word() {
                Some(word) if word == "MODE" => break,
                Some(word) => words.push(word),
                None => return Ok(None),
            }
        }
        mode = words.join(" ").parse()?;
    }
    c.eat("NOWAIT");

    Ok(Some(UtilityStatement::LockTable { tables, mode }))
}

fn alter_table(c: &mut Cursor) -> Option<UtilityStatement> {
    if !c.eat("TABLE") {
        return None;
    }
    if c.eat("IF") && !c.eat("EXISTS") {
        return None;
    }
    c.eat("ONLY");
    let table = c.name()?;
    c.eat_token(&Token::Mul);

    let action = match c.next_word()?.as_str() {
        "VALIDATE" if c.eat("CONSTRAINT") => {
            c.name()?;
            AlterAction::ValidateConstraint
        }
        "ATTACH" if c.eat("PARTITION") => {
            let partition = c.name()?;
            // FOR VALUES ... | DEFAULT
            c.skip_rest();
            AlterAction::AttachPartition { partition }
        }
        "DETACH" if c.eat("PARTITION") => {
            let partition = c.name()?;
            let concurrently = c.eat("CONCURRENTLY") || c.eat("FINALIZE");
            AlterAction::DetachPartition {
                partition,
                concurrently,
            }
        }
        "SET" if c.eat("TABLESPACE") => {
            c.name()?;
            c.eat("NOWAIT");
            AlterAction::SetTablespace
        }
        _ => return None,
    };

    Some(UtilityStatement::AlterTable { table, action })
}

/// Whether a parenthesized option list turns `name` on.
/// `FULL`, `FULL true` and `FULL on` enable; `FULL false`, `FULL off` and `FULL 0` do not.
fn option_enabled(options: &[Vec<String>], name: &str) -> bool {
    options.iter().any(|option| match option.as_slice() {
        [first] => first == name,
        [first, value] => first == name && !matches!(value.as_str(), "FALSE" | "OFF" | "0"),
        _ => false,
    })
}

/// Walks the significant tokens of one statement
struct Cursor<'a> {
    tokens: Vec<&'a Token>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [TokenWithSpan]) -> Self {
        let tokens = significant_indices(tokens)
            .into_iter()
            .map(|i| &tokens[i].token)
            .filter(|token| **token != Token::SemiColon)
            .collect();
        Self { tokens, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn peek_word(&self) -> Option<String> {
        self.peek().and_then(bare_word)
    }

    fn next_word(&mut self) -> Option<String> {
        let word = self.peek_word()?;
        self.advance();
        Some(word)
    }

    /// Consume the next token if it is the unquoted word `word`
    fn eat(&mut self, word: &str) -> bool {
        if self.peek_word().as_deref() == Some(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_token(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_rest(&mut self) {
        self.pos = self.tokens.len();
    }

    /// A possibly qualified relation name, folded to PostgreSQL case rules
    fn name(&mut self) -> Option<String> {
        let mut parts = vec![self.ident()?];
        while self.peek() == Some(&Token::Period) {
            self.advance();
            parts.push(self.ident()?);
        }
        Some(parts.join("."))
    }

    fn ident(&mut self) -> Option<String> {
        let Some(Token::Word(word)) = self.peek() else {
            return None;
        };
        self.advance();
        Some(match word.quote_style {
            Some(_) => word.value.clone(),
            None => word.value.to_lowercase(),
        })
    }

    /// Zero or more comma-separated names, each with an optional column list.
    /// `None` if a comma is not followed by a name.
    fn name_list(&mut self) -> Option<Vec<String>> {
        let mut names = Vec::new();
        if self.is_done() {
            return Some(names);
        }
        loop {
            names.push(self.name()?);
            self.parenthesized();
            if !self.eat_token(&Token::Comma) {
                return Some(names);
            }
        }
    }

    /// Consume a balanced `( ... )` group and return its top-level
    /// comma-separated entries as uppercased token texts.
    fn parenthesized(&mut self) -> Option<Vec<Vec<String>>> {
        if self.peek() != Some(&Token::LParen) {
            return None;
        }
        self.advance();

        let mut entries = vec![Vec::new()];
        let mut depth = 1usize;
        while let Some(token) = self.peek() {
            self.advance();
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(entries);
                    }
                }
                Token::Comma if depth == 1 => {
                    entries.push(Vec::new());
                    continue;
                }
                _ => {}
            }
            if let Some(entry) = entries.last_mut() {
                entry.push(token.to_string().to_uppercase());
            }
        }
        // Unbalanced; leave the cursor at the end so the statement is rejected
        None
    }
}
