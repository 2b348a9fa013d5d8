//! Adapter around the external SQL grammar
//!
//! Text goes through three stages before the analysis sees it:
//! 1. Tokenization with sqlparser's tokenizer, split at top-level semicolons.
//! 2. Utility-statement recognition for PostgreSQL commands the grammar has
//!    no rules for (`VACUUM`, `REINDEX`, `LOCK TABLE`, ...).
//! 3. A token rewrite for locking strengths, `ONLY` markers and
//!    `UPDATE ... FROM` lists, followed by the grammar itself. A `WITH` list
//!    holding `DELETE` is retried one query at a time.

pub mod handle;
mod shim;
pub mod utility;
mod with_list;

pub use handle::{GrammarEngine, InitStatus, ParserHandle};
pub use shim::LockStrength;
pub use utility::{AlterAction, ReindexTarget, UtilityStatement};
pub use with_list::WithQuery;

use sqlparser::ast::{Ident, ObjectName, Statement};
use sqlparser::tokenizer::{Token, TokenWithSpan};

/// One statement as handed to the analysis stages
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStatement {
    /// Parsed by the grammar. `lock_strengths` lists every locking clause in
    /// textual order with its real strength. `with` holds a leading `WITH`
    /// list the grammar could not attach to `statement`, and is empty
    /// otherwise.
    Sql {
        statement: Box<Statement>,
        lock_strengths: Vec<LockStrength>,
        with: Vec<WithQuery>,
    },
    /// Recognized at token level
    Utility(UtilityStatement),
}

/// Fold an identifier the way PostgreSQL does: unquoted names are
/// case-insensitive, quoted names are kept as written.
pub(crate) fn fold_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// Render a possibly qualified name as `schema.table`
pub(crate) fn object_name(name: &ObjectName) -> String {
    name.0.iter().map(fold_ident).collect::<Vec<_>>().join(".")
}

/// Uppercased text of an unquoted word, `None` for anything else
pub(crate) fn bare_word(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_uppercase()),
        _ => None,
    }
}

/// Positions of every token that is not whitespace or a comment
pub(crate) fn significant_indices(tokens: &[TokenWithSpan]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
        .map(|(i, _)| i)
        .collect()
}
