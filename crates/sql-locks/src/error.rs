//! Error types for lock analysis

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an analysis could not produce lock information.
///
/// None of these are fatal. The analyzer folds them into an invalid
/// [`AnalyzedQuery`](crate::AnalyzedQuery) instead of returning them across
/// its boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("No SQL statement to analyze")]
    EmptyInput,

    /// The grammar rejected the text; the message is the parser's own.
    #[error("{0}")]
    UnparseableInput(String),

    #[error("No tables found in statement")]
    NoTablesFound,

    #[error("No lock mode is defined for statement: {0}")]
    UnknownClassification(String),

    #[error("SQL parser unavailable: {0}")]
    ParserUnavailable(String),

    #[error("Unknown lock mode: {0}")]
    UnknownLockMode(String),
}

impl From<sqlparser::parser::ParserError> for Error {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        Error::UnparseableInput(e.to_string())
    }
}

impl From<sqlparser::tokenizer::TokenizerError> for Error {
    fn from(e: sqlparser::tokenizer::TokenizerError) -> Self {
        Error::UnparseableInput(e.to_string())
    }
}

impl serde::Serialize for Error {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
