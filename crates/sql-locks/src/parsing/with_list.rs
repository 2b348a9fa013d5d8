//! `WITH` lists that hold or precede a `DELETE`
//!
//! The grammar accepts only `SELECT`, `INSERT` and `UPDATE` as the body of a
//! `WITH` query or after the list. A statement it rejects for that reason is
//! parsed again here one query at a time, with `DELETE` bodies handed to the
//! grammar's own `DELETE` rule.

use super::{bare_word, fold_ident, significant_indices};
use sqlparser::ast::Statement;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{IsOptional, Parser, ParserError};
use sqlparser::tokenizer::{Token, TokenWithSpan};

/// One named query of a `WITH` list kept beside its statement
#[derive(Debug, Clone, PartialEq)]
pub struct WithQuery {
    pub name: String,
    /// `Statement::Query` or `Statement::Delete`
    pub body: Statement,
}

/// Whether a failed parse of `tokens` is worth retrying here
pub(crate) fn holds_delete(tokens: &[TokenWithSpan]) -> bool {
    let significant = significant_indices(tokens);
    let mut words = significant.iter().map(|&i| bare_word(&tokens[i].token));
    words.next().flatten().as_deref() == Some("WITH")
        && words.any(|word| word.as_deref() == Some("DELETE"))
}

/// Parse `WITH <queries> <statement>`, returning the queries and the
/// statement separately
pub(crate) fn parse(parser: &mut Parser<'_>) -> Result<(Vec<WithQuery>, Statement), ParserError> {
    parser.expect_keyword(Keyword::WITH)?;
    parser.parse_keyword(Keyword::RECURSIVE);
    let queries = parser.parse_comma_separated(parse_query)?;
    let statement = parse_body(parser)?;

    parser.consume_token(&Token::SemiColon);
    let next = parser.peek_token();
    if next.token != Token::EOF {
        return parser.expected("end of statement", next);
    }
    Ok((queries, statement))
}

/// `name [(columns)] AS [[NOT] MATERIALIZED] (body)`
fn parse_query(parser: &mut Parser<'_>) -> Result<WithQuery, ParserError> {
    let name = parser.parse_identifier(false)?;
    parser.parse_parenthesized_column_list(IsOptional::Optional, false)?;
    parser.expect_keyword(Keyword::AS)?;
    if !parser.parse_keyword(Keyword::MATERIALIZED) {
        parser.parse_keywords(&[Keyword::NOT, Keyword::MATERIALIZED]);
    }

    parser.expect_token(&Token::LParen)?;
    let body = parse_body(parser)?;
    parser.expect_token(&Token::RParen)?;

    Ok(WithQuery {
        name: fold_ident(&name),
        body,
    })
}

fn parse_body(parser: &mut Parser<'_>) -> Result<Statement, ParserError> {
    if parser.parse_keyword(Keyword::DELETE) {
        parser.parse_delete()
    } else {
        parser.parse_query().map(Statement::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::tokenizer::Tokenizer;

    fn tokens(sql: &str) -> Vec<TokenWithSpan> {
        Tokenizer::new(&PostgreSqlDialect {}, sql)
            .tokenize_with_location()
            .unwrap()
    }

    fn run(sql: &str) -> Result<(Vec<WithQuery>, Statement), ParserError> {
        let dialect = PostgreSqlDialect {};
        let mut parser = Parser::new(&dialect).with_tokens_with_locations(tokens(sql));
        parse(&mut parser)
    }

    #[test]
    fn test_holds_delete() {
        assert!(holds_delete(&tokens("WITH s AS (SELECT 1) DELETE FROM t")));
        assert!(holds_delete(&tokens(
            "with d as (delete from t returning id) select * from d"
        )));
        assert!(!holds_delete(&tokens("DELETE FROM t")));
        assert!(!holds_delete(&tokens("WITH s AS (SELECT 1) SELECT * FROM s")));
    }

    #[test]
    fn test_delete_after_with_list() {
        let (queries, statement) = run(
            "WITH stale AS (SELECT id FROM sessions) \
             DELETE FROM tokens WHERE id IN (SELECT id FROM stale);",
        )
        .unwrap();

        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].name, "stale");
        assert!(matches!(queries[0].body, Statement::Query(_)));
        assert!(matches!(statement, Statement::Delete(_)));
    }

    #[test]
    fn test_delete_inside_with_list() {
        let (queries, statement) = run(
            "WITH Gone AS MATERIALIZED (DELETE FROM jobs WHERE done RETURNING id), \
             kept (id) AS (SELECT id FROM jobs) \
             INSERT INTO job_log SELECT id FROM gone",
        )
        .unwrap();

        let names: Vec<_> = queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["gone", "kept"]);
        assert!(matches!(queries[0].body, Statement::Delete(_)));
        assert!(matches!(statement, Statement::Query(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(run("WITH s AS (SELECT 1) DELETE FROM t WHERE a = 1 garbage").is_err());
    }
}
