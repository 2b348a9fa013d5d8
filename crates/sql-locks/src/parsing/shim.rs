//! Token rewrites that let the pinned grammar accept PostgreSQL-only syntax
//!
//! The grammar knows `FOR UPDATE` and `FOR SHARE` only, accepts a single
//! `FROM` item after `UPDATE ... SET`, and reads the inheritance marker in
//! `FROM ONLY t` as a table called `only`. These gaps are closed here, before
//! the tokens reach the parser, without changing which tables a statement
//! names.

use super::{bare_word, significant_indices};
use serde::Serialize;
use sqlparser::tokenizer::{Token, TokenWithSpan, Whitespace};
use std::collections::HashSet;

/// Row-locking strength of a `FOR ...` clause, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LockStrength {
    KeyShare,
    Share,
    NoKeyUpdate,
    Update,
}

/// Tokens ready for the grammar plus what the rewrite had to erase
pub(crate) struct Rewritten {
    pub tokens: Vec<TokenWithSpan>,
    pub lock_strengths: Vec<LockStrength>,
    pub changed: bool,
}

pub(crate) fn rewrite(tokens: Vec<TokenWithSpan>) -> Rewritten {
    let before = tokens.len();
    let tokens = strip_only_markers(tokens);
    let (tokens, lock_strengths) = rewrite_locking_clauses(tokens);
    let (tokens, joined) = rewrite_update_from_lists(tokens);

    Rewritten {
        changed: joined > 0 || tokens.len() != before,
        tokens,
        lock_strengths,
    }
}

/// Record every locking clause and fold `NO KEY UPDATE` / `KEY SHARE` into
/// the spellings the grammar accepts.
fn rewrite_locking_clauses(tokens: Vec<TokenWithSpan>) -> (Vec<TokenWithSpan>, Vec<LockStrength>) {
    let significant = significant_indices(&tokens);
    let word_at = |pos: usize| {
        significant
            .get(pos)
            .and_then(|&i| bare_word(&tokens[i].token))
    };

    let mut erased = HashSet::new();
    let mut strengths = Vec::new();

    for pos in 0..significant.len() {
        if word_at(pos).as_deref() != Some("FOR") {
            continue;
        }
        let next = [word_at(pos + 1), word_at(pos + 2), word_at(pos + 3)];
        match [next[0].as_deref(), next[1].as_deref(), next[2].as_deref()] {
            [Some("UPDATE"), ..] => strengths.push(LockStrength::Update),
            [Some("SHARE"), ..] => strengths.push(LockStrength::Share),
            [Some("NO"), Some("KEY"), Some("UPDATE")] => {
                strengths.push(LockStrength::NoKeyUpdate);
                erased.insert(significant[pos + 1]);
                erased.insert(significant[pos + 2]);
            }
            [Some("KEY"), Some("SHARE"), _] => {
                strengths.push(LockStrength::KeyShare);
                erased.insert(significant[pos + 1]);
            }
            _ => {}
        }
    }

    (erase(tokens, &erased), strengths)
}

/// Drop `ONLY` (and a `*` after the name) where it marks a relation:
/// `UPDATE ONLY t`, `FROM ONLY t *`, `JOIN ONLY t`, `USING ONLY t` and
/// `CREATE INDEX ... ON ONLY t`.
///
/// `ALTER TABLE ONLY` and `TRUNCATE ONLY` are left alone; the grammar knows them.
fn strip_only_markers(tokens: Vec<TokenWithSpan>) -> Vec<TokenWithSpan> {
    let significant = significant_indices(&tokens);
    let token_at = |pos: usize| significant.get(pos).map(|&i| &tokens[i].token);
    let word_at = |pos: usize| token_at(pos).and_then(bare_word);

    let mut erased = HashSet::new();
    for pos in 1..significant.len() {
        if word_at(pos).as_deref() != Some("ONLY")
            || !matches!(
                word_at(pos - 1).as_deref(),
                Some("UPDATE" | "FROM" | "JOIN" | "USING" | "ON")
            )
            || !matches!(token_at(pos + 1), Some(Token::Word(_)))
        {
            continue;
        }
        erased.insert(significant[pos]);

        // Skip over a possibly qualified name to find a trailing `*`
        let mut end = pos + 1;
        while matches!(token_at(end + 1), Some(Token::Period))
            && matches!(token_at(end + 2), Some(Token::Word(_)))
        {
            end += 2;
        }
        if matches!(token_at(end + 1), Some(Token::Mul)) {
            erased.insert(significant[end + 1]);
        }
    }

    erase(tokens, &erased)
}

/// Remove the tokens at `erased`, each with the whitespace that follows it
fn erase(tokens: Vec<TokenWithSpan>, erased: &HashSet<usize>) -> Vec<TokenWithSpan> {
    if erased.is_empty() {
        return tokens;
    }

    let mut kept = Vec::with_capacity(tokens.len());
    let mut skip_space = false;
    for (i, token) in tokens.into_iter().enumerate() {
        if erased.contains(&i) {
            skip_space = true;
            continue;
        }
        if skip_space && matches!(token.token, Token::Whitespace(_)) {
            skip_space = false;
            continue;
        }
        skip_space = false;
        kept.push(token);
    }
    kept
}

/// Turn `UPDATE t SET ... FROM a, b` into `... FROM a CROSS JOIN b`.
///
/// Only commas at the nesting depth of the `UPDATE` itself, between its
/// `FROM` and the next `WHERE`/`RETURNING`, are replaced. The `FROM` of
/// `IS [NOT] DISTINCT FROM` inside `SET` does not open the list.
fn rewrite_update_from_lists(tokens: Vec<TokenWithSpan>) -> (Vec<TokenWithSpan>, usize) {
    let significant = significant_indices(&tokens);

    let mut depths = Vec::with_capacity(significant.len());
    let mut depth = 0usize;
    for &i in &significant {
        depths.push(depth);
        match tokens[i].token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    let mut commas = HashSet::new();
    for pos in 0..significant.len() {
        if bare_word(&tokens[significant[pos]].token).as_deref() != Some("UPDATE") {
            continue;
        }
        let starts_statement = pos == 0
            || matches!(
                tokens[significant[pos - 1]].token,
                Token::LParen | Token::RParen
            );
        if !starts_statement {
            continue;
        }

        let level = depths[pos];
        let mut in_from = false;
        for cursor in pos + 1..significant.len() {
            if depths[cursor] < level {
                break;
            }
            if depths[cursor] > level {
                continue;
            }
            let token = &tokens[significant[cursor]].token;
            let after_distinct =
                bare_word(&tokens[significant[cursor - 1]].token).as_deref() == Some("DISTINCT");
            match bare_word(token).as_deref() {
                Some("FROM") if !in_from && !after_distinct => in_from = true,
                Some("WHERE" | "RETURNING") if in_from => break,
                _ if in_from && *token == Token::Comma => {
                    commas.insert(significant[cursor]);
                }
                _ => {}
            }
        }
    }

    if commas.is_empty() {
        return (tokens, 0);
    }

    let joined = commas.len();
    let mut out = Vec::with_capacity(tokens.len() + joined * 3);
    for (i, token) in tokens.into_iter().enumerate() {
        if commas.contains(&i) {
            let span = token.span;
            out.push(TokenWithSpan::new(Token::Whitespace(Whitespace::Space), span));
            out.push(TokenWithSpan::new(Token::make_keyword("CROSS"), span));
            out.push(TokenWithSpan::new(Token::Whitespace(Whitespace::Space), span));
            out.push(TokenWithSpan::new(Token::make_keyword("JOIN"), span));
        } else {
            out.push(token);
        }
    }
    (out, joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::tokenizer::Tokenizer;

    fn run(sql: &str) -> (String, Vec<LockStrength>, bool) {
        let tokens = Tokenizer::new(&PostgreSqlDialect {}, sql)
            .tokenize_with_location()
            .unwrap();
        let rewritten = rewrite(tokens);
        let text = rewritten
            .tokens
            .iter()
            .map(|t| t.token.to_string())
            .collect::<String>();
        (text, rewritten.lock_strengths, rewritten.changed)
    }

    #[test]
    fn test_plain_statement_untouched() {
        let (text, strengths, changed) = run("SELECT * FROM t WHERE a = 1");
        assert_eq!(text, "SELECT * FROM t WHERE a = 1");
        assert!(strengths.is_empty());
        assert!(!changed);
    }

    #[test]
    fn test_locking_strengths_recorded_in_order() {
        let (text, strengths, changed) =
            run("SELECT * FROM a, b FOR KEY SHARE OF a FOR NO KEY UPDATE OF b");
        assert_eq!(text, "SELECT * FROM a, b FOR SHARE OF a FOR UPDATE OF b");
        assert_eq!(strengths, vec![LockStrength::KeyShare, LockStrength::NoKeyUpdate]);
        assert!(changed);
    }

    #[test]
    fn test_native_strengths_recorded_without_rewrite() {
        let (text, strengths, changed) = run("select * from t for update");
        assert_eq!(text, "select * from t for update");
        assert_eq!(strengths, vec![LockStrength::Update]);
        assert!(!changed);
    }

    #[test]
    fn test_update_from_list_becomes_cross_join() {
        let (text, _, changed) =
            run("UPDATE e SET x = 1, y = f(2, 3) FROM d, l WHERE e.a IN (1, 2)");
        assert_eq!(
            text,
            "UPDATE e SET x = 1, y = f(2, 3) FROM d CROSS JOIN l WHERE e.a IN (1, 2)"
        );
        assert!(changed);
    }

    #[test]
    fn test_nested_update_in_cte() {
        let (text, _, _) =
            run("WITH u AS (UPDATE t SET a = 1 FROM x, y RETURNING t.id) SELECT * FROM u, v");
        assert_eq!(
            text,
            "WITH u AS (UPDATE t SET a = 1 FROM x CROSS JOIN y RETURNING t.id) SELECT * FROM u, v"
        );
    }

    #[test]
    fn test_distinct_from_in_set_is_not_a_from_list() {
        let sql = "UPDATE t SET flag = x IS DISTINCT FROM y, z = 1 WHERE id = 1";
        let (text, _, changed) = run(sql);
        assert_eq!(text, sql);
        assert!(!changed);

        let (text, _, _) =
            run("UPDATE t SET f = x IS NOT DISTINCT FROM y, z = 1 FROM a, b WHERE t.id = a.id");
        assert_eq!(
            text,
            "UPDATE t SET f = x IS NOT DISTINCT FROM y, z = 1 FROM a CROSS JOIN b WHERE t.id = a.id"
        );
    }

    #[test]
    fn test_only_markers_are_dropped() {
        let cases = [
            ("UPDATE ONLY t SET a = 1", "UPDATE t SET a = 1"),
            ("DELETE FROM ONLY s.t WHERE a = 1", "DELETE FROM s.t WHERE a = 1"),
            (
                "SELECT * FROM ONLY a JOIN ONLY b * ON a.id = b.id",
                "SELECT * FROM a JOIN b ON a.id = b.id",
            ),
            ("CREATE INDEX i ON ONLY t (a)", "CREATE INDEX i ON t (a)"),
        ];
        for (sql, expected) in cases {
            let (text, _, changed) = run(sql);
            assert_eq!(text, expected);
            assert!(changed);
        }
    }

    #[test]
    fn test_only_kept_where_grammar_handles_it() {
        for sql in [
            "ALTER TABLE ONLY t ADD COLUMN c INT",
            "TRUNCATE ONLY t",
            "SELECT * FROM a JOIN b ON only.x = b.x",
        ] {
            let (text, _, changed) = run(sql);
            assert_eq!(text, sql);
            assert!(!changed);
        }
    }

    #[test]
    fn test_on_conflict_update_is_not_rewritten() {
        let sql = "INSERT INTO t VALUES (1, 2) ON CONFLICT (a) DO UPDATE SET b = 2, c = 3";
        let (text, _, changed) = run(sql);
        assert_eq!(text, sql);
        assert!(!changed);
    }
}
