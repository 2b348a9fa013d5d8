//! Laws that hold for every statement the analyzer accepts

mod common;

use common::corpus::STATEMENTS;
use proven_sql_locks::{LockAnalyzer, LockMode, compare};

#[test]
fn test_cte_aliases_are_never_tables() {
    let cases = [
        (
            "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent",
            "recent",
        ),
        (
            "WITH a AS (SELECT * FROM t), b AS (SELECT * FROM a JOIN u ON a.id = u.id) SELECT * FROM b",
            "b",
        ),
        (
            "WITH RECURSIVE tree AS (SELECT id FROM nodes UNION ALL SELECT n.id FROM nodes n JOIN tree ON n.parent = tree.id) SELECT * FROM tree",
            "tree",
        ),
        (
            "WITH moved AS (SELECT id FROM staging) UPDATE items SET state = 1 WHERE id IN (SELECT id FROM moved)",
            "moved",
        ),
    ];

    for (sql, alias) in cases {
        let tables = common::tables(sql);
        assert!(!tables.is_empty(), "'{}' found no tables", sql);
        assert!(
            !tables.iter().any(|t| t == alias),
            "CTE alias '{}' reported as a table in '{}'",
            alias,
            sql
        );
    }

    assert_tables!(
        "WITH a AS (SELECT * FROM t), b AS (SELECT * FROM a JOIN u ON a.id = u.id) SELECT * FROM b",
        ["t", "u"]
    );
}

#[test]
fn test_cte_alias_shadows_base_table_of_same_name() {
    // Exclusion is by name only: the outer `orders` is a real table, but a
    // nested WITH defines the same name
    assert_tables!(
        "SELECT * FROM (WITH orders AS (SELECT * FROM staging) SELECT * FROM orders) s \
         JOIN orders ON true JOIN users ON true",
        ["staging", "users"]
    );
}

#[test]
fn test_analysis_is_deterministic() {
    let analyzer = LockAnalyzer::new();
    for sql in STATEMENTS {
        let first = analyzer.analyze(sql);
        assert!(first.is_valid(), "'{}' failed: {:?}", sql, first.error());
        for _ in 0..5 {
            assert_eq!(analyzer.analyze(sql), first, "'{}' changed between runs", sql);
        }
    }
}

#[test]
fn test_self_comparison_matches_self_conflict() {
    let analyzer = LockAnalyzer::new();
    for sql in STATEMENTS {
        let analysis = analyzer.analyze(sql);
        let result = compare(&analysis, &analysis);

        assert!(result.unique_tables.side_a_only.is_empty());
        assert!(result.unique_tables.side_b_only.is_empty());

        for info in analysis.lock_info().unwrap() {
            let conflicting = result
                .conflicting_tables
                .iter()
                .any(|t| t.table == info.table);
            assert_eq!(
                conflicting,
                info.lock_mode.is_self_conflicting(),
                "'{}' on '{}' in '{}'",
                info.lock_mode,
                info.table,
                sql
            );
        }
    }
}

#[test]
fn test_self_conflicting_modes() {
    let self_conflicting: Vec<_> = LockMode::all()
        .into_iter()
        .filter(|m| m.is_self_conflicting())
        .collect();

    assert_eq!(
        self_conflicting,
        vec![
            LockMode::ShareUpdateExclusive,
            LockMode::ShareRowExclusive,
            LockMode::Exclusive,
            LockMode::AccessExclusive
        ]
    );
}

#[test]
fn test_comparison_is_symmetric() {
    let analyzer = LockAnalyzer::new();
    let analyses: Vec<_> = STATEMENTS.iter().map(|sql| analyzer.analyze(sql)).collect();

    for a in &analyses {
        for b in &analyses {
            let forward = compare(a, b);
            let backward = compare(b, a);

            assert_eq!(forward.is_compatible, backward.is_compatible);
            assert_eq!(
                forward.conflicting_tables.len(),
                backward.conflicting_tables.len()
            );
            assert_eq!(
                forward.unique_tables.side_a_only,
                backward.unique_tables.side_b_only
            );
        }
    }
}

#[test]
fn test_every_table_gets_a_lock() {
    let analyzer = LockAnalyzer::new();
    for sql in STATEMENTS {
        let analysis = analyzer.analyze(sql);
        let info = analysis.lock_info().unwrap();
        let locked: Vec<_> = info.iter().map(|i| i.table.clone()).collect();
        assert_eq!(locked, analysis.tables(), "'{}'", sql);
    }
}

#[test]
fn test_invalid_side_is_never_compatible() {
    let analyzer = LockAnalyzer::new();
    let invalid = analyzer.analyze("SELEC nonsense");
    for sql in STATEMENTS {
        let valid = analyzer.analyze(sql);
        assert!(!compare(&valid, &invalid).is_compatible);
        assert!(!compare(&invalid, &valid).is_compatible);
    }
}
