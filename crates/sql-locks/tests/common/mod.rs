//! Common test utilities for lock analysis integration tests
#![allow(dead_code)]

use proven_sql_locks::{AnalyzedQuery, ComparisonResult, LockAnalyzer, LockMode, TableLockInfo};

/// Analyze one statement with the shared parser
pub fn analyze(sql: &str) -> AnalyzedQuery {
    LockAnalyzer::new().analyze(sql)
}

/// Analyze and compare two statements
pub fn compare(a: &str, b: &str) -> ComparisonResult {
    proven_sql_locks::compare_sql(a, b)
}

/// Lock information for a statement that must analyze cleanly
pub fn locks(sql: &str) -> Vec<TableLockInfo> {
    let analysis = analyze(sql);
    match analysis.lock_info() {
        Ok(info) => info,
        Err(e) => panic!("Analysis of '{}' failed: {}", sql, e),
    }
}

/// Lock mode assigned to `table` by `sql`
pub fn lock_of(sql: &str, table: &str) -> LockMode {
    locks(sql)
        .into_iter()
        .find(|info| info.table == table)
        .map(|info| info.lock_mode)
        .unwrap_or_else(|| panic!("Table '{}' not found in '{}'", table, sql))
}

/// Table names a statement touches, in discovery order
pub fn tables(sql: &str) -> Vec<String> {
    analyze(sql).tables().to_vec()
}

#[macro_export]
macro_rules! assert_tables {
    ($sql:expr, [$($table:expr),* $(,)?]) => {
        let expected: Vec<String> = vec![$($table.to_string()),*];
        assert_eq!(
            common::tables($sql),
            expected,
            "Tables of '{}' don't match",
            $sql
        );
    };
}

#[macro_export]
macro_rules! assert_lock {
    ($sql:expr, $table:expr, $mode:expr) => {
        assert_eq!(
            common::lock_of($sql, $table),
            $mode,
            "Lock on '{}' in '{}' doesn't match",
            $table,
            $sql
        );
    };
}

#[macro_export]
macro_rules! assert_invalid {
    ($sql:expr, $error:pat) => {
        let analysis = common::analyze($sql);
        assert!(!analysis.is_valid(), "'{}' should not analyze", $sql);
        assert!(
            matches!(analysis.error(), Some($error)),
            "Unexpected error for '{}': {:?}",
            $sql,
            analysis.error()
        );
    };
}

/// Statements covering every role policy, used by property tests
pub mod corpus {
    pub const STATEMENTS: &[&str] = &[
        "SELECT * FROM users u JOIN orders o ON o.user_id = u.id",
        "SELECT * FROM accounts WHERE id = 1 FOR UPDATE",
        "SELECT * FROM accounts a, ledger l WHERE a.id = l.account_id FOR SHARE",
        "INSERT INTO events (kind) SELECT kind FROM staging",
        "INSERT INTO counters (id, n) VALUES (1, 1) ON CONFLICT (id) DO UPDATE SET n = counters.n + 1",
        "UPDATE users SET active = true WHERE id = 1",
        "DELETE FROM sessions USING users WHERE sessions.user_id = users.id",
        "MERGE INTO inventory i USING shipments s ON i.sku = s.sku WHEN MATCHED THEN UPDATE SET qty = i.qty + s.qty",
        "CREATE INDEX idx_users_email ON users (email)",
        "CREATE INDEX CONCURRENTLY idx_users_name ON users (name)",
        "CREATE TABLE archive AS SELECT * FROM orders",
        "ALTER TABLE orders ADD CONSTRAINT fk_user FOREIGN KEY (user_id) REFERENCES users (id)",
        "ALTER TABLE orders ADD COLUMN note TEXT",
        "ALTER TABLE measurements ATTACH PARTITION measurements_2024 FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')",
        "TRUNCATE logs, audit_trail",
        "DROP TABLE old_orders",
        "VACUUM users",
        "VACUUM FULL users",
        "ANALYZE users",
        "REFRESH MATERIALIZED VIEW CONCURRENTLY sales_summary",
        "REINDEX TABLE users",
        "CLUSTER users USING users_pkey",
        "LOCK TABLE users, orders IN SHARE ROW EXCLUSIVE MODE",
        "COPY users FROM STDIN;",
        "WITH recent AS (SELECT * FROM orders WHERE placed_at > now() - interval '1 day') SELECT * FROM recent JOIN users ON users.id = recent.user_id",
        "UPDATE ONLY users SET active = false WHERE id = 1",
        "SELECT * FROM accounts a JOIN ledger l ON l.account_id = a.id FOR UPDATE OF a",
        "WITH moved AS (UPDATE orders SET state = 'moved' RETURNING id) SELECT * FROM moved JOIN users ON true",
        "WITH stale AS (SELECT id FROM sessions) DELETE FROM tokens WHERE session_id IN (SELECT id FROM stale)",
        "CREATE TABLE invoices (id INT, customer_id INT REFERENCES customers (id))",
    ];
}
