//! End-to-end lock inference for representative statements

mod common;

use proven_sql_locks::{Classification, Error, LockMode, TableRole};

#[test]
fn test_update_with_multiple_from_sources() {
    let sql = "UPDATE employees SET salary = salary * 1.05 \
               FROM departments, locations \
               WHERE employees.department_id = departments.id \
               AND departments.location_id = locations.id;";

    assert_tables!(sql, ["employees", "departments", "locations"]);
    assert_lock!(sql, "employees", LockMode::RowExclusive);
    assert_lock!(sql, "departments", LockMode::AccessShare);
    assert_lock!(sql, "locations", LockMode::AccessShare);

    let info = common::locks(sql);
    assert_eq!(info[0].role, TableRole::Primary);
    assert_eq!(info[1].role, TableRole::Referenced);
}

#[test]
fn test_truncate_locks_every_table() {
    let sql = "TRUNCATE logs, audit_trail;";

    assert_tables!(sql, ["logs", "audit_trail"]);
    assert_lock!(sql, "logs", LockMode::AccessExclusive);
    assert_lock!(sql, "audit_trail", LockMode::AccessExclusive);
}

#[test]
fn test_create_index_concurrently() {
    let sql = "CREATE INDEX CONCURRENTLY idx ON products(name);";

    assert_tables!(sql, ["products"]);
    assert_lock!(sql, "products", LockMode::ShareUpdateExclusive);
    assert!(LockMode::ShareUpdateExclusive.is_self_conflicting());
    assert_eq!(
        common::analyze(sql).classification(),
        Classification::CreateIndexConcurrently
    );
}

#[test]
fn test_update_conflicts_with_concurrent_index_build() {
    let result = common::compare(
        "UPDATE users SET active = true WHERE id = 1;",
        "CREATE INDEX CONCURRENTLY idx ON users(email);",
    );

    assert!(!result.is_compatible);
    assert!(result.compatible_tables.is_empty());
    assert_eq!(result.conflicting_tables.len(), 1);

    let conflict = &result.conflicting_tables[0];
    assert_eq!(conflict.table, "users");
    assert_eq!(conflict.lock_a, LockMode::RowExclusive);
    assert_eq!(conflict.lock_b, LockMode::ShareUpdateExclusive);
}

#[test]
fn test_disjoint_reads_are_compatible() {
    let result = common::compare(
        "SELECT * FROM orders JOIN customers ON customers.id = orders.customer_id",
        "SELECT * FROM products",
    );

    assert!(result.is_compatible);
    assert!(result.conflicting_tables.is_empty());
    assert!(result.compatible_tables.is_empty());
    assert_eq!(result.unique_tables.side_a_only, vec!["orders", "customers"]);
    assert_eq!(result.unique_tables.side_b_only, vec!["products"]);
}

#[test]
fn test_empty_input() {
    assert_invalid!("", Error::EmptyInput);

    let analysis = common::analyze("");
    assert!(analysis.tables().is_empty());
    assert_eq!(analysis.lock_info(), Err(Error::EmptyInput));
}

#[test]
fn test_foreign_key_locks_both_tables() {
    let sql = "ALTER TABLE orders ADD CONSTRAINT fk_customer \
               FOREIGN KEY (customer_id) REFERENCES customers (id)";

    assert_tables!(sql, ["orders", "customers"]);
    assert_lock!(sql, "orders", LockMode::ShareRowExclusive);
    assert_lock!(sql, "customers", LockMode::ShareRowExclusive);
}

#[test]
fn test_locking_reads() {
    let sql = "SELECT * FROM accounts a JOIN ledger l ON l.account_id = a.id FOR UPDATE";
    assert_lock!(sql, "accounts", LockMode::RowShare);
    assert_lock!(sql, "ledger", LockMode::RowShare);

    assert_eq!(
        common::analyze("SELECT * FROM accounts FOR NO KEY UPDATE").classification(),
        Classification::SelectForNoKeyUpdate
    );
}

#[test]
fn test_insert_select_reads_source() {
    let sql = "INSERT INTO archive SELECT * FROM orders WHERE placed_at < '2020-01-01'";

    assert_tables!(sql, ["archive", "orders"]);
    assert_lock!(sql, "archive", LockMode::RowExclusive);
    assert_lock!(sql, "orders", LockMode::AccessShare);
}

#[test]
fn test_maintenance_statements() {
    assert_lock!("VACUUM users", "users", LockMode::ShareUpdateExclusive);
    assert_lock!("VACUUM (FULL) users", "users", LockMode::AccessExclusive);
    assert_lock!("ANALYZE users", "users", LockMode::ShareUpdateExclusive);
    assert_lock!("CREATE INDEX i ON users (email)", "users", LockMode::Share);
    assert_lock!(
        "REFRESH MATERIALIZED VIEW sales_summary",
        "sales_summary",
        LockMode::AccessExclusive
    );
    assert_lock!(
        "REFRESH MATERIALIZED VIEW CONCURRENTLY sales_summary",
        "sales_summary",
        LockMode::Exclusive
    );
    assert_lock!("CLUSTER users USING users_pkey", "users", LockMode::AccessExclusive);
}

#[test]
fn test_explicit_lock_table() {
    let sql = "LOCK TABLE users, orders IN SHARE ROW EXCLUSIVE MODE";
    assert_lock!(sql, "users", LockMode::ShareRowExclusive);
    assert_lock!(sql, "orders", LockMode::ShareRowExclusive);

    assert_invalid!("LOCK TABLE users IN SORT OF SHARED MODE", Error::UnknownLockMode(_));
}

#[test]
fn test_detach_partition_concurrently() {
    let sql = "ALTER TABLE measurements DETACH PARTITION measurements_2023 CONCURRENTLY";

    assert_tables!(sql, ["measurements", "measurements_2023"]);
    assert_lock!(sql, "measurements", LockMode::ShareUpdateExclusive);
    assert_lock!(sql, "measurements_2023", LockMode::ShareUpdateExclusive);
}

#[test]
fn test_unrecognized_statement_is_reported() {
    assert_invalid!("CREATE SCHEMA reporting", Error::UnknownClassification(_));
}

#[test]
fn test_parse_error_message_is_surfaced() {
    let analysis = common::analyze("SELECT * FROM");
    match analysis.error() {
        Some(Error::UnparseableInput(message)) => assert!(!message.is_empty()),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_only_marker_names_the_real_table() {
    assert_tables!("UPDATE ONLY users SET active = false", ["users"]);
    assert_lock!("UPDATE ONLY users SET active = false", "users", LockMode::RowExclusive);
    assert_tables!("DELETE FROM ONLY sessions WHERE expired", ["sessions"]);
    assert_tables!("SELECT * FROM ONLY events e JOIN ONLY users * ON true", ["events", "users"]);
    assert_lock!("CREATE INDEX i ON ONLY users (email)", "users", LockMode::Share);

    let result = common::compare(
        "UPDATE ONLY users SET active = false",
        "CREATE INDEX i ON users (email)",
    );
    assert!(!result.is_compatible);
    assert_eq!(result.conflicting_tables[0].table, "users");
}

#[test]
fn test_writing_with_query_locks_its_target() {
    let sql = "WITH u AS (UPDATE users SET seen = now() RETURNING id) \
               SELECT * FROM u JOIN teams ON true";

    assert_tables!(sql, ["users", "teams"]);
    assert_lock!(sql, "users", LockMode::RowExclusive);
    assert_lock!(sql, "teams", LockMode::AccessShare);
    assert_eq!(common::analyze(sql).classification(), Classification::Update);

    let result = common::compare(sql, "CREATE INDEX i ON users (email)");
    assert!(!result.is_compatible);
}

#[test]
fn test_delete_with_a_with_list() {
    let sql = "WITH stale AS (SELECT id FROM sessions WHERE expires_at < now()) \
               DELETE FROM tokens WHERE session_id IN (SELECT id FROM stale)";

    assert_tables!(sql, ["sessions", "tokens"]);
    assert_lock!(sql, "tokens", LockMode::RowExclusive);
    assert_lock!(sql, "sessions", LockMode::AccessShare);

    let sql = "WITH gone AS (DELETE FROM jobs WHERE done RETURNING id) \
               INSERT INTO job_log SELECT id FROM gone";
    assert_tables!(sql, ["jobs", "job_log"]);
    assert_lock!(sql, "jobs", LockMode::RowExclusive);
    assert_lock!(sql, "job_log", LockMode::RowExclusive);
}

#[test]
fn test_locking_read_limited_to_locked_relations() {
    let sql = "SELECT * FROM accounts a JOIN ledger l ON l.account_id = a.id FOR UPDATE OF a";
    assert_lock!(sql, "accounts", LockMode::RowShare);
    assert_lock!(sql, "ledger", LockMode::AccessShare);

    let sql = "SELECT * FROM accounts WHERE id IN (SELECT account_id FROM ledger) FOR UPDATE";
    assert_lock!(sql, "accounts", LockMode::RowShare);
    assert_lock!(sql, "ledger", LockMode::AccessShare);

    let info = common::locks(sql);
    assert_eq!(info[0].role, TableRole::Primary);
    assert_eq!(info[1].role, TableRole::Referenced);
}

#[test]
fn test_distinct_from_inside_update_set() {
    let sql = "UPDATE flags SET changed = old_value IS DISTINCT FROM new_value, checked = true \
               WHERE id = 1";
    assert_tables!(sql, ["flags"]);
    assert_lock!(sql, "flags", LockMode::RowExclusive);

    let sql = "UPDATE flags SET changed = a IS NOT DISTINCT FROM b, n = 1 \
               FROM owners, teams WHERE flags.owner_id = owners.id";
    assert_tables!(sql, ["flags", "owners", "teams"]);
}

#[test]
fn test_foreign_key_targets_keep_their_lock() {
    let sql = "ALTER TABLE orders ADD CONSTRAINT fk_customer FOREIGN KEY (customer_id) \
               REFERENCES customers (id), ADD COLUMN note TEXT";
    assert_lock!(sql, "orders", LockMode::AccessExclusive);
    assert_lock!(sql, "customers", LockMode::ShareRowExclusive);

    let sql = "CREATE TABLE invoices (id INT, customer_id INT REFERENCES customers (id))";
    assert_lock!(sql, "invoices", LockMode::AccessExclusive);
    assert_lock!(sql, "customers", LockMode::ShareRowExclusive);

    let result = common::compare(sql, "UPDATE customers SET name = 'x' WHERE id = 1");
    assert!(!result.is_compatible);
}

#[test]
fn test_dual_primary_roles() {
    let info = common::locks(
        "ALTER TABLE orders ADD CONSTRAINT fk_customer \
         FOREIGN KEY (customer_id) REFERENCES customers (id)",
    );
    assert!(info.iter().all(|i| i.role == TableRole::Primary));
}
