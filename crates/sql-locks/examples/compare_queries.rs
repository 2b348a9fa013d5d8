//! Analyze two statements and show where their table locks collide
//!
//! Run with `RUST_LOG=debug` to see the analyzer's own logging.

use proven_sql_locks::{LockAnalyzer, compare};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const MIGRATION: &str = "ALTER TABLE orders ADD CONSTRAINT fk_customer \
                         FOREIGN KEY (customer_id) REFERENCES customers (id)";

const WORKLOAD: &str = "UPDATE orders SET status = 'shipped' \
                        FROM customers, regions \
                        WHERE orders.customer_id = customers.id \
                        AND customers.region_id = regions.id";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let analyzer = LockAnalyzer::new();
    let migration = analyzer.analyze(MIGRATION);
    let workload = analyzer.analyze(WORKLOAD);

    for (label, analysis) in [("A", &migration), ("B", &workload)] {
        println!("=== Side {label}: {} ===", analysis.classification());
        for info in analysis.lock_info()? {
            println!("  {:<12} {:<24} {:?}", info.table, info.lock_mode, info.role);
        }
        println!();
    }

    let result = compare(&migration, &workload);
    println!("{}", result.summary());
    for conflict in &result.conflicting_tables {
        println!("  {}: {}", conflict.table, conflict.reason);
    }

    println!("\n{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
