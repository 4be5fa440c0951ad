//! Basic cardinality metrics for a database.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_postgres::Client;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connect::connect;
use crate::error::{MigrateError, Result};

const SCHEMA_COUNT_SQL: &str = "SELECT count(*) FROM information_schema.schemata";

const TABLE_COUNT_SQL: &str = "SELECT count(*) FROM information_schema.tables \
     WHERE table_schema NOT IN ('information_schema', 'pg_catalog')";

// reltuples is -1 for tables that were never vacuumed or analyzed
const APPROX_ROWS_SQL: &str = "SELECT COALESCE(SUM(GREATEST(reltuples, 0)), 0)::bigint \
     FROM pg_class WHERE relkind = 'r'";

/// Database size summary. `approximate_rows` comes from planner statistics
/// and is an estimate, never an exact count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    pub schemas: u64,
    pub tables: u64,
    pub approximate_rows: u64,
}

impl fmt::Display for DbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} schemas, {} tables, ~{} rows (estimated)",
            self.schemas,
            self.tables,
            group_thousands(self.approximate_rows)
        )
    }
}

/// Collect [`DbStats`] from `conn`.
pub async fn get_stats(conn: &ConnectionConfig, timeout: Duration) -> Result<DbStats> {
    let client = connect(conn, timeout).await?;

    let stats = DbStats {
        schemas: count(&client, "schema count", SCHEMA_COUNT_SQL).await?,
        tables: count(&client, "table count", TABLE_COUNT_SQL).await?,
        approximate_rows: count(&client, "approximate row count", APPROX_ROWS_SQL).await?,
    };

    debug!("Stats for {}: {:?}", conn, stats);
    Ok(stats)
}

async fn count(client: &Client, metric: &'static str, sql: &str) -> Result<u64> {
    let row = client
        .query_one(sql, &[])
        .await
        .map_err(|source| MigrateError::Query { metric, source })?;
    let value: i64 = row
        .try_get(0)
        .map_err(|source| MigrateError::Query { metric, source })?;
    Ok(value.max(0) as u64)
}

/// Format `n` with comma thousands separators.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
