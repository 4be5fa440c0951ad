//! Destructive preparation of the target database.
//!
//! Before restore, every relation in the target's `public` schema is dropped.
//! Objects in other schemas are left alone. There is no rollback.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::connect::connect;
use crate::error::{MigrateError, Result};

/// Drops every view, materialized view, table, foreign table and sequence in
/// `public`, all in one server round trip. Each statement uses IF EXISTS
/// because CASCADE may already have removed a later entry of the loop.
pub const DROP_PUBLIC_RELATIONS_SQL: &str = r#"
DO $$
DECLARE
    r RECORD;
BEGIN
    FOR r IN
        SELECT c.relname,
               CASE c.relkind
                   WHEN 'v' THEN 'VIEW'
                   WHEN 'm' THEN 'MATERIALIZED VIEW'
                   WHEN 'f' THEN 'FOREIGN TABLE'
                   WHEN 'S' THEN 'SEQUENCE'
                   ELSE 'TABLE'
               END AS kind
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = 'public'
          AND c.relkind IN ('r', 'p', 'v', 'm', 'f', 'S')
          AND NOT c.relispartition
        ORDER BY CASE c.relkind WHEN 'v' THEN 0 WHEN 'm' THEN 1 WHEN 'S' THEN 3 ELSE 2 END
    LOOP
        EXECUTE format('DROP %s IF EXISTS public.%I CASCADE', r.kind, r.relname);
    END LOOP;
END
$$;
"#;

const COUNT_PUBLIC_RELATIONS_SQL: &str = "SELECT count(*) FROM pg_class c \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p', 'v', 'm', 'f', 'S')";

/// Removes pre-existing data from the migration target.
#[async_trait]
pub trait TargetPreparer: Send + Sync {
    /// Drop every relation in the target's public schema.
    async fn drop_public_relations(&self, target: &ConnectionConfig) -> Result<()>;
}

/// [`TargetPreparer`] issuing the drop block over a direct connection.
#[derive(Debug, Clone)]
pub struct PgTargetPreparer {
    timeout: Duration,
}

impl PgTargetPreparer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PgTargetPreparer {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl TargetPreparer for PgTargetPreparer {
    async fn drop_public_relations(&self, target: &ConnectionConfig) -> Result<()> {
        drop_public_relations(target, self.timeout).await
    }
}

/// Connect to `target` and drop every relation in its public schema.
///
/// The simple-query protocol runs the block outside any explicit
/// transaction, so it commits as soon as it completes.
pub async fn drop_public_relations(target: &ConnectionConfig, timeout: Duration) -> Result<()> {
    let client = connect(target, timeout)
        .await
        .map_err(|e| MigrateError::preparation(format!("could not reach target: {}", e)))?;

    let before = count_public_relations(&client).await;
    info!(
        "Dropping {} relation(s) in public schema of {}",
        before.map(|n| n.to_string()).unwrap_or_else(|| "all".into()),
        target
    );

    client
        .batch_execute(DROP_PUBLIC_RELATIONS_SQL)
        .await
        .map_err(|e| MigrateError::Preparation {
            message: format!("dropping relations in public schema of {}", target),
            source: Some(e),
        })?;

    match count_public_relations(&client).await {
        Some(0) | None => {}
        Some(left) => warn!("{} relation(s) remain in public schema after drop", left),
    }

    Ok(())
}

async fn count_public_relations(client: &tokio_postgres::Client) -> Option<i64> {
    client
        .query_one(COUNT_PUBLIC_RELATIONS_SQL, &[])
        .await
        .ok()
        .and_then(|row| row.try_get(0).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_block_is_scoped_to_public() {
        assert!(DROP_PUBLIC_RELATIONS_SQL.contains("n.nspname = 'public'"));
        assert!(DROP_PUBLIC_RELATIONS_SQL.contains("CASCADE"));
        assert!(DROP_PUBLIC_RELATIONS_SQL.contains("IF EXISTS public.%I"));
    }

    #[tokio::test]
    async fn test_unreachable_target_fails_without_dropping() {
        let mut conn = ConnectionConfig::new("127.0.0.1", "app", "postgres", "pw");
        conn.port = 1;
        let err = PgTargetPreparer::new(Duration::from_secs(2))
            .drop_public_relations(&conn)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Preparation { source: None, .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_PREPARATION_ERROR);
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
