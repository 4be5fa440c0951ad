//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database, read by pg_dump.
    pub source: ConnectionConfig,

    /// Target database. All relations in its public schema are dropped.
    pub target: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Connection parameters for one PostgreSQL endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Passed to tools through PGPASSWORD only.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl ConnectionConfig {
    /// Create a connection config with the default port and ssl mode.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl_mode: default_disable(),
        }
    }

    /// `host:port` used in diagnostics.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Dump schema only, no data (default: false).
    #[serde(default)]
    pub schema_only: bool,

    /// Pass --no-owner to pg_restore so ownership from the source is not replayed (default: true).
    #[serde(default = "default_true")]
    pub no_owner: bool,

    /// pg_dump binary name or path (default: "pg_dump").
    #[serde(default = "default_pg_dump")]
    pub pg_dump_path: String,

    /// pg_restore binary name or path (default: "pg_restore").
    #[serde(default = "default_pg_restore")]
    pub pg_restore_path: String,

    /// Timeout for connection probes and metadata connections in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Directory for the temporary dump file (default: system temp dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            schema_only: false,
            no_owner: true,
            pg_dump_path: default_pg_dump(),
            pg_restore_path: default_pg_restore(),
            connect_timeout_secs: default_connect_timeout(),
            work_dir: None,
        }
    }
}

impl MigrationConfig {
    /// Connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

fn default_pg_restore() -> String {
    "pg_restore".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}
