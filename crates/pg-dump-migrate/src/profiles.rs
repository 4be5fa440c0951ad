//! Saved connection profiles.
//!
//! Profiles are stored in a small SQLite database so that endpoints can be
//! picked by name instead of being repeated in every config file. Passwords
//! are stored as entered; protect the database file accordingly.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{validate_connection, ConnectionConfig};
use crate::error::{MigrateError, Result};

/// Environment tag given to profiles saved without one.
pub const DEFAULT_ENVIRONMENT: &str = "Production";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS connections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        environment TEXT NOT NULL DEFAULT 'Production',
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        user TEXT NOT NULL,
        password TEXT NOT NULL,
        dbname TEXT NOT NULL,
        ssl_mode TEXT NOT NULL DEFAULT 'disable'
    );
";

const SELECT_COLUMNS: &str =
    "SELECT id, name, environment, host, port, user, password, dbname, ssl_mode FROM connections";

/// A stored connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: i64,
    pub name: String,
    pub environment: String,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

/// A profile about to be saved.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub environment: String,
    pub connection: ConnectionConfig,
}

impl NewProfile {
    pub fn new(name: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            connection,
        }
    }

    /// Set the environment tag. Blank tags keep the default.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        let environment = environment.into();
        if !environment.trim().is_empty() {
            self.environment = environment.trim().to_string();
        }
        self
    }
}

/// SQLite-backed profile store.
pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening profile store {}", path.display());
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;

        // Stores created before environment tags existed lack the column
        if !self.has_column("environment")? {
            info!("Adding environment column to profile store");
            self.conn.execute_batch(
                "ALTER TABLE connections ADD COLUMN environment TEXT NOT NULL DEFAULT 'Production'",
            )?;
        }
        if !self.has_column("ssl_mode")? {
            self.conn.execute_batch(
                "ALTER TABLE connections ADD COLUMN ssl_mode TEXT NOT NULL DEFAULT 'disable'",
            )?;
        }
        Ok(())
    }

    fn has_column(&self, column: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(connections)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|n| n == column))
    }

    /// All profiles ordered by environment, then name.
    pub fn list(&self) -> Result<Vec<ConnectionProfile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY environment, name", SELECT_COLUMNS))?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    /// Profiles grouped by environment tag.
    pub fn list_grouped_by_environment(&self) -> Result<BTreeMap<String, Vec<ConnectionProfile>>> {
        let mut grouped: BTreeMap<String, Vec<ConnectionProfile>> = BTreeMap::new();
        for profile in self.list()? {
            grouped
                .entry(profile.environment.clone())
                .or_default()
                .push(profile);
        }
        Ok(grouped)
    }

    /// Look up a profile by its unique name.
    pub fn find(&self, name: &str) -> Result<Option<ConnectionProfile>> {
        let profile = self
            .conn
            .query_row(
                &format!("{} WHERE name = ?", SELECT_COLUMNS),
                params![name],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    /// Save a new profile and return its id.
    pub fn save(&self, profile: &NewProfile) -> Result<i64> {
        if profile.name.trim().is_empty() {
            return Err(MigrateError::Config("profile name is required".into()));
        }
        validate_connection(&profile.name, &profile.connection)?;

        let conn = &profile.connection;
        let inserted = self.conn.execute(
            "INSERT INTO connections (name, environment, host, port, user, password, dbname, ssl_mode) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                profile.name,
                profile.environment,
                conn.host,
                conn.port,
                conn.user,
                conn.password,
                conn.database,
                conn.ssl_mode
            ],
        );

        match inserted {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                info!("Saved profile '{}' ({}) as #{}", profile.name, conn, id);
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(MigrateError::ProfileExists(profile.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a profile by id. Returns whether a row was removed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM connections WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionProfile> {
    Ok(ConnectionProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        environment: row.get(2)?,
        connection: ConnectionConfig {
            host: row.get(3)?,
            port: port_from_row(row, 4)?,
            user: row.get(5)?,
            password: row.get(6)?,
            database: row.get(7)?,
            ssl_mode: row.get(8)?,
        },
    })
}

/// Older stores keep the port as TEXT, newer ones as INTEGER.
fn port_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<u16> {
    match row.get::<_, Value>(idx)? {
        Value::Integer(port) => {
            u16::try_from(port).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, port))
        }
        Value::Text(port) => port
            .trim()
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "port".to_string(),
            other.data_type(),
        )),
    }
}
