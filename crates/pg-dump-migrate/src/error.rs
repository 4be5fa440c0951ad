//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when a database cannot be reached.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 2;
/// Exit code when a metadata query fails.
pub const EXIT_QUERY_ERROR: u8 = 3;
/// Exit code for failed preflight checks (missing tools, version skew).
pub const EXIT_PREFLIGHT_ERROR: u8 = 4;
/// Exit code when pg_dump or pg_restore exits non-zero.
pub const EXIT_PROCESS_ERROR: u8 = 5;
/// Exit code when the target could not be cleared.
pub const EXIT_PREPARATION_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for profile storage errors.
pub const EXIT_PROFILE_ERROR: u8 = 8;
/// Exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database unreachable, authentication rejected or connect timeout.
    #[error("Connection to {endpoint} failed: {message}")]
    Connectivity { endpoint: String, message: String },

    /// A metadata query could not be executed.
    #[error("Query for {metric} failed: {source}")]
    Query {
        metric: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Local pg_dump / pg_restore binary not found.
    #[error("Could not find '{0}'. Is it installed and on PATH?")]
    ToolMissing(String),

    /// Local tool found but its version banner could not be parsed.
    #[error("Could not determine the version of '{program}' from '{output}'")]
    ToolVersion { program: String, output: String },

    /// Local tool is older than the source server.
    #[error("Local pg_dump ({local}) is older than the source server ({server})")]
    VersionMismatch { local: u32, server: u32 },

    /// External process exited unsuccessfully.
    #[error("{program} failed with {}{}", describe_exit(.exit_code), describe_tail(.tail))]
    Process {
        program: String,
        exit_code: Option<i32>,
        tail: Vec<String>,
    },

    /// Dropping relations on the target failed. There is no rollback.
    #[error("Target preparation failed: {message}")]
    Preparation {
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// Dump artifact could not be created, found or removed.
    #[error("Dump artifact error: {0}")]
    Artifact(String),

    /// Profile storage error.
    #[error("Profile storage error: {0}")]
    Profile(#[from] rusqlite::Error),

    /// A profile with this name already exists.
    #[error("Connection name already exists: {0}")]
    ProfileExists(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

fn describe_tail(tail: &[String]) -> String {
    match tail.last() {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

impl MigrateError {
    /// Create a Connectivity error for the given endpoint.
    pub fn connectivity(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connectivity {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Preparation error without an underlying driver error.
    pub fn preparation(message: impl ToString) -> Self {
        MigrateError::Preparation {
            message: message.to_string(),
            source: None,
        }
    }

    /// Create an Artifact error.
    pub fn artifact(message: impl Into<String>) -> Self {
        MigrateError::Artifact(message.into())
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        if let MigrateError::Process { tail, .. } = self {
            if tail.len() > 1 {
                output.push_str("\n\nLast output lines:");
                for line in tail {
                    output.push_str(&format!("\n  {}", line));
                }
            }
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Connectivity { .. } => EXIT_CONNECTIVITY_ERROR,
            MigrateError::Query { .. } => EXIT_QUERY_ERROR,
            MigrateError::ToolMissing(_)
            | MigrateError::ToolVersion { .. }
            | MigrateError::VersionMismatch { .. } => EXIT_PREFLIGHT_ERROR,
            MigrateError::Process { .. } => EXIT_PROCESS_ERROR,
            MigrateError::Preparation { .. } => EXIT_PREPARATION_ERROR,
            MigrateError::Io(_) | MigrateError::Artifact(_) => EXIT_IO_ERROR,
            MigrateError::Profile(_) | MigrateError::ProfileExists(_) => EXIT_PROFILE_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_message_includes_exit_code_and_last_line() {
        let err = MigrateError::Process {
            program: "pg_dump".into(),
            exit_code: Some(1),
            tail: vec![
                "pg_dump: dumping contents of table \"public.users\"".into(),
                "pg_dump: error: connection lost".into(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("pg_dump failed with exit code 1"));
        assert!(msg.ends_with("pg_dump: error: connection lost"));
        assert!(err.format_detailed().contains("Last output lines:"));
    }

    #[test]
    fn test_process_error_killed_by_signal() {
        let err = MigrateError::Process {
            program: "pg_restore".into(),
            exit_code: None,
            tail: Vec::new(),
        };
        assert_eq!(err.to_string(), "pg_restore failed with termination by signal");
    }

    #[test]
    fn test_version_mismatch_names_both_versions() {
        let err = MigrateError::VersionMismatch {
            local: 14,
            server: 17,
        };
        let msg = err.to_string();
        assert!(msg.contains("14"));
        assert!(msg.contains("17"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::connectivity("db:5432", "refused").exit_code(),
            EXIT_CONNECTIVITY_ERROR
        );
        assert_eq!(
            MigrateError::ToolMissing("pg_dump".into()).exit_code(),
            EXIT_PREFLIGHT_ERROR
        );
        assert_eq!(
            MigrateError::preparation("could not connect").exit_code(),
            EXIT_PREPARATION_ERROR
        );
        assert_eq!(MigrateError::artifact("gone").exit_code(), EXIT_IO_ERROR);
        assert_eq!(
            MigrateError::ProfileExists("prod".into()).exit_code(),
            EXIT_PROFILE_ERROR
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
    }
}
