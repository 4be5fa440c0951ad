//! Local PostgreSQL client tools: version detection and command lines.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConnectionConfig, MigrationConfig};
use crate::connect::SslMode;
use crate::error::{MigrateError, Result};
use crate::process::ToolCommand;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Version reported by `<tool> --version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: Option<u32>,
    /// First line of the tool's output, e.g. `pg_dump (PostgreSQL) 14.17 (Homebrew)`.
    pub banner: String,
}

impl ToolVersion {
    /// Parse a `--version` banner.
    pub fn parse(output: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"\(PostgreSQL\)\s+(\d+)(?:\.(\d+))?").expect("static regex is valid")
        });

        let banner = output.lines().next().unwrap_or_default().trim().to_string();
        let caps = re.captures(&banner)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Some(Self {
            major,
            minor,
            banner,
        })
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{}", self.major, minor),
            None => write!(f, "{}", self.major),
        }
    }
}

/// Looks up local client tool versions.
#[async_trait]
pub trait ToolInspector: Send + Sync {
    /// Version of `program`; `ToolMissing` if absent, `ToolVersion` if unparseable.
    async fn tool_version(&self, program: &str) -> Result<ToolVersion>;
}

/// Runs the real binaries found on PATH (or at an explicit path).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTools;

#[async_trait]
impl ToolInspector for LocalTools {
    async fn tool_version(&self, program: &str) -> Result<ToolVersion> {
        detect_tool_version(program).await
    }
}

/// Run `<program> --version` and parse its banner.
pub async fn detect_tool_version(program: &str) -> Result<ToolVersion> {
    let run = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_TIMEOUT, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MigrateError::ToolMissing(program.to_string()))
        }
        Ok(Err(e)) => return Err(MigrateError::Io(e)),
        Err(_) => {
            return Err(MigrateError::ToolVersion {
                program: program.to_string(),
                output: "timed out".to_string(),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("{} --version: {}", program, stdout.trim());

    ToolVersion::parse(&stdout).ok_or_else(|| MigrateError::ToolVersion {
        program: program.to_string(),
        output: stdout.trim().to_string(),
    })
}

/// Fail when the local pg_dump is older than the server it must dump.
///
/// Only this direction is checked; a much newer pg_dump against a very old
/// server is accepted even though it may not work.
pub fn check_compatibility(local_major: u32, server_major: u32) -> Result<()> {
    if local_major < server_major {
        Err(MigrateError::VersionMismatch {
            local: local_major,
            server: server_major,
        })
    } else {
        Ok(())
    }
}

fn connection_env(cmd: ToolCommand, conn: &ConnectionConfig) -> ToolCommand {
    let ssl_mode = SslMode::parse(&conn.ssl_mode).unwrap_or_default();
    cmd.env("PGSSLMODE", ssl_mode.as_libpq())
        .secret_env("PGPASSWORD", conn.password.clone())
}

fn connection_args(cmd: ToolCommand, conn: &ConnectionConfig) -> ToolCommand {
    cmd.arg("--host")
        .arg(conn.host.clone())
        .arg("--port")
        .arg(conn.port.to_string())
        .arg("--username")
        .arg(conn.user.clone())
        .arg("--no-password")
}

/// `pg_dump` invocation writing a custom-format archive to `output`.
pub fn dump_command(
    source: &ConnectionConfig,
    output: &Path,
    migration: &MigrationConfig,
) -> ToolCommand {
    let mut cmd = connection_args(ToolCommand::new(migration.pg_dump_path.clone()), source)
        .arg("--format=custom")
        .arg("--verbose");
    if migration.schema_only {
        cmd = cmd.arg("--schema-only");
    }
    let cmd = cmd
        .arg("--file")
        .arg(output.display().to_string())
        .arg(source.database.clone());
    connection_env(cmd, source)
}

/// `pg_restore` invocation loading the archive at `input` into the target database.
pub fn restore_command(
    target: &ConnectionConfig,
    input: &Path,
    migration: &MigrationConfig,
) -> ToolCommand {
    let mut cmd = connection_args(ToolCommand::new(migration.pg_restore_path.clone()), target)
        .arg("--dbname")
        .arg(target.database.clone())
        .arg("--verbose");
    if migration.no_owner {
        cmd = cmd.arg("--no-owner");
    }
    let cmd = cmd.arg(input.display().to_string());
    connection_env(cmd, target)
}
