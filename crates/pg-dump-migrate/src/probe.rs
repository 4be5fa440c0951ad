//! Connection probing and server version detection.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connect::{connect, connect_diagnostic};

/// Outcome of a connection probe. `info` holds the server version string on
/// success and a diagnostic on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub info: String,
}

impl ProbeResult {
    pub fn success(info: impl Into<String>) -> Self {
        Self {
            ok: true,
            info: info.into(),
        }
    }

    pub fn failure(info: impl Into<String>) -> Self {
        Self {
            ok: false,
            info: info.into(),
        }
    }

    /// Parsed server version, if the probe succeeded and the banner is recognised.
    pub fn server_version(&self) -> Option<ServerVersion> {
        if self.ok {
            ServerVersion::parse(&self.info)
        } else {
            None
        }
    }
}

/// Reachability check for a database endpoint.
///
/// Implementations never fail: every problem is folded into a `ProbeResult`.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn test_connection(&self, conn: &ConnectionConfig) -> ProbeResult;
}

/// Probe that opens a real PostgreSQL connection and runs `SELECT version()`.
#[derive(Debug, Clone)]
pub struct PgProbe {
    timeout: Duration,
}

impl PgProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PgProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl DatabaseProbe for PgProbe {
    async fn test_connection(&self, conn: &ConnectionConfig) -> ProbeResult {
        test_connection(conn, self.timeout).await
    }
}

/// Connect to `conn`, read the server version and close the connection.
pub async fn test_connection(conn: &ConnectionConfig, timeout: Duration) -> ProbeResult {
    let client = match connect(conn, timeout).await {
        Ok(client) => client,
        Err(e) => return ProbeResult::failure(e.to_string()),
    };

    let query = tokio::time::timeout(timeout, client.query_one("SELECT version()", &[])).await;
    let result = match query {
        Ok(Ok(row)) => match row.try_get::<_, String>(0) {
            Ok(version) => ProbeResult::success(version),
            Err(e) => ProbeResult::failure(connect_diagnostic(&e)),
        },
        Ok(Err(e)) => ProbeResult::failure(connect_diagnostic(&e)),
        Err(_) => ProbeResult::failure(format!(
            "SELECT version() timed out after {}s",
            timeout.as_secs()
        )),
    };

    drop(client);
    debug!("Probe of {}: ok={}", conn, result.ok);
    result
}

/// PostgreSQL server version parsed from a `version()` banner such as
/// `PostgreSQL 17.7 (Ubuntu 17.7-1.pgdg22.04+1) on x86_64-pc-linux-gnu, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: Option<u32>,
}

impl ServerVersion {
    pub fn parse(banner: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"PostgreSQL (\d+)(?:\.(\d+))?").expect("static regex is valid")
        });
        let caps = re.captures(banner)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Some(Self { major, minor })
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "PostgreSQL {}.{}", self.major, minor),
            None => write!(f, "PostgreSQL {}", self.major),
        }
    }
}

/// Short identity for display: `"PostgreSQL 17.7"` or the first word of an
/// unrecognised banner.
pub fn short_identity(banner: &str) -> String {
    match ServerVersion::parse(banner) {
        Some(version) => version.to_string(),
        None => banner
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ubuntu_banner() {
        let v = ServerVersion::parse(
            "PostgreSQL 17.7 (Ubuntu 17.7-1.pgdg22.04+1) on x86_64-pc-linux-gnu, compiled by gcc",
        )
        .unwrap();
        assert_eq!(v.major, 17);
        assert_eq!(v.minor, Some(7));
        assert_eq!(v.to_string(), "PostgreSQL 17.7");
    }

    #[test]
    fn test_parse_old_three_part_version() {
        let v = ServerVersion::parse("PostgreSQL 9.6.24 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(v.major, 9);
        assert_eq!(v.minor, Some(6));
    }

    #[test]
    fn test_parse_devel_version() {
        let v = ServerVersion::parse("PostgreSQL 18devel on aarch64-apple-darwin").unwrap();
        assert_eq!(v.major, 18);
        assert_eq!(v.minor, None);
    }

    #[test]
    fn test_parse_unrecognised_banner() {
        assert!(ServerVersion::parse("CockroachDB CCL v23.1").is_none());
        assert_eq!(short_identity("CockroachDB CCL v23.1"), "CockroachDB");
    }

    #[test]
    fn test_failed_probe_has_no_version() {
        let result = ProbeResult::failure("PostgreSQL 17.1 is what we wanted");
        assert!(result.server_version().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_probe_returns_failure() {
        let mut conn = ConnectionConfig::new("127.0.0.1", "app", "postgres", "hunter2-probe");
        conn.port = 1;
        let result = PgProbe::new(Duration::from_secs(2))
            .test_connection(&conn)
            .await;
        assert!(!result.ok);
        assert!(!result.info.is_empty());
        assert!(!result.info.contains("hunter2-probe"));
    }
}
