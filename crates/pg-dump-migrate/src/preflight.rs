//! Preflight compatibility checks run before a destructive migration.
//!
//! Checks run in a fixed order and each appends one entry to the report.
//! Nothing here returns an error: every problem becomes a failed entry and
//! the caller decides whether to proceed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConnectionConfig, MigrationConfig};
use crate::probe::{short_identity, DatabaseProbe};
use crate::tools::{check_compatibility, ToolInspector, ToolVersion};

pub const CHECK_LOCAL_DUMP: &str = "local pg_dump";
pub const CHECK_LOCAL_RESTORE: &str = "local pg_restore";
pub const CHECK_SOURCE: &str = "source connectivity";
pub const CHECK_VERSION: &str = "version compatibility";
pub const CHECK_TARGET: &str = "target connectivity";

/// Verdict of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// One named preflight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

impl PreflightCheck {
    pub fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }

    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

impl fmt::Display for PreflightCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed() { "PASS" } else { "FAIL" };
        write!(f, "[{}] {}: {}", mark, self.name, self.message)
    }
}

/// Ordered result of a preflight run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(PreflightCheck::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PreflightCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    pub fn get(&self, name: &str) -> Option<&PreflightCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    fn push(&mut self, check: PreflightCheck) {
        if check.passed() {
            info!("Preflight {}", check);
        } else {
            warn!("Preflight {}", check);
        }
        self.checks.push(check);
    }
}

/// Runs the preflight sequence against injected probe and tool inspector.
pub struct CompatibilityChecker<'a> {
    probe: &'a dyn DatabaseProbe,
    tools: &'a dyn ToolInspector,
    migration: &'a MigrationConfig,
}

impl<'a> CompatibilityChecker<'a> {
    pub fn new(
        probe: &'a dyn DatabaseProbe,
        tools: &'a dyn ToolInspector,
        migration: &'a MigrationConfig,
    ) -> Self {
        Self {
            probe,
            tools,
            migration,
        }
    }

    /// Run all checks. Stops right after the source connectivity check if it fails.
    pub async fn preflight(
        &self,
        source: &ConnectionConfig,
        target: &ConnectionConfig,
    ) -> PreflightReport {
        let mut report = PreflightReport::default();

        let local_dump = self
            .check_tool(&mut report, CHECK_LOCAL_DUMP, &self.migration.pg_dump_path)
            .await;
        self.check_tool(&mut report, CHECK_LOCAL_RESTORE, &self.migration.pg_restore_path)
            .await;

        let source_probe = self.probe.test_connection(source).await;
        if !source_probe.ok {
            report.push(PreflightCheck::fail(
                CHECK_SOURCE,
                format!("Source failed: {}", source_probe.info),
            ));
            return report;
        }
        report.push(PreflightCheck::pass(
            CHECK_SOURCE,
            format!("Source connected: {}", short_identity(&source_probe.info)),
        ));

        if let (Some(local), Some(server)) = (&local_dump, source_probe.server_version()) {
            match check_compatibility(local.major, server.major) {
                Ok(()) => report.push(PreflightCheck::pass(
                    CHECK_VERSION,
                    format!("Local pg_dump {} can dump {}", local.major, server),
                )),
                Err(_) => report.push(PreflightCheck::fail(
                    CHECK_VERSION,
                    format!(
                        "Version mismatch: local pg_dump ({}) < source server ({}). \
                         Update the local PostgreSQL client tools",
                        local.major, server.major
                    ),
                )),
            }
        }

        let target_probe = self.probe.test_connection(target).await;
        if target_probe.ok {
            report.push(PreflightCheck::pass(
                CHECK_TARGET,
                format!("Target connected: {}", short_identity(&target_probe.info)),
            ));
        } else {
            report.push(PreflightCheck::fail(
                CHECK_TARGET,
                format!("Target failed: {}", target_probe.info),
            ));
        }

        report
    }

    async fn check_tool(
        &self,
        report: &mut PreflightReport,
        name: &str,
        program: &str,
    ) -> Option<ToolVersion> {
        match self.tools.tool_version(program).await {
            Ok(version) => {
                report.push(PreflightCheck::pass(
                    name,
                    format!("Local {} version: {}", program, version),
                ));
                Some(version)
            }
            Err(e) => {
                report.push(PreflightCheck::fail(name, e.to_string()));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MigrateError, Result};
    use crate::probe::ProbeResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Probe answering by host name; records which hosts were probed.
    struct FakeProbe {
        answers: HashMap<String, ProbeResult>,
        probed: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn new(answers: &[(&str, ProbeResult)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(h, r)| (h.to_string(), r.clone()))
                    .collect(),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DatabaseProbe for FakeProbe {
        async fn test_connection(&self, conn: &ConnectionConfig) -> ProbeResult {
            self.probed.lock().unwrap().push(conn.host.clone());
            self.answers
                .get(&conn.host)
                .cloned()
                .unwrap_or_else(|| ProbeResult::failure("connection refused"))
        }
    }

    struct FakeTools {
        dump_major: Option<u32>,
    }

    #[async_trait]
    impl ToolInspector for FakeTools {
        async fn tool_version(&self, program: &str) -> Result<ToolVersion> {
            match self.dump_major {
                Some(major) => Ok(ToolVersion {
                    major,
                    minor: Some(1),
                    banner: format!("{} (PostgreSQL) {}.1", program, major),
                }),
                None => Err(MigrateError::ToolMissing(program.to_string())),
            }
        }
    }

    fn pg(major: u32) -> ProbeResult {
        ProbeResult::success(format!(
            "PostgreSQL {}.2 on x86_64-pc-linux-gnu, compiled by gcc",
            major
        ))
    }

    fn endpoints() -> (ConnectionConfig, ConnectionConfig) {
        (
            ConnectionConfig::new("src", "app", "postgres", "pw"),
            ConnectionConfig::new("dst", "app", "postgres", "pw"),
        )
    }

    async fn run(probe: &FakeProbe, tools: &FakeTools) -> PreflightReport {
        let migration = MigrationConfig::default();
        let (source, target) = endpoints();
        CompatibilityChecker::new(probe, tools, &migration)
            .preflight(&source, &target)
            .await
    }

    fn names(report: &PreflightReport) -> Vec<&str> {
        report.checks.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let probe = FakeProbe::new(&[("src", pg(16)), ("dst", pg(17))]);
        let report = run(&probe, &FakeTools { dump_major: Some(17) }).await;

        assert!(report.all_passed());
        assert_eq!(
            names(&report),
            vec![
                CHECK_LOCAL_DUMP,
                CHECK_LOCAL_RESTORE,
                CHECK_SOURCE,
                CHECK_VERSION,
                CHECK_TARGET
            ]
        );
        assert_eq!(
            report.get(CHECK_SOURCE).unwrap().message,
            "Source connected: PostgreSQL 16.2"
        );
    }

    #[tokio::test]
    async fn test_unreachable_source_short_circuits() {
        let probe = FakeProbe::new(&[("dst", pg(17))]);
        let report = run(&probe, &FakeTools { dump_major: Some(17) }).await;

        let last = report.checks.last().unwrap();
        assert_eq!(last.name, CHECK_SOURCE);
        assert_eq!(last.status, CheckStatus::Fail);
        assert!(report.get(CHECK_TARGET).is_none());
        assert!(report.get(CHECK_VERSION).is_none());
        assert_eq!(*probe.probed.lock().unwrap(), vec!["src".to_string()]);
    }

    #[tokio::test]
    async fn test_old_local_tool_fails_compatibility() {
        let probe = FakeProbe::new(&[("src", pg(17)), ("dst", pg(17))]);
        let report = run(&probe, &FakeTools { dump_major: Some(14) }).await;

        let check = report.get(CHECK_VERSION).unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.message.contains("14"));
        assert!(check.message.contains("17"));
        // Target is still checked after a version failure
        assert!(report.get(CHECK_TARGET).unwrap().passed());
        assert!(!report.all_passed());
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_newer_local_tool_passes_compatibility() {
        let probe = FakeProbe::new(&[("src", pg(12)), ("dst", pg(12))]);
        let report = run(&probe, &FakeTools { dump_major: Some(17) }).await;
        assert!(report.get(CHECK_VERSION).unwrap().passed());
    }

    #[tokio::test]
    async fn test_missing_tool_skips_version_check() {
        let probe = FakeProbe::new(&[("src", pg(17)), ("dst", pg(17))]);
        let report = run(&probe, &FakeTools { dump_major: None }).await;

        let dump = report.get(CHECK_LOCAL_DUMP).unwrap();
        assert_eq!(dump.status, CheckStatus::Fail);
        assert!(dump.message.contains("pg_dump"));
        assert!(report.get(CHECK_VERSION).is_none());
        assert!(report.get(CHECK_TARGET).unwrap().passed());
    }

    #[tokio::test]
    async fn test_unreachable_target_is_recorded() {
        let probe = FakeProbe::new(&[("src", pg(17))]);
        let report = run(&probe, &FakeTools { dump_major: Some(17) }).await;

        let target = report.checks.last().unwrap();
        assert_eq!(target.name, CHECK_TARGET);
        assert_eq!(target.status, CheckStatus::Fail);
        assert!(target.message.starts_with("Target failed: "));
    }

    #[test]
    fn test_check_display() {
        let check = PreflightCheck::fail(CHECK_TARGET, "Target failed: timeout");
        assert_eq!(
            check.to_string(),
            "[FAIL] target connectivity: Target failed: timeout"
        );
    }
}
