//! Migration orchestrator - main workflow coordinator.
//!
//! A run moves strictly forward through
//! `Initializing -> Dumping -> Dropping -> Restoring -> Complete | Failed`.
//! The target is only touched after pg_dump has produced a non-empty
//! archive, and the archive is deleted on every exit path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact::DumpArtifact;
use crate::config::{Config, ConnectionConfig};
use crate::error::{MigrateError, Result};
use crate::events::{EventSink, MigrationEvent, MigrationPhase};
use crate::preflight::{CompatibilityChecker, PreflightReport};
use crate::prepare::{PgTargetPreparer, TargetPreparer};
use crate::probe::{DatabaseProbe, PgProbe, ProbeResult};
use crate::process;
use crate::stats::{get_stats, DbStats};
use crate::tools::{dump_command, restore_command, LocalTools, ToolInspector};

/// Migration orchestrator.
///
/// Holds configuration and collaborators only. Everything a run mutates
/// (artifact, event sink, cancellation) is passed to [`Orchestrator::run`],
/// so separate runs never share state.
pub struct Orchestrator {
    config: Config,
    probe: Arc<dyn DatabaseProbe>,
    tools: Arc<dyn ToolInspector>,
    preparer: Arc<dyn TargetPreparer>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Whether every phase completed.
    pub success: bool,

    /// "Migration successful" or the failing phase with its cause.
    pub message: String,

    /// Complete or Failed.
    pub final_phase: MigrationPhase,

    /// Phase that was running when the failure happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<MigrationPhase>,

    /// Process exit code matching the outcome (0 on success).
    pub exit_code: u8,

    /// Whether only the schema was migrated.
    pub schema_only: bool,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl MigrationResult {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Failure inside a phase, before cleanup has run.
struct PhaseFailure {
    phase: MigrationPhase,
    error: MigrateError,
}

/// Tracks the current phase and announces transitions on the sink.
struct PhaseTracker<'a> {
    sink: &'a dyn EventSink,
    current: MigrationPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            current: MigrationPhase::Initializing,
        }
    }

    fn enter(&mut self, phase: MigrationPhase, detail: impl Into<String>) {
        let detail = detail.into();
        info!("Phase {}: {}", phase, detail);
        self.current = phase;
        self.sink.emit(MigrationEvent::phase(phase, detail));
    }

    fn log(&self, message: impl Into<String>) {
        self.sink.emit(MigrationEvent::log(message));
    }

    /// Attach the current phase to an error.
    fn fail(&self, error: MigrateError) -> PhaseFailure {
        PhaseFailure {
            phase: self.current,
            error,
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator using real PostgreSQL connections and local tools.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let timeout = config.migration.connect_timeout();
        Ok(Self {
            config,
            probe: Arc::new(PgProbe::new(timeout)),
            tools: Arc::new(LocalTools),
            preparer: Arc::new(PgTargetPreparer::new(timeout)),
        })
    }

    /// Replace the connection probe.
    pub fn with_probe(mut self, probe: Arc<dyn DatabaseProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the local tool inspector.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInspector>) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the target preparer.
    pub fn with_preparer(mut self, preparer: Arc<dyn TargetPreparer>) -> Self {
        self.preparer = preparer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the preflight checks for the configured source and target.
    pub async fn preflight(&self) -> PreflightReport {
        CompatibilityChecker::new(
            self.probe.as_ref(),
            self.tools.as_ref(),
            &self.config.migration,
        )
        .preflight(&self.config.source, &self.config.target)
        .await
    }

    /// Probe one endpoint.
    pub async fn test_connection(&self, conn: &ConnectionConfig) -> ProbeResult {
        self.probe.test_connection(conn).await
    }

    /// Collect stats for the source database.
    pub async fn source_stats(&self) -> Result<DbStats> {
        get_stats(&self.config.source, self.config.migration.connect_timeout()).await
    }

    /// Collect stats for the target database.
    pub async fn target_stats(&self) -> Result<DbStats> {
        get_stats(&self.config.target, self.config.migration.connect_timeout()).await
    }

    /// Run dump -> drop -> restore, reporting progress to `sink`.
    ///
    /// Never returns an error: failures are reported in the result after the
    /// dump artifact has been removed. Nothing is retried.
    pub async fn run(&self, sink: &dyn EventSink, cancel: &CancellationToken) -> MigrationResult {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut tracker = PhaseTracker::new(sink);

        info!("Starting migration run: {}", run_id);
        tracker.enter(
            MigrationPhase::Initializing,
            format!("Run {} from {} to {}", run_id, self.config.source, self.config.target),
        );

        let outcome = match DumpArtifact::create(self.config.migration.work_dir.as_deref(), &run_id)
        {
            Ok(artifact) => {
                let outcome = self.run_phases(&artifact, &mut tracker, cancel).await;
                if let Err(failure) = &outcome {
                    self.announce_failure(&mut tracker, failure);
                }
                match artifact.cleanup() {
                    Ok(path) => {
                        tracker.log(format!("Cleaned up temporary dump file {}", path.display()))
                    }
                    Err(e) => {
                        warn!("{}", e);
                        tracker.log(format!("Warning: {}", e));
                    }
                }
                outcome
            }
            Err(error) => {
                let failure = tracker.fail(error);
                self.announce_failure(&mut tracker, &failure);
                Err(failure)
            }
        };

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let (success, message, failed_phase, exit_code) = match outcome {
            Ok(()) => {
                tracker.enter(MigrationPhase::Complete, "Migration successful");
                (true, "Migration successful".to_string(), None, 0)
            }
            Err(failure) => (
                false,
                failure_message(&failure),
                Some(failure.phase),
                failure.error.exit_code(),
            ),
        };

        MigrationResult {
            run_id,
            success,
            message,
            final_phase: tracker.current,
            failed_phase,
            exit_code,
            schema_only: self.config.migration.schema_only,
            started_at,
            completed_at,
            duration_seconds,
        }
    }

    async fn run_phases(
        &self,
        artifact: &DumpArtifact,
        tracker: &mut PhaseTracker<'_>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), PhaseFailure> {
        let source = &self.config.source;
        let target = &self.config.target;
        let migration = &self.config.migration;

        // Phase 1: dump. The target is untouched until this succeeds.
        checkpoint(tracker, cancel)?;
        let mode = if migration.schema_only {
            "schema only"
        } else {
            "schema + data"
        };
        tracker.enter(
            MigrationPhase::Dumping,
            format!("Exporting {} ({})", source, mode),
        );
        let dump = dump_command(source, artifact.path(), migration);
        self.run_tool(&dump, tracker, cancel)
            .await
            .map_err(|e| tracker.fail(e))?;
        let size = artifact.verify_written().map_err(|e| tracker.fail(e))?;
        tracker.log(format!("Dump completed ({} bytes)", size));

        // Phase 2: drop everything in the target's public schema
        checkpoint(tracker, cancel)?;
        tracker.enter(
            MigrationPhase::Dropping,
            format!("Dropping all relations in public schema of {}", target),
        );
        tracker.log("Connecting to target to drop relations...");
        self.preparer
            .drop_public_relations(target)
            .await
            .map_err(|e| tracker.fail(e))?;
        tracker.log("All public relations dropped.");

        // Phase 3: restore
        checkpoint(tracker, cancel)?;
        tracker.enter(
            MigrationPhase::Restoring,
            format!("Restoring into {}", target),
        );
        let restore = restore_command(target, artifact.path(), migration);
        self.run_tool(&restore, tracker, cancel)
            .await
            .map_err(|e| tracker.fail(e))?;
        tracker.log("Restore completed successfully.");

        Ok(())
    }

    async fn run_tool(
        &self,
        command: &process::ToolCommand,
        tracker: &PhaseTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracker.log(format!("Running: {}", command));
        process::run(command, |line| tracker.log(line), cancel).await
    }

    fn announce_failure(&self, tracker: &mut PhaseTracker<'_>, failure: &PhaseFailure) {
        let message = failure_message(failure);
        error!("Migration failed: {}", message);
        tracker.log(format!("Migration failed: {}", message));
        tracker.enter(MigrationPhase::Failed, message);
    }
}

fn checkpoint(
    tracker: &PhaseTracker<'_>,
    cancel: &CancellationToken,
) -> std::result::Result<(), PhaseFailure> {
    if cancel.is_cancelled() {
        Err(tracker.fail(MigrateError::Cancelled))
    } else {
        Ok(())
    }
}

fn failure_message(failure: &PhaseFailure) -> String {
    format!("{} failed: {}", failure.phase, failure.error)
}
