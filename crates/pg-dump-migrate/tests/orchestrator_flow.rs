//! End-to-end runs of the orchestrator with shell scripts standing in for
//! pg_dump/pg_restore and an in-memory target preparer.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pg_dump_migrate::{
    ChannelSink, Config, ConnectionConfig, MemorySink, MigrateError, MigrationEvent,
    MigrationPhase, Orchestrator, Result, TargetPreparer,
};
use tokio_util::sync::CancellationToken;

// Writing an executable while another test forks can leave it busy (ETXTBSY)
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

const SOURCE_PASSWORD: &str = "source-secret-7781";
const TARGET_PASSWORD: &str = "target-secret-7781";

#[derive(Default)]
struct FakePreparer {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TargetPreparer for FakePreparer {
    async fn drop_public_relations(&self, target: &ConnectionConfig) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(MigrateError::preparation(format!(
                "could not reach target: {} refused the connection",
                target.endpoint()
            )))
        } else {
            Ok(())
        }
    }
}

struct Harness {
    _root: tempfile::TempDir,
    bin: PathBuf,
    work: PathBuf,
    restore_marker: PathBuf,
    dump_args: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let work = root.path().join("work");
        std::fs::create_dir(&bin).unwrap();
        std::fs::create_dir(&work).unwrap();
        Self {
            restore_marker: root.path().join("restored-from"),
            dump_args: root.path().join("dump-args"),
            _root: root,
            bin,
            work,
        }
    }

    fn script(&self, name: &str, body: &str) -> String {
        let path = self.bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// pg_dump that writes a small archive and echoes its password to stderr.
    fn good_dump(&self) -> String {
        self.script(
            "pg_dump",
            &format!(
                r#"echo "$@" > "{}"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--file" ]; then out="$2"; fi
  shift
done
echo "pg_dump: last built-in OID is 16383" >&2
echo "pg_dump: connecting with password $PGPASSWORD" >&2
printf 'PGDMP fake archive' > "$out"
"#,
                self.dump_args.display()
            ),
        )
    }

    /// pg_restore that records which archive it was given.
    fn good_restore(&self) -> String {
        self.script(
            "pg_restore",
            &format!(
                r#"for last; do :; done
[ -s "$last" ] || exit 3
echo "$last" > "{}"
echo "pg_restore: creating TABLE \"public.items\"" >&2
"#,
                self.restore_marker.display()
            ),
        )
    }

    fn config(&self, pg_dump: String, pg_restore: String) -> Config {
        let mut config = Config {
            source: ConnectionConfig::new("src.internal", "app", "postgres", SOURCE_PASSWORD),
            target: ConnectionConfig::new("dst.internal", "app", "postgres", TARGET_PASSWORD),
            migration: Default::default(),
        };
        config.migration.pg_dump_path = pg_dump;
        config.migration.pg_restore_path = pg_restore;
        config.migration.work_dir = Some(self.work.clone());
        config
    }

    fn leftover_dumps(&self) -> usize {
        std::fs::read_dir(&self.work).unwrap().count()
    }
}

fn assert_no_passwords(lines: &[String]) {
    for line in lines {
        assert!(!line.contains(SOURCE_PASSWORD), "source password leaked: {line}");
        assert!(!line.contains(TARGET_PASSWORD), "target password leaked: {line}");
    }
}

fn restored_from(path: &Path) -> Option<PathBuf> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| PathBuf::from(s.trim()))
}

#[tokio::test]
async fn test_successful_run_walks_every_phase() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let config = h.config(h.good_dump(), h.good_restore());
    let preparer = Arc::new(FakePreparer::default());
    let orchestrator = Orchestrator::new(config).unwrap().with_preparer(preparer.clone());

    let sink = MemorySink::new();
    let result = orchestrator.run(&sink, &CancellationToken::new()).await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "Migration successful");
    assert_eq!(result.final_phase, MigrationPhase::Complete);
    assert_eq!(result.failed_phase, None);
    assert_eq!(result.exit_code, 0);
    assert_eq!(
        sink.phases(),
        vec![
            MigrationPhase::Initializing,
            MigrationPhase::Dumping,
            MigrationPhase::Dropping,
            MigrationPhase::Restoring,
            MigrationPhase::Complete,
        ]
    );
    assert_eq!(preparer.calls.load(Ordering::SeqCst), 1);

    // Restore received the archive from the work dir, which is gone now
    let archive = restored_from(&h.restore_marker).unwrap();
    assert!(archive.starts_with(&h.work));
    assert!(!archive.exists());
    assert_eq!(h.leftover_dumps(), 0);

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.starts_with("Running: ") && l.contains("--format=custom")));
    assert!(lines.iter().any(|l| l.contains("pg_restore: creating TABLE")));
    assert!(lines.iter().any(|l| l.contains("connecting with password ********")));
    assert!(lines.iter().any(|l| l.starts_with("Cleaned up temporary dump file")));
    assert_no_passwords(&lines);
}

#[tokio::test]
async fn test_dump_failure_leaves_target_untouched() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let dump = h.script(
        "pg_dump",
        "echo \"pg_dump: error: connection to server failed\" >&2\nexit 1\n",
    );
    let config = h.config(dump, h.good_restore());
    let preparer = Arc::new(FakePreparer::default());
    let orchestrator = Orchestrator::new(config).unwrap().with_preparer(preparer.clone());

    let sink = MemorySink::new();
    let result = orchestrator.run(&sink, &CancellationToken::new()).await;

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Dumping));
    assert_eq!(result.exit_code, pg_dump_migrate::error::EXIT_PROCESS_ERROR);
    assert!(result.message.starts_with("Dumping failed: "));
    assert!(result.message.contains("exit code 1"));
    assert!(result.message.contains("connection to server failed"));

    assert_eq!(preparer.calls.load(Ordering::SeqCst), 0);
    assert!(restored_from(&h.restore_marker).is_none());
    assert_eq!(h.leftover_dumps(), 0);
    assert_eq!(
        sink.phases(),
        vec![
            MigrationPhase::Initializing,
            MigrationPhase::Dumping,
            MigrationPhase::Failed
        ]
    );
}

#[tokio::test]
async fn test_empty_dump_is_rejected_before_drop() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let dump = h.script("pg_dump", "echo \"pg_dump: nothing to do\" >&2\n");
    let config = h.config(dump, h.good_restore());
    let preparer = Arc::new(FakePreparer::default());
    let orchestrator = Orchestrator::new(config).unwrap().with_preparer(preparer.clone());

    let result = orchestrator
        .run(&MemorySink::new(), &CancellationToken::new())
        .await;

    assert_eq!(result.failed_phase, Some(MigrationPhase::Dumping));
    assert!(result.message.contains("empty"));
    assert_eq!(preparer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.leftover_dumps(), 0);
}

#[tokio::test]
async fn test_drop_failure_skips_restore() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let config = h.config(h.good_dump(), h.good_restore());
    let preparer = Arc::new(FakePreparer {
        fail: true,
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(config).unwrap().with_preparer(preparer.clone());

    let sink = MemorySink::new();
    let result = orchestrator.run(&sink, &CancellationToken::new()).await;

    assert_eq!(result.failed_phase, Some(MigrationPhase::Dropping));
    assert_eq!(result.exit_code, pg_dump_migrate::error::EXIT_PREPARATION_ERROR);
    assert!(result.message.starts_with("Dropping failed: "));
    assert!(result.message.contains("refused the connection"));
    assert!(restored_from(&h.restore_marker).is_none());
    assert_eq!(h.leftover_dumps(), 0);
    assert_eq!(sink.phases().last(), Some(&MigrationPhase::Failed));
    assert!(!sink.phases().contains(&MigrationPhase::Restoring));
}

#[tokio::test]
async fn test_restore_failure_still_cleans_up() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let restore = h.script(
        "pg_restore",
        "echo \"pg_restore: error: could not execute query\" >&2\nexit 1\n",
    );
    let config = h.config(h.good_dump(), restore);
    let orchestrator = Orchestrator::new(config)
        .unwrap()
        .with_preparer(Arc::new(FakePreparer::default()));

    let sink = MemorySink::new();
    let result = orchestrator.run(&sink, &CancellationToken::new()).await;

    assert_eq!(result.failed_phase, Some(MigrationPhase::Restoring));
    assert_eq!(result.final_phase, MigrationPhase::Failed);
    assert_eq!(result.exit_code, pg_dump_migrate::error::EXIT_PROCESS_ERROR);
    assert!(result.message.starts_with("Restoring failed: "));
    assert!(result.message.contains("pg_restore failed with exit code 1"));
    assert_eq!(h.leftover_dumps(), 0);
    assert_no_passwords(&sink.lines());
}

#[tokio::test]
async fn test_schema_only_reaches_pg_dump() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let mut config = h.config(h.good_dump(), h.good_restore());
    config.migration.schema_only = true;
    let orchestrator = Orchestrator::new(config)
        .unwrap()
        .with_preparer(Arc::new(FakePreparer::default()));

    let result = orchestrator
        .run(&MemorySink::new(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert!(result.schema_only);
    let args = std::fs::read_to_string(&h.dump_args).unwrap();
    assert!(args.contains("--schema-only"));
    assert!(!args.contains(SOURCE_PASSWORD));
}

#[tokio::test]
async fn test_channel_sink_receives_terminal_phase_last() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new();
    let config = h.config(h.good_dump(), h.good_restore());
    let orchestrator = Orchestrator::new(config)
        .unwrap()
        .with_preparer(Arc::new(FakePreparer::default()));

    let (sink, mut rx) = ChannelSink::channel();
    let result = orchestrator.run(&sink, &CancellationToken::new()).await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(result.success);
    match events.last() {
        Some(MigrationEvent::PhaseChange { phase, .. }) => {
            assert_eq!(*phase, MigrationPhase::Complete)
        }
        other => panic!("unexpected last event: {:?}", other),
    }
    assert_eq!(events[0].as_phase(), Some(MigrationPhase::Initializing));
}
