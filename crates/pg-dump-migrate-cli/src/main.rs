//! pg-dump-migrate CLI - one-shot PostgreSQL migration via pg_dump/pg_restore.

mod wizard;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::{Input, Password};
use pg_dump_migrate::error::{EXIT_CONNECTIVITY_ERROR, EXIT_PREFLIGHT_ERROR};
use pg_dump_migrate::profiles::DEFAULT_ENVIRONMENT;
use pg_dump_migrate::{
    Config, ConnectionConfig, FnSink, MigrateError, MigrationConfig, MigrationEvent, NewProfile,
    Orchestrator, PreflightReport, ProfileStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-dump-migrate")]
#[command(about = "One-shot PostgreSQL migration using pg_dump and pg_restore")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the saved connection profiles database
    #[arg(long, default_value = "connections.db")]
    profiles_db: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json (also applies to the migration event stream)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

/// Endpoint selection shared by commands that load a configuration.
#[derive(Args, Clone, Default)]
struct Overrides {
    /// Use a saved profile as the source
    #[arg(long)]
    source_profile: Option<String>,

    /// Use a saved profile as the target
    #[arg(long)]
    target_profile: Option<String>,

    /// Migrate the schema only, without data
    #[arg(long)]
    schema_only: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Side {
    Source,
    Target,
    Both,
}

impl Side {
    fn includes_source(self) -> bool {
        matches!(self, Side::Source | Side::Both)
    }

    fn includes_target(self) -> bool {
        matches!(self, Side::Target | Side::Both)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the source, drop the target's public schema and restore into it
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Proceed even if preflight checks fail
        #[arg(long)]
        force: bool,

        /// Target database name, confirming the destructive drop non-interactively
        #[arg(long)]
        confirm_target: Option<String>,
    },

    /// Check local tools, connectivity and version compatibility
    Preflight {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Test database connections
    TestConnection {
        #[arg(value_enum, default_value = "both")]
        side: Side,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show schema, table and approximate row counts
    Stats {
        #[arg(value_enum, default_value = "both")]
        side: Side,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Create or edit a configuration file interactively
    Init {
        /// Output path for configuration file [default: config.yaml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force overwrite existing file without confirmation
        #[arg(long, short)]
        force: bool,
    },

    /// Manage saved connection profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List saved profiles grouped by environment
    List,

    /// Save a new profile
    Add {
        /// Unique profile name
        name: String,

        /// Environment tag
        #[arg(long, default_value = DEFAULT_ENVIRONMENT)]
        environment: String,

        #[arg(long)]
        host: String,

        #[arg(long, default_value = "5432")]
        port: u16,

        #[arg(long)]
        user: String,

        #[arg(long)]
        database: String,

        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,

        /// SSL mode: disable, require, verify-ca, verify-full
        #[arg(long, default_value = "disable")]
        ssl_mode: String,
    },

    /// Delete a profile by id
    Remove {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    // No logging setup for wizard - keeps terminal clean for interactive prompts
    if let Commands::Init { output, force } = &cli.command {
        let output_path = output.clone().unwrap_or_else(|| PathBuf::from("config.yaml"));
        wizard::run_wizard(&output_path, &cli.profiles_db, *force)
            .await
            .map_err(|e| MigrateError::Config(e.to_string()))?;
        return Ok(ExitCode::SUCCESS);
    }

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    match &cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Profiles { command } => run_profiles(&cli, command),

        Commands::Run {
            overrides,
            force,
            confirm_target,
        } => {
            let config = load_config(&cli, overrides)?;
            run_migration(
                &cli,
                config,
                *force,
                confirm_target.as_deref(),
                setup_signal_handler,
            )
            .await
        }

        Commands::Preflight { overrides } => {
            let orchestrator = Orchestrator::new(load_config(&cli, overrides)?)?;
            let report = orchestrator.preflight().await;
            print_report(&cli, &report)?;
            Ok(if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PREFLIGHT_ERROR)
            })
        }

        Commands::TestConnection { side, overrides } => {
            let orchestrator = Orchestrator::new(load_config(&cli, overrides)?)?;
            let config = orchestrator.config();

            let mut results = serde_json::Map::new();
            let mut healthy = true;
            for (label, conn, wanted) in [
                ("source", &config.source, side.includes_source()),
                ("target", &config.target, side.includes_target()),
            ] {
                if !wanted {
                    continue;
                }
                let result = orchestrator.test_connection(conn).await;
                healthy &= result.ok;
                if !cli.output_json {
                    println!(
                        "{} {}: {}",
                        if result.ok { "OK    " } else { "FAILED" },
                        label,
                        result.info
                    );
                }
                results.insert(label.to_string(), serde_json::to_value(&result)?);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_CONNECTIVITY_ERROR)
            })
        }

        Commands::Stats { side, overrides } => {
            let orchestrator = Orchestrator::new(load_config(&cli, overrides)?)?;

            let mut results = serde_json::Map::new();
            if side.includes_source() {
                let stats = orchestrator.source_stats().await?;
                if !cli.output_json {
                    println!("Source {}: {}", orchestrator.config().source, stats);
                }
                results.insert("source".into(), serde_json::to_value(stats)?);
            }
            if side.includes_target() {
                let stats = orchestrator.target_stats().await?;
                if !cli.output_json {
                    println!("Target {}: {}", orchestrator.config().target, stats);
                }
                results.insert("target".into(), serde_json::to_value(stats)?);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Preflight, confirm, then migrate. Signal handling is installed only after
/// confirmation so that Ctrl-C at the prompt still aborts the process.
async fn run_migration<F>(
    cli: &Cli,
    config: Config,
    force: bool,
    confirm_target: Option<&str>,
    install_signal_handler: F,
) -> Result<ExitCode, MigrateError>
where
    F: FnOnce() -> Result<CancellationToken, MigrateError>,
{
    let orchestrator = Orchestrator::new(config)?;

    let report = orchestrator.preflight().await;
    print_report(cli, &report)?;
    if !report.all_passed() {
        if !force {
            eprintln!("Preflight checks failed. Fix the issues above or pass --force.");
            return Ok(ExitCode::from(EXIT_PREFLIGHT_ERROR));
        }
        eprintln!("Preflight checks failed; continuing because --force was given.");
    }

    confirm_destruction(orchestrator.config(), confirm_target)?;
    let cancel_token = install_signal_handler()?;

    let json_events = cli.log_format == "json";
    let to_stderr = cli.output_json;
    let sink = FnSink(move |event: MigrationEvent| {
        let line = if json_events {
            serde_json::to_string(&event.to_record()).unwrap_or_else(|_| event.to_string())
        } else {
            event.to_string()
        };
        if to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    });

    let result = orchestrator.run(&sink, &cancel_token).await;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else if result.success {
        println!("\nMigration completed!");
        println!("  Run ID: {}", result.run_id);
        println!("  Duration: {:.2}s", result.duration_seconds);
        println!(
            "  Mode: {}",
            if result.schema_only {
                "schema only"
            } else {
                "schema + data"
            }
        );
    } else {
        eprintln!("\nMigration failed: {}", result.message);
        eprintln!("  Run ID: {}", result.run_id);
        eprintln!("  Duration: {:.2}s", result.duration_seconds);
    }

    Ok(ExitCode::from(result.exit_code))
}

/// Require the target database name to be typed back before anything is dropped.
fn confirm_destruction(config: &Config, confirm_target: Option<&str>) -> Result<(), MigrateError> {
    let expected = &config.target.database;

    let typed = match confirm_target {
        Some(name) => name.to_string(),
        None => {
            eprintln!(
                "\nWARNING: every table, view and sequence in the public schema of {} will be dropped.",
                config.target
            );
            Input::<String>::new()
                .with_prompt(format!("Type the target database name ({}) to continue", expected))
                .allow_empty(true)
                .interact_text()
                .map_err(|e| {
                    MigrateError::Config(format!(
                        "confirmation required (use --confirm-target in non-interactive runs): {}",
                        e
                    ))
                })?
        }
    };

    if typed.trim() != expected {
        return Err(MigrateError::Config(format!(
            "confirmation '{}' does not match target database '{}'",
            typed.trim(),
            expected
        )));
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &PreflightReport) -> Result<(), MigrateError> {
    if cli.output_json {
        // Keep stdout for the final result of `run`
        eprintln!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Preflight checks:");
    for check in &report.checks {
        println!("  {}", check);
    }
    println!();
    Ok(())
}

/// Load the config file and apply command-line overrides.
///
/// When both endpoints come from profiles the config file is optional.
fn load_config(cli: &Cli, overrides: &Overrides) -> Result<Config, MigrateError> {
    let from_profiles = overrides.source_profile.is_some() && overrides.target_profile.is_some();

    let mut config = if from_profiles && !cli.config.exists() {
        let store = ProfileStore::open(&cli.profiles_db)?;
        Config {
            source: profile_connection(&store, overrides.source_profile.as_deref())?,
            target: profile_connection(&store, overrides.target_profile.as_deref())?,
            migration: MigrationConfig::default(),
        }
    } else {
        let mut config = Config::load(&cli.config)?;
        info!("Loaded configuration from {:?}", cli.config);
        if overrides.source_profile.is_some() || overrides.target_profile.is_some() {
            let store = ProfileStore::open(&cli.profiles_db)?;
            if overrides.source_profile.is_some() {
                config.source = profile_connection(&store, overrides.source_profile.as_deref())?;
            }
            if overrides.target_profile.is_some() {
                config.target = profile_connection(&store, overrides.target_profile.as_deref())?;
            }
        }
        config
    };

    if overrides.schema_only {
        config.migration.schema_only = true;
    }

    config.validate()?;
    Ok(config)
}

fn profile_connection(
    store: &ProfileStore,
    name: Option<&str>,
) -> Result<ConnectionConfig, MigrateError> {
    let name = name.unwrap_or_default();
    store
        .find(name)?
        .map(|p| p.connection)
        .ok_or_else(|| MigrateError::Config(format!("no saved profile named '{}'", name)))
}

fn run_profiles(cli: &Cli, command: &ProfileCommands) -> Result<ExitCode, MigrateError> {
    match command {
        ProfileCommands::List => {
            let store = open_store(&cli.profiles_db)?;
            let grouped = store.list_grouped_by_environment()?;
            if cli.output_json {
                let listing: serde_json::Map<_, _> = grouped
                    .iter()
                    .map(|(environment, profiles)| {
                        let entries = profiles
                            .iter()
                            .map(|p| {
                                serde_json::json!({
                                    "id": p.id,
                                    "name": p.name,
                                    "host": p.connection.host,
                                    "port": p.connection.port,
                                    "database": p.connection.database,
                                    "user": p.connection.user,
                                    "ssl_mode": p.connection.ssl_mode,
                                })
                            })
                            .collect();
                        (environment.clone(), serde_json::Value::Array(entries))
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else if grouped.is_empty() {
                println!("No saved profiles in {}", cli.profiles_db.display());
            } else {
                for (environment, profiles) in &grouped {
                    println!("{}:", environment);
                    for p in profiles {
                        println!(
                            "  #{} {} - {} (sslmode={})",
                            p.id, p.name, p.connection, p.connection.ssl_mode
                        );
                    }
                }
            }
        }

        ProfileCommands::Add {
            name,
            environment,
            host,
            port,
            user,
            database,
            password,
            ssl_mode,
        } => {
            let password = match password {
                Some(p) => p.clone(),
                None => Password::new()
                    .with_prompt(format!("Password for {}", user))
                    .interact()
                    .map_err(|e| MigrateError::Config(format!("password prompt failed: {}", e)))?,
            };
            let mut connection = ConnectionConfig::new(host, database, user, password);
            connection.port = *port;
            connection.ssl_mode = ssl_mode.clone();

            let store = open_store(&cli.profiles_db)?;
            let id = store.save(&NewProfile::new(name, connection).environment(environment))?;
            println!("Saved profile '{}' as #{}", name, id);
        }

        ProfileCommands::Remove { id } => {
            let store = open_store(&cli.profiles_db)?;
            if store.delete(*id)? {
                println!("Removed profile #{}", id);
            } else {
                return Err(MigrateError::Config(format!("no saved profile with id {}", id)));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn open_store(path: &Path) -> Result<ProfileStore, MigrateError> {
    ProfileStore::open(path)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // stdout carries the event stream and results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM. A running pg_dump/pg_restore is
/// killed and the temporary dump removed before the process exits.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping migration and cleaning up...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping migration and cleaning up...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
