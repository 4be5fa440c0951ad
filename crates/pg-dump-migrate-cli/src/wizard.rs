//! Interactive configuration wizard for creating/editing config files.

use dialoguer::{Confirm, Input, Password, Select};
use pg_dump_migrate::{
    test_connection, Config, ConnectionConfig, ConnectionProfile, MigrationConfig, ProfileStore,
};
use std::path::{Path, PathBuf};

/// Result type for wizard operations.
pub type WizardResult<T> = Result<T, WizardError>;

/// Errors that can occur during wizard execution.
#[derive(Debug)]
pub enum WizardError {
    /// User cancelled the wizard.
    Cancelled,
    /// IO error (file read/write).
    Io(std::io::Error),
    /// Config serialization error.
    Config(String),
    /// Validation error.
    Validation(String),
}

impl std::fmt::Display for WizardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Configuration cancelled"),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Config(msg) => write!(f, "Config error: {}", msg),
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for WizardError {}

impl From<std::io::Error> for WizardError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<dialoguer::Error> for WizardError {
    fn from(e: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

/// Action to take when config file already exists.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExistingFileAction {
    Edit,
    Overwrite,
    Abort,
}

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

/// Run the configuration wizard.
pub async fn run_wizard(output: &Path, profiles_db: &Path, force: bool) -> WizardResult<()> {
    println!();
    println!("PostgreSQL Dump/Restore Migration - Configuration Wizard");
    println!("========================================================");
    println!();

    let existing_config = if output.exists() && !force {
        match prompt_existing_file_action(output)? {
            ExistingFileAction::Edit => {
                println!("Loading existing configuration...");
                match Config::load(output) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        println!("Warning: Could not parse existing file: {}", e);
                        println!("Starting with fresh configuration.\n");
                        None
                    }
                }
            }
            ExistingFileAction::Overwrite => {
                println!("Starting with fresh configuration.\n");
                None
            }
            ExistingFileAction::Abort => return Err(WizardError::Cancelled),
        }
    } else {
        None
    };

    // Saved profiles are offered as a shortcut, but a missing store is not an error
    let profiles = load_profiles(profiles_db);

    let source = prompt_connection(
        "Source Database (dumped with pg_dump)",
        existing_config.as_ref().map(|c| &c.source),
        &profiles,
    )?;
    let target = prompt_connection(
        "Target Database (public schema is dropped, then restored)",
        existing_config.as_ref().map(|c| &c.target),
        &profiles,
    )?;
    let migration = prompt_migration_config(existing_config.as_ref().map(|c| &c.migration))?;

    let config = Config {
        source,
        target,
        migration,
    };

    if let Err(e) = config.validate() {
        return Err(WizardError::Validation(e.to_string()));
    }

    print_summary(&config);

    if prompt_connection_test()? {
        test_connections(&config).await;
    }

    if !prompt_save_confirm(output)? {
        return Err(WizardError::Cancelled);
    }

    write_config(&config, output)?;

    println!("\nConfiguration saved to {}", output.display());
    println!("Run 'pg-dump-migrate preflight' to check it, then 'pg-dump-migrate run'.");

    Ok(())
}

fn load_profiles(path: &Path) -> Vec<ConnectionProfile> {
    if !path.exists() {
        return Vec::new();
    }
    ProfileStore::open(path)
        .and_then(|store| store.list())
        .unwrap_or_else(|e| {
            println!("Warning: Could not read saved profiles: {}\n", e);
            Vec::new()
        })
}

fn prompt_existing_file_action(path: &Path) -> WizardResult<ExistingFileAction> {
    println!("File already exists: {}\n", path.display());

    let options = &["Edit existing configuration", "Overwrite with new", "Abort"];
    let selection = Select::new()
        .with_prompt("What would you like to do?")
        .items(options)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => ExistingFileAction::Edit,
        1 => ExistingFileAction::Overwrite,
        _ => ExistingFileAction::Abort,
    })
}

fn prompt_connection(
    title: &str,
    existing: Option<&ConnectionConfig>,
    profiles: &[ConnectionProfile],
) -> WizardResult<ConnectionConfig> {
    println!("{}", title);
    println!("{}", "-".repeat(title.len()));

    if !profiles.is_empty() {
        let mut options = vec!["Enter connection details".to_string()];
        options.extend(
            profiles
                .iter()
                .map(|p| format!("[{}] {} ({})", p.environment, p.name, p.connection)),
        );
        let selection = Select::new()
            .with_prompt("  Use a saved profile?")
            .items(&options)
            .default(0)
            .interact()?;
        if selection > 0 {
            println!();
            return Ok(profiles[selection - 1].connection.clone());
        }
    }

    let host: String = Input::new()
        .with_prompt("  Host")
        .default(
            existing
                .map(|c| c.host.clone())
                .unwrap_or_else(|| "localhost".to_string()),
        )
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("  Port")
        .default(existing.map(|c| c.port).unwrap_or(5432))
        .interact_text()?;

    let database: String = Input::new()
        .with_prompt("  Database")
        .default(existing.map(|c| c.database.clone()).unwrap_or_default())
        .interact_text()?;

    let user: String = Input::new()
        .with_prompt("  User")
        .default(
            existing
                .map(|c| c.user.clone())
                .unwrap_or_else(|| "postgres".to_string()),
        )
        .interact_text()?;

    let password = prompt_password("  Password", existing.is_some())?;
    let password = if password.is_empty() {
        existing.map(|e| e.password.clone()).unwrap_or(password)
    } else {
        password
    };

    let default_idx = existing
        .and_then(|c| SSL_MODES.iter().position(|&m| m == c.ssl_mode))
        .unwrap_or(0);
    let ssl_mode_idx = Select::new()
        .with_prompt("  SSL Mode")
        .items(SSL_MODES)
        .default(default_idx)
        .interact()?;

    println!();

    Ok(ConnectionConfig {
        host,
        port,
        database,
        user,
        password,
        ssl_mode: SSL_MODES[ssl_mode_idx].to_string(),
    })
}

fn prompt_migration_config(existing: Option<&MigrationConfig>) -> WizardResult<MigrationConfig> {
    println!("Migration Settings");
    println!("------------------");

    let mut config = existing.cloned().unwrap_or_default();

    let modes = &["Schema + data", "Schema only"];
    let mode_idx = Select::new()
        .with_prompt("  Migration mode")
        .items(modes)
        .default(usize::from(config.schema_only))
        .interact()?;
    config.schema_only = mode_idx == 1;

    config.no_owner = Confirm::new()
        .with_prompt("  Skip restoring object ownership (--no-owner)")
        .default(config.no_owner)
        .interact()?;

    config.pg_dump_path = Input::new()
        .with_prompt("  pg_dump executable")
        .default(config.pg_dump_path.clone())
        .interact_text()?;

    config.pg_restore_path = Input::new()
        .with_prompt("  pg_restore executable")
        .default(config.pg_restore_path.clone())
        .interact_text()?;

    let work_dir: String = Input::new()
        .with_prompt("  Directory for the temporary dump (blank for system temp)")
        .default(
            config
                .work_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
        .allow_empty(true)
        .interact_text()?;
    config.work_dir = match work_dir.trim() {
        "" => None,
        dir => Some(PathBuf::from(dir)),
    };

    println!();
    Ok(config)
}

fn prompt_password(prompt: &str, has_existing: bool) -> WizardResult<String> {
    let input = if has_existing {
        Password::new()
            .with_prompt(format!("{} (blank to keep existing)", prompt))
            .allow_empty_password(true)
            .interact()?
    } else {
        Password::new().with_prompt(prompt).interact()?
    };
    Ok(input)
}

fn print_summary(config: &Config) {
    println!("Configuration Summary");
    println!("---------------------");
    println!("  Source: {} (sslmode={})", config.source, config.source.ssl_mode);
    println!("  Target: {} (sslmode={})", config.target, config.target.ssl_mode);
    println!(
        "  Mode: {}",
        if config.migration.schema_only {
            "schema only"
        } else {
            "schema + data"
        }
    );
    if config.migration.no_owner {
        println!("  Ownership: not restored");
    }
    println!(
        "  Tools: {}, {}",
        config.migration.pg_dump_path, config.migration.pg_restore_path
    );
    println!();
}

fn prompt_connection_test() -> WizardResult<bool> {
    Ok(Confirm::new()
        .with_prompt("Test database connections?")
        .default(true)
        .interact()?)
}

async fn test_connections(config: &Config) {
    println!("\nTesting connections...");
    let timeout = config.migration.connect_timeout();

    for (label, conn) in [("Source", &config.source), ("Target", &config.target)] {
        let result = test_connection(conn, timeout).await;
        if result.ok {
            println!("  {}: OK ({})", label, result.info);
        } else {
            println!("  {}: FAILED - {}", label, result.info);
        }
    }
    println!();
}

fn prompt_save_confirm(path: &Path) -> WizardResult<bool> {
    Ok(Confirm::new()
        .with_prompt(format!("Save configuration to {}?", path.display()))
        .default(true)
        .interact()?)
}

fn write_config(config: &Config, path: &Path) -> WizardResult<()> {
    let yaml = config
        .to_yaml()
        .map_err(|e| WizardError::Config(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, yaml)?;

    // Config holds passwords
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
