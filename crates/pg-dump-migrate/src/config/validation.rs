//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::connect::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("target", &config.target)?;

    // Cannot migrate onto the source itself
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    if config.migration.connect_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration.connect_timeout_secs must be at least 1".into(),
        ));
    }
    if config.migration.pg_dump_path.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.pg_dump_path cannot be empty".into(),
        ));
    }
    if config.migration.pg_restore_path.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.pg_restore_path cannot be empty".into(),
        ));
    }

    Ok(())
}

/// Validate a single endpoint. Every network operation calls this first.
pub fn validate_connection(label: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", label)));
    }
    if conn.port == 0 {
        return Err(MigrateError::Config(format!(
            "{}.port must be between 1 and 65535",
            label
        )));
    }
    if conn.database.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            label
        )));
    }
    if conn.user.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", label)));
    }
    if conn.password.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.password is required",
            label
        )));
    }
    SslMode::parse(&conn.ssl_mode)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    fn valid_config() -> Config {
        Config {
            source: ConnectionConfig::new("src.internal", "app", "postgres", "password"),
            target: ConnectionConfig::new("dst.internal", "app", "postgres", "password"),
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = "  ".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target.user"));
    }

    #[test]
    fn test_missing_password_rejected() {
        let conn = ConnectionConfig::new("h", "d", "u", "");
        let err = validate_connection("source", &conn).unwrap_err();
        assert!(err.to_string().contains("source.password is required"));

        let mut config = valid_config();
        config.target.password.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid_config();
        config.target.port = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.source.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.host = config.source.host.clone();
        assert!(validate(&config).is_err());

        // Same host, different port is a different server
        config.target.port = 5433;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid_config();
        config.migration.connect_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_config_debug_redacts_both_passwords() {
        let mut config = valid_config();
        config.source.password = "source_pw_456".to_string();
        config.target.password = "target_pw_789".to_string();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("source_pw_456"));
        assert!(!debug_output.contains("target_pw_789"));
    }
}
