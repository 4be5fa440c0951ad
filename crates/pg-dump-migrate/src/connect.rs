//! Short-lived PostgreSQL connections with TLS mode handling.
//!
//! Every component that talks to a server directly (probe, stats, target
//! preparation) opens exactly one connection through [`connect`] and drops it
//! when done. The connect phase is bounded by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, Config as PgConfig, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::config::{validate_connection, ConnectionConfig};
use crate::error::{MigrateError, Result};

/// SSL verification modes for PostgreSQL connections.
///
/// These modes match PostgreSQL's standard `sslmode` parameter and are also
/// forwarded to pg_dump / pg_restore through `PGSSLMODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// No SSL/TLS (plain TCP connection).
    #[default]
    Disable,
    /// Use SSL but don't verify server certificate.
    Require,
    /// Verify server certificate against CA.
    VerifyCa,
    /// Full certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    /// Parse an SSL mode from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    /// Value understood by libpq's `PGSSLMODE`.
    pub fn as_libpq(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Check if this mode requires TLS.
    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = match self {
            SslMode::Disable => {
                return Err(MigrateError::Config(
                    "Cannot build TLS config for ssl_mode=disable".into(),
                ));
            }
            SslMode::Require => {
                warn!(
                    "ssl_mode=require enables TLS but does NOT verify the server certificate; \
                     use verify-full for production servers"
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            // rustls always checks the hostname, so verify-ca behaves like verify-full
            SslMode::VerifyCa | SslMode::VerifyFull => ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        };

        Ok(config)
    }
}

/// Open a single connection to `conn`, bounded by `timeout`.
///
/// The returned client owns the connection; dropping it closes the session.
pub async fn connect(conn: &ConnectionConfig, timeout: Duration) -> Result<Client> {
    validate_connection("connection", conn)?;
    let ssl_mode = SslMode::parse(&conn.ssl_mode)?;

    let mut pg_config = PgConfig::new();
    pg_config
        .host(&conn.host)
        .port(conn.port)
        .dbname(&conn.database)
        .user(&conn.user)
        .password(&conn.password)
        .application_name("pg-dump-migrate")
        .connect_timeout(timeout);

    debug!("Connecting to {} (ssl_mode={})", conn, ssl_mode.as_libpq());

    let attempt = async {
        if ssl_mode.requires_tls() {
            let tls = MakeRustlsConnect::new(ssl_mode.client_config()?);
            connect_with(&pg_config, tls).await
        } else {
            connect_with(&pg_config, NoTls).await
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::connectivity(
            conn.endpoint(),
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

async fn connect_with<T>(pg_config: &PgConfig, tls: T) -> Result<Client>
where
    T: MakeTlsConnect<Socket> + Send + 'static,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let endpoint = describe_endpoint(pg_config);
    let (client, connection) = pg_config
        .connect(tls)
        .await
        .map_err(|e| MigrateError::connectivity(endpoint, connect_diagnostic(&e)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("PostgreSQL connection closed with error: {}", e);
        }
    });

    Ok(client)
}

fn describe_endpoint(pg_config: &PgConfig) -> String {
    let host = match pg_config.get_hosts().first() {
        Some(tokio_postgres::config::Host::Tcp(host)) => host.clone(),
        #[cfg(unix)]
        Some(tokio_postgres::config::Host::Unix(path)) => path.display().to_string(),
        None => "localhost".to_string(),
    };
    let port = pg_config.get_ports().first().copied().unwrap_or(5432);
    format!("{}:{}", host, port)
}

/// Human-readable diagnostic for a driver error, preferring the server's
/// message (bad password, unknown database) over the generic wrapper text.
pub(crate) fn connect_diagnostic(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        return db.message().to_string();
    }
    match std::error::Error::source(err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

/// Certificate verifier that accepts any certificate, used for `ssl_mode=require`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
