// Database collaborator
//
// `DbConnector` is the seam the wizard probes through. The MySQL implementation talks to the
// server over sqlx; tests swap in stubs so connection failure paths stay deterministic.

use crate::database::provisioning::{create_database_stmt, validate_db_name};
use crate::models::steps::{fields, supplied, FieldSet};
use crate::utils::logging::mask_connection_params;
use async_trait::async_trait;
use log::{debug, info};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;

pub const UNICODE_CHARSET: &str = "utf8mb4";

/// Credentials collected by the database step.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl ConnectionParams {
    /// Read the database step's fields. The password may be empty.
    pub fn from_fields(f: &FieldSet) -> Result<Self, String> {
        let host = supplied(f, fields::DB_HOST).ok_or("Database host is required.")?;
        let port_raw = supplied(f, fields::DB_PORT).ok_or("Database port is required.")?;
        let port = port_raw
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| format!("Database port must be a number between 1 and 65535 (got '{}').", port_raw))?;
        let database = supplied(f, fields::DB_DATABASE).ok_or("Database name is required.")?;
        let username = supplied(f, fields::DB_USERNAME).ok_or("Database username is required.")?;
        Ok(Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
            username: username.to_string(),
            password: f.get(fields::DB_PASSWORD).cloned().unwrap_or_default(),
        })
    }

    fn server_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .charset(UNICODE_CHARSET)
    }

    fn database_options(&self) -> MySqlConnectOptions {
        self.server_options().database(&self.database)
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mask_connection_params(
            &self.host,
            self.port,
            &self.username,
            Some(&self.database),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// Host unreachable, refused, DNS failure. Worth retrying.
    Unreachable,
    TimedOut,
    /// Server rejected the credentials.
    AccessDenied,
    /// Connected, but the database could not be created or selected.
    CreateFailed,
    InvalidInput,
}

impl ConnectErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectErrorKind::Unreachable | ConnectErrorKind::TimedOut)
    }
}

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    /// Safe to show to the operator.
    pub user_message: String,
    /// For logging only (credentials already masked).
    pub internal_details: String,
}

impl ConnectError {
    pub fn new(
        kind: ConnectErrorKind,
        user_message: impl Into<String>,
        internal_details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_message: user_message.into(),
            internal_details: internal_details.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            ConnectErrorKind::TimedOut,
            "Connection timed out. Check the host, port and firewall.",
            format!("Connection attempt timed out after {}ms", after.as_millis()),
        )
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl std::error::Error for ConnectError {}

#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Connect without selecting a database, then create `params.database` if absent.
    /// Succeeds silently when the database already exists.
    async fn ensure_database(&self, params: &ConnectionParams) -> Result<(), ConnectError>;

    /// Per-attempt timeout.
    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn max_retries(&self) -> u32 {
        3
    }
}

fn classify(e: &sqlx::Error, connected: bool) -> ConnectError {
    match e {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            // 1044/1045: access denied; 28000: SQLSTATE for invalid authorization.
            if code == "1045" || code == "1044" || code == "28000" {
                ConnectError::new(
                    ConnectErrorKind::AccessDenied,
                    "Access denied. Verify the database username and password.",
                    format!("Database error {}: {}", code, db.message()),
                )
            } else if connected {
                ConnectError::new(
                    ConnectErrorKind::CreateFailed,
                    "Connected, but the database could not be created. Check the user's privileges.",
                    format!("Database error {}: {}", code, db.message()),
                )
            } else {
                ConnectError::new(
                    ConnectErrorKind::Unreachable,
                    "Unable to connect to the database server.",
                    format!("Database error {}: {}", code, db.message()),
                )
            }
        }
        sqlx::Error::Io(io) => ConnectError::new(
            ConnectErrorKind::Unreachable,
            "Unable to reach the database server. Verify host, port and network access.",
            format!("I/O error: {}", io),
        ),
        sqlx::Error::Tls(t) => ConnectError::new(
            ConnectErrorKind::Unreachable,
            "Unable to establish a secure connection to the database server.",
            format!("TLS error: {}", t),
        ),
        other => ConnectError::new(
            if connected {
                ConnectErrorKind::CreateFailed
            } else {
                ConnectErrorKind::Unreachable
            },
            "Database connection failed.",
            format!("{}", other),
        ),
    }
}

/// MySQL connector over sqlx. Character set is pinned to utf8mb4.
pub struct MySqlConnector {
    timeout: Duration,
    retries: u32,
}

impl MySqlConnector {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries: retries.max(1),
        }
    }

    /// Connection with the target database selected, for post-provisioning queries.
    pub async fn connect_database(
        &self,
        params: &ConnectionParams,
    ) -> Result<MySqlConnection, ConnectError> {
        debug!(
            "[PHASE: database] [STEP: connect] Connecting to {:?}",
            params
        );
        match timeout(self.timeout, params.database_options().connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(classify(&e, false)),
            Err(_) => Err(ConnectError::timed_out(self.timeout)),
        }
    }
}

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn ensure_database(&self, params: &ConnectionParams) -> Result<(), ConnectError> {
        validate_db_name(&params.database).map_err(|m| {
            ConnectError::new(ConnectErrorKind::InvalidInput, m, "rejected database name")
        })?;

        let mut conn = match timeout(self.timeout, params.server_options().connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(classify(&e, false)),
            Err(_) => return Err(ConnectError::timed_out(self.timeout)),
        };

        let stmt = create_database_stmt(&params.database);
        let created = timeout(self.timeout, sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&stmt))).await;
        let _ = conn.close().await;

        match created {
            Ok(Ok(_)) => {
                info!(
                    "[PHASE: database] [STEP: ensure_database] Database ready ({:?})",
                    params
                );
                Ok(())
            }
            Ok(Err(e)) => Err(classify(&e, true)),
            Err(_) => Err(ConnectError::timed_out(self.timeout)),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    fn max_retries(&self) -> u32 {
        self.retries
    }
}
