// Privileged account bootstrap.

use super::connection::{ConnectionParams, MySqlConnector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use sqlx::mysql::MySqlConnection;
use sqlx::Connection;
use std::fmt;
use tokio::time::{timeout, Duration};

pub const SUPER_ADMIN_ROLE: &str = "super_admin";

/// Account to create. `password_hash` is already a bcrypt string; plaintext never gets here.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

impl fmt::Debug for NewAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAdmin")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCreation {
    Created,
    /// An account with the same e-mail exists; treated as success so retries are safe.
    AlreadyExists,
}

#[async_trait]
pub trait AdminAccounts: Send + Sync {
    async fn create_super_admin(
        &self,
        params: &ConnectionParams,
        admin: &NewAdmin,
    ) -> Result<AdminCreation>;
}

/// Inserts into `admins (name, email, password, role, is_active, created_at, updated_at)`.
pub struct MySqlAdminAccounts {
    connector: MySqlConnector,
    query_timeout: Duration,
}

impl MySqlAdminAccounts {
    pub fn new(connector: MySqlConnector, query_timeout: Duration) -> Self {
        Self {
            connector,
            query_timeout,
        }
    }
}

#[async_trait]
impl AdminAccounts for MySqlAdminAccounts {
    async fn create_super_admin(
        &self,
        params: &ConnectionParams,
        admin: &NewAdmin,
    ) -> Result<AdminCreation> {
        let mut conn = self
            .connector
            .connect_database(params)
            .await
            .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message, e.internal_details))?;

        let result = match timeout(self.query_timeout, insert_admin(&mut conn, admin)).await {
            Ok(r) => r,
            Err(_) => Err(anyhow::anyhow!(
                "Admin account creation timed out after {}s",
                self.query_timeout.as_secs()
            )),
        };
        let _ = conn.close().await;

        if let Ok(outcome) = &result {
            info!(
                "[PHASE: finalize] [STEP: create_admin] Admin account {} ({:?})",
                crate::utils::logging::mask_sensitive(&admin.email),
                outcome
            );
        }
        result
    }
}

async fn insert_admin(conn: &mut MySqlConnection, admin: &NewAdmin) -> Result<AdminCreation> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins WHERE email = ?")
        .bind(&admin.email)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to look up existing admin accounts")?;
    if existing > 0 {
        return Ok(AdminCreation::AlreadyExists);
    }

    let inserted = sqlx::query(
        "INSERT INTO admins (name, email, password, role, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 1, NOW(), NOW())",
    )
    .bind(&admin.name)
    .bind(&admin.email)
    .bind(&admin.password_hash)
    .bind(SUPER_ADMIN_ROLE)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => Ok(AdminCreation::Created),
        // Lost a race with another insert of the same e-mail (1062).
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Ok(AdminCreation::AlreadyExists)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to insert admin account")),
    }
}
