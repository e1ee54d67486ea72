//! SQLite-backed identity provider.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::watch;
use tracing::{debug, info};

use super::model::{Profile, Session, UserId};
use super::provider::{AuthError, IdentityProvider};
use crate::Identity;

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

/// Identity provider backed by a SQLite user/profile registry.
///
/// One instance models one device's session: signing in replaces whatever
/// session the instance held before, and the watch channel publishes every
/// change. Credentials are stored as-is; the registry is a stand-in for a
/// real identity service, not a hardened credential vault.
pub struct RegistryProvider {
    pool: SqlitePool,
    sessions: watch::Sender<Option<Session>>,
}

impl RegistryProvider {
    /// Create a new provider with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self, AuthError> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory provider for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self, AuthError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, AuthError> {
        let (sessions, _) = watch::channel(None);
        let provider = Self { pool, sessions };
        provider.initialize().await?;
        Ok(provider)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<(), AuthError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Registers a new user and its profile row in one transaction.
    ///
    /// Registration does not sign the user in; call [`Self::sign_in`]
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmailTaken`] for a duplicate email,
    /// [`AuthError::WeakPassword`] for a short password, or a database
    /// error. A failure to create the profile row fails the whole
    /// registration.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<UserId, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN));
        }

        let existing = sqlx::query(r"SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailTaken(email.to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(r"INSERT INTO users (email, password) VALUES (?, ?)")
            .bind(email)
            .bind(password)
            .execute(&mut *tx)
            .await?;
        let user_id = UserId::new(result.last_insert_rowid());

        sqlx::query(r"INSERT INTO profiles (user_id, username) VALUES (?, ?)")
            .bind(user_id.0)
            .bind(username)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(user = %user_id, username, "registered new correspondent");
        Ok(user_id)
    }

    /// Verifies credentials and establishes a session.
    ///
    /// The new session replaces any previous one and is published on the
    /// session watch channel.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] on a mismatch, or a
    /// database error if the lookup fails.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let row = sqlx::query(r"SELECT id, password FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let stored: String = row.get("password");
        if stored != password {
            return Err(AuthError::InvalidCredentials);
        }

        let session = Session {
            user_id: UserId::new(row.get("id")),
            email: email.to_string(),
        };

        debug!(user = %session.user_id, "session established");
        self.sessions.send_replace(Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for RegistryProvider {
    fn current_session(&self) -> Option<Session> {
        self.sessions.borrow().clone()
    }

    fn subscribe_sessions(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    async fn profile(&self, user_id: UserId) -> Result<Profile, AuthError> {
        let row = sqlx::query(r"SELECT username FROM profiles WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::ProfileNotFound(user_id))?;

        Ok(Profile {
            user_id,
            username: Identity::from(row.get::<String, _>("username")),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        debug!("session ended");
        self.sessions.send_replace(None);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = self.current_session().ok_or(AuthError::NotSignedIn)?;

        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN));
        }

        sqlx::query(r"UPDATE users SET password = ? WHERE id = ?")
            .bind(new_password)
            .bind(session.user_id.0)
            .execute(&self.pool)
            .await?;

        info!(user = %session.user_id, "password updated");
        Ok(())
    }
}
