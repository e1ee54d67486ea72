//! The identity provider contract.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::model::{Profile, Session, UserId};

/// Errors that can occur in identity provider operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Email or password did not match a registered user.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The email is already registered.
    #[error("email already registered: {0}")]
    EmailTaken(String),

    /// The password does not meet the minimum length.
    #[error("password must be at least {0} characters long")]
    WeakPassword(usize),

    /// No profile row exists for the user yet.
    #[error("no profile provisioned for user {0}")]
    ProfileNotFound(UserId),

    /// The operation requires an active session.
    #[error("not signed in")]
    NotSignedIn,
}

/// Session lifecycle and profile lookup.
///
/// The synchronization engine depends only on "session present/absent" plus
/// the profile lookup; everything else exists for account management.
/// Session changes are published on a watch channel rather than delivered
/// through callbacks, so consumers can fold them into their own event loop.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the current session, if any.
    fn current_session(&self) -> Option<Session>;

    /// Subscribes to session changes (sign-in, sign-out, replacement).
    ///
    /// The receiver's current value is always the latest session state.
    fn subscribe_sessions(&self) -> watch::Receiver<Option<Session>>;

    /// Looks up the display identity for a user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProfileNotFound`] if the profile row has not
    /// been provisioned, or a database error if the lookup fails.
    async fn profile(&self, user_id: UserId) -> Result<Profile, AuthError>;

    /// Ends the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to record the sign-out.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Replaces the current user's password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotSignedIn`] without a session, or
    /// [`AuthError::WeakPassword`] if the new password is too short.
    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;
}
