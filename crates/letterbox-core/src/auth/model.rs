//! Session and profile model types.

use serde::{Deserialize, Serialize};

use crate::Identity;

/// Stable user key assigned by the identity provider at registration.
///
/// Distinct from [`Identity`]: the user id never changes, while the display
/// identity is looked up from the profile registry per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The signed-in user.
    pub user_id: UserId,
    /// The email the session was established with.
    pub email: String,
}

/// A user's profile row, mapping the stable user key to a display identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// The owning user.
    pub user_id: UserId,
    /// The display identity used to scope visible letters.
    pub username: Identity,
}
