//! Identity resolution.
//!
//! A session only carries the provider's stable user key; the display
//! identity that scopes the letter collection comes from a profile lookup.
//! That lookup is a network round trip and may fail (the profile row might
//! not be provisioned yet), in which case resolution degrades to
//! [`Resolution::NoIdentity`] instead of failing the caller.

use letterbox_core::{Identity, IdentityProvider, Session};
use tracing::{debug, warn};

/// Outcome of resolving a session to a display identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No session, or the profile lookup failed.
    NoIdentity,
    /// The session maps to this display identity.
    Resolved(Identity),
}

/// Resolves a session-change event to a display identity.
///
/// Every change of the returned resolution begins a new engine epoch.
pub async fn resolve_identity(
    provider: &dyn IdentityProvider,
    session: Option<&Session>,
) -> Resolution {
    let Some(session) = session else {
        return Resolution::NoIdentity;
    };

    match provider.profile(session.user_id).await {
        Ok(profile) => {
            debug!(user = %session.user_id, identity = %profile.username, "identity resolved");
            Resolution::Resolved(profile.username)
        }
        Err(err) => {
            warn!(user = %session.user_id, "identity resolution failed: {err}");
            Resolution::NoIdentity
        }
    }
}
