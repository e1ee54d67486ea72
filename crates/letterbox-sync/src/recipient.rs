//! Recipient resolution strategies.
//!
//! Who a letter is addressed to when the composer names nobody is a policy
//! question, not an engine question. The engine takes a [`RecipientPolicy`]
//! at open time and never embeds a pairing table, so deployments can pick
//! two-party derivation, a pinned correspondent, or their own directory
//! lookup without touching the synchronization code.

use letterbox_core::Identity;

/// Strategy for deriving the recipient of a new letter.
pub trait RecipientPolicy: Send + Sync {
    /// Resolves a recipient for the given sender.
    ///
    /// `correspondents` is every identity observed in the sender's
    /// synchronized collection, in order of first appearance. Returning
    /// `None` means no recipient could be derived and the send is refused.
    fn resolve(&self, sender: &Identity, correspondents: &[Identity]) -> Option<Identity>;
}

/// Two-party derivation: the counterpart is the one other identity the
/// collection has ever named.
///
/// Resolves to `None` when no counterpart has appeared yet, or when more
/// than one candidate exists; ambiguity is refused rather than guessed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counterpart;

impl RecipientPolicy for Counterpart {
    fn resolve(&self, sender: &Identity, correspondents: &[Identity]) -> Option<Identity> {
        let mut others = correspondents.iter().filter(|&identity| identity != sender);
        match (others.next(), others.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }
}

/// A pinned recipient, covering explicit selection by the composer.
#[derive(Debug, Clone)]
pub struct Fixed(Identity);

impl Fixed {
    /// Pins every letter to the given recipient.
    #[must_use]
    pub fn new(recipient: impl Into<Identity>) -> Self {
        Self(recipient.into())
    }
}

impl RecipientPolicy for Fixed {
    fn resolve(&self, _sender: &Identity, _correspondents: &[Identity]) -> Option<Identity> {
        Some(self.0.clone())
    }
}
