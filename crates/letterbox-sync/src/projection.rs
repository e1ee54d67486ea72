//! Tab projections over the synchronized collection.

use letterbox_core::{Identity, Letter};

/// Which side of the correspondence a view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    /// Letters addressed to the viewing identity.
    #[default]
    Inbox,
    /// Letters written by the viewing identity.
    Sent,
}

/// Derives the tab-scoped subset of the collection for one identity.
///
/// A pure function of its inputs with no state of its own: callers
/// recompute it on every collection or tab change instead of caching the
/// result. A self-addressed letter lands in both tabs.
#[must_use]
pub fn project(letters: &[Letter], tab: Tab, identity: &Identity) -> Vec<Letter> {
    letters
        .iter()
        .filter(|letter| match tab {
            Tab::Inbox => &letter.recipient == identity,
            Tab::Sent => &letter.sender == identity,
        })
        .cloned()
        .collect()
}
