//! The synchronized collection of letters for one identity epoch.

use std::collections::HashSet;
use std::sync::Arc;

use letterbox_core::{Identity, Letter, LetterId};

/// An ordered, id-unique set of letters, newest first.
///
/// The collection is owned and mutated exclusively by the engine's dispatch
/// task; everything else reads immutable snapshots. Invariants: every id
/// appears at most once, and ordering is descending by creation timestamp.
#[derive(Debug, Default)]
pub struct Collection {
    letters: Vec<Letter>,
    ids: HashSet<LetterId>,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with a bulk-load result.
    ///
    /// The bulk query returns rows already ordered newest first; the order
    /// is taken as-is.
    pub fn install(&mut self, letters: Vec<Letter>) {
        self.ids = letters.iter().map(|l| l.id).collect();
        self.letters = letters;
    }

    /// Admits a push event into the collection.
    ///
    /// Returns false and leaves the collection untouched when the id is
    /// already present: letters are immutable, so a duplicate event carries
    /// nothing new. Otherwise the letter is inserted at the head: push
    /// events always represent rows newer than anything already held, so no
    /// re-sort is performed.
    pub fn admit(&mut self, letter: Letter) -> bool {
        if !self.ids.insert(letter.id) {
            return false;
        }
        self.letters.insert(0, letter);
        true
    }

    /// Removes everything; used at epoch boundaries.
    pub fn clear(&mut self) {
        self.letters.clear();
        self.ids.clear();
    }

    /// Number of letters held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }

    /// An immutable snapshot of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Letter]> {
        self.letters.as_slice().into()
    }

    /// Every distinct correspondent named by the held letters, in order of
    /// first appearance.
    #[must_use]
    pub fn correspondents(&self) -> Vec<Identity> {
        let mut seen = Vec::new();
        for letter in &self.letters {
            for identity in [&letter.sender, &letter.recipient] {
                if !seen.contains(identity) {
                    seen.push(identity.clone());
                }
            }
        }
        seen
    }
}
