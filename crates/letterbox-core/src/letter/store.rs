//! The letter store contract.
//!
//! The store is an append-only table of letters with three operations:
//! query by correspondent, insert, and a push subscription over inserts.
//! The synchronization engine consumes this contract and nothing else, so
//! any backend that can answer "sender = X OR recipient = X" and echo its
//! own inserts can sit behind it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use super::model::{Letter, NewLetter};
use crate::Identity;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store rejected an insert.
    #[error("insert rejected: {0}")]
    Rejected(String),

    /// The store could not be reached or did not answer.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Query, insert and subscription operations over the shared letter table.
#[async_trait]
pub trait LetterStore: Send + Sync {
    /// Fetches every letter where the identity is sender or recipient,
    /// newest first by creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn letters_for(&self, identity: &Identity) -> Result<Vec<Letter>, StoreError>;

    /// Inserts a new letter.
    ///
    /// The insert's return value only confirms the write was accepted; the
    /// stored row (with its assigned id) is observed through the insert
    /// subscription, not returned here.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    async fn insert(&self, letter: NewLetter) -> Result<(), StoreError>;

    /// Opens a subscription over insert events on the letter table.
    ///
    /// The feed carries every inserted letter, unfiltered; consumers filter
    /// by correspondent before admission. Only inserts committed after the
    /// subscription is opened are delivered.
    fn subscribe_inserts(&self) -> InsertFeed;
}

/// A live subscription over letter inserts.
///
/// Dropping the feed closes it; [`InsertFeed::close`] makes that explicit.
#[derive(Debug)]
pub struct InsertFeed {
    receiver: broadcast::Receiver<Letter>,
}

impl InsertFeed {
    /// Wraps the receiver end of a store's insert broadcast.
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<Letter>) -> Self {
        Self { receiver }
    }

    /// Waits for the next inserted letter.
    ///
    /// Returns `None` once the feed is dead: either the store closed the
    /// channel, or this receiver fell so far behind that events were
    /// discarded. A lagged feed has lost events, so it is reported as dead
    /// rather than resumed with gaps.
    pub async fn recv(&mut self) -> Option<Letter> {
        match self.receiver.recv().await {
            Ok(letter) => Some(letter),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("insert feed lagged, {missed} events lost; dropping feed");
                None
            }
        }
    }

    /// Closes the subscription.
    pub fn close(self) {
        drop(self);
    }
}
