//! Draft letters and the send error surface.

use letterbox_core::{Identity, display_date};
use thiserror::Error;

/// A letter being composed.
///
/// The display date is fixed when the draft is created, matching how the
/// finished letter will carry it forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Title line.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Display date for the finished letter.
    pub date: String,
    /// Explicitly chosen recipient; when absent the engine's recipient
    /// policy derives one.
    pub recipient: Option<Identity>,
}

impl Draft {
    /// Creates a draft with an explicit display date.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            date: date.into(),
            recipient: None,
        }
    }

    /// Creates a draft dated today in letter style ("June 14th, 1782").
    #[must_use]
    pub fn today(title: impl Into<String>, content: impl Into<String>) -> Self {
        let date = display_date(chrono::Local::now().date_naive());
        Self::new(title, content, date)
    }

    /// Addresses the draft to an explicit recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<Identity>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Validates the draft before submission.
    #[must_use]
    pub fn validate(&self) -> Option<SendError> {
        if self.content.trim().is_empty() {
            return Some(SendError::EmptyContent);
        }
        None
    }
}

/// Errors that can occur when sending a letter.
///
/// A failed send leaves both the local collection and the caller's draft
/// untouched; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The body was empty after trimming.
    #[error("a letter needs some words in it")]
    EmptyContent,

    /// No identity is signed in.
    #[error("no identity signed in")]
    NoIdentity,

    /// Neither the draft nor the recipient policy produced a recipient.
    #[error("no recipient could be resolved")]
    NoRecipient,

    /// The resolved recipient is the sender.
    #[error("a letter cannot be addressed to its own sender")]
    SelfAddressed,

    /// The store rejected the insert; carries the store's message.
    #[error("store rejected the letter: {0}")]
    Store(String),

    /// The engine has been closed.
    #[error("synchronization engine closed")]
    Closed,
}
