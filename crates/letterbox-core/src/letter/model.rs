//! Letter data models.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Identity;

/// Unique letter identifier, assigned by the store on insert.
///
/// Ids increase monotonically and are the sole de-duplication key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LetterId(pub i64);

impl std::fmt::Display for LetterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single dated letter between two correspondents.
///
/// Letters are immutable once created; there is no edit or delete pathway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letter {
    /// Store-assigned identifier.
    pub id: LetterId,
    /// Title line.
    pub title: String,
    /// Body text. Embedded line breaks are preserved verbatim.
    pub content: String,
    /// Display date, fixed at creation and never reinterpreted
    /// (e.g. "June 14th, 1782").
    pub date: String,
    /// The correspondent who wrote the letter.
    pub sender: Identity,
    /// The correspondent the letter is addressed to.
    pub recipient: Identity,
    /// Store-assigned ordering timestamp, distinct from the display date.
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has read the letter. Defaults to false.
    pub is_read: bool,
}

impl Letter {
    /// Whether the given identity is the sender or the recipient.
    #[must_use]
    pub fn involves(&self, identity: &Identity) -> bool {
        &self.sender == identity || &self.recipient == identity
    }
}

/// Insert payload for a new letter.
///
/// The store assigns `id` and `created_at` on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLetter {
    /// Title line.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Display date, fixed by the composer.
    pub date: String,
    /// The correspondent who wrote the letter.
    pub sender: Identity,
    /// The correspondent the letter is addressed to.
    pub recipient: Identity,
    /// Read flag; new letters start unread.
    pub is_read: bool,
}

/// Formats a date the way letters display it: "June 14th, 1782".
#[must_use]
pub fn display_date(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = match day {
        11..=13 => "th",
        d => match d % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{} {day}{suffix}, {}", date.format("%B"), date.year())
}
