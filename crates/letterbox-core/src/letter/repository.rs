//! SQLite-backed letter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::broadcast;
use tracing::debug;

use super::model::{Letter, LetterId, NewLetter};
use super::store::{InsertFeed, LetterStore, StoreError};
use crate::Identity;

/// Capacity of the insert broadcast. Subscribers that fall further behind
/// than this see their feed die rather than receive a gapped stream.
const INSERT_FEED_CAPACITY: usize = 256;

/// Repository implementing [`LetterStore`] over a SQLite letters table.
///
/// Inserts commit to the database first and are broadcast to subscribers
/// only afterwards, so every push event reflects a committed row.
pub struct LetterRepository {
    pool: SqlitePool,
    inserts: broadcast::Sender<Letter>,
}

impl LetterRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let (inserts, _) = broadcast::channel(INSERT_FEED_CAPACITY);
        let repo = Self { pool, inserts };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                date TEXT NOT NULL DEFAULT '',
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the correspondent filter
        sqlx::query(r"CREATE INDEX IF NOT EXISTS idx_letters_sender ON letters(sender)")
            .execute(&self.pool)
            .await?;

        sqlx::query(r"CREATE INDEX IF NOT EXISTS idx_letters_recipient ON letters(recipient)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl LetterStore for LetterRepository {
    async fn letters_for(&self, identity: &Identity) -> Result<Vec<Letter>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, content, date, sender, recipient, is_read, created_at
            FROM letters
            WHERE sender = ? OR recipient = ?
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(identity.as_str())
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await?;

        let letters = rows.iter().filter_map(row_to_letter).collect();
        Ok(letters)
    }

    async fn insert(&self, letter: NewLetter) -> Result<(), StoreError> {
        let created_at = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO letters (title, content, date, sender, recipient, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&letter.title)
        .bind(&letter.content)
        .bind(&letter.date)
        .bind(letter.sender.as_str())
        .bind(letter.recipient.as_str())
        .bind(letter.is_read)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let stored = Letter {
            id: LetterId(result.last_insert_rowid()),
            title: letter.title,
            content: letter.content,
            date: letter.date,
            sender: letter.sender,
            recipient: letter.recipient,
            created_at,
            is_read: letter.is_read,
        };

        debug!(id = %stored.id, sender = %stored.sender, recipient = %stored.recipient,
            "letter committed");

        // Broadcast only after the row is committed. Nobody listening is fine.
        let _ = self.inserts.send(stored);

        Ok(())
    }

    fn subscribe_inserts(&self) -> InsertFeed {
        InsertFeed::new(self.inserts.subscribe())
    }
}

/// Convert a database row to a Letter.
fn row_to_letter(row: &sqlx::sqlite::SqliteRow) -> Option<Letter> {
    let created_at_str: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .ok()?
        .with_timezone(&Utc);

    Some(Letter {
        id: LetterId(row.get("id")),
        title: row.get("title"),
        content: row.get("content"),
        date: row.get("date"),
        sender: Identity::from(row.get::<String, _>("sender")),
        recipient: Identity::from(row.get::<String, _>("recipient")),
        created_at,
        is_read: row.get::<bool, _>("is_read"),
    })
}
