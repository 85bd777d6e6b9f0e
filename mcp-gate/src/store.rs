use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A stored note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Store-assigned identifier
    pub id: String,
    /// Short title
    pub title: String,
    /// Body text
    pub content: String,
    /// When the note was created
    #[serde(serialize_with = "millis")]
    pub created_at: DateTime<Utc>,
    /// When the note was last changed
    #[serde(serialize_with = "millis")]
    pub updated_at: DateTime<Utc>,
}

/// ISO 8601 with millisecond precision, e.g. `2025-01-02T03:04:05.123Z`
fn millis<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Storage abstraction for notes
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// All notes, most recently updated first
    async fn list(&self) -> Result<Vec<Note>>;

    /// Get a note by its ID
    async fn get(&self, id: &str) -> Result<Option<Note>>;

    /// Create a note and return it with its assigned ID
    async fn create(&self, title: &str, content: &str) -> Result<Note>;

    /// Delete a note, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Notes whose title or content contains `query`, ignoring case
    async fn search(&self, query: &str) -> Result<Vec<Note>>;
}
