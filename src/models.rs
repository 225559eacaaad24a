//! Record shapes shared by the store, the progress engine and the routes.
//!
//! Decks carry two representations of study progress: the deck-level
//! `Progress` index lists (persisted verbatim as submitted by the client)
//! and the per-card `status`/`streak`/`learned`/`mastered` fields. The
//! progress engine keeps the two consistent on every update.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cover shown for notes uploaded without one.
pub const PLACEHOLDER_COVER_URL: &str = "https://static.notesage.app/covers/default.png";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub user_id: String,
    pub subject_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub title: String,
    pub description: String,
    pub filename: String,
    /// Object-store URL of the uploaded document. The bytes live in the
    /// object store, never in this record.
    pub file_url: String,
    pub content_type: String,
    pub cover_image_url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// Denormalized from the referenced subject on list/get reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedNote {
    pub id: String,
    pub user_id: String,
    pub note_id: String,
    /// Copied from the note at generation time so subject deletion can
    /// cascade without a join.
    pub subject_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    #[default]
    Unfamiliar,
    Learned,
    Mastered,
}

/// One flashcard, identified by its position in the deck's card sequence.
/// The `status`/`streak`/`learned`/`mastered` fields are display
/// denormalizations computed from [`CardState`], not independently
/// authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Card {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub status: CardStatus,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub learned: bool,
    #[serde(default)]
    pub mastered: bool,
}

/// Per-card recall state, keyed by card index (as a string) in the deck.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardState {
    #[serde(default)]
    pub status: CardStatus,
    #[serde(default)]
    pub streak: u32,
    #[serde(default, alias = "lastAnswered")]
    pub last_answered: Option<DateTime<Utc>>,
}

/// Deck-level partition of card indices. Initialized to everything
/// unfamiliar; afterwards stored as the client submitted it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub learned: Vec<usize>,
    #[serde(default)]
    pub mastered: Vec<usize>,
    #[serde(default)]
    pub unfamiliar: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub total: usize,
    pub learned: usize,
    pub mastered: usize,
    pub unfamiliar: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deck {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(default, alias = "underglowColor")]
    pub accent_color: String,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub card_states: BTreeMap<String, CardState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Attached on read paths, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_counts: Option<ProgressCounts>,
}
