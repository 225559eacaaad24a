//! Record store: owner-scoped SQLite repository.
//!
//! Every read and write on user-owned entities includes the owning user id
//! in the filter, so a cross-user lookup is indistinguishable from a
//! missing record. Deck cards, progress and card states are persisted as
//! JSON text columns.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;

use crate::error::AppError;
use crate::models::{Deck, GeneratedNote, Note, Subject, User};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    subject_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subjects_user ON subjects(user_id);

CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    subject_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_url TEXT NOT NULL,
    content_type TEXT NOT NULL,
    cover_image_url TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);
CREATE INDEX IF NOT EXISTS idx_notes_subject ON notes(user_id, subject_id);

CREATE TABLE IF NOT EXISTS generated_notes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    note_id TEXT NOT NULL UNIQUE,
    subject_id TEXT,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_generated_notes_user ON generated_notes(user_id);

CREATE TABLE IF NOT EXISTS decks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    accent_color TEXT NOT NULL,
    cards TEXT NOT NULL,
    progress TEXT NOT NULL,
    card_states TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decks_user ON decks(user_id);
"#;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(db_path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(db_path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // User operations

    pub async fn insert_user(&self, user: User) -> Result<(), AppError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, email, password_hash, full_name, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user.id,
                        user.email,
                        user.password_hash,
                        user.full_name,
                        user.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, email, password_hash, full_name, created_at
                     FROM users WHERE email = ?1",
                )?;
                let user = stmt.query_row(params![email], user_from_row).optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let id = id.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, email, password_hash, full_name, created_at
                     FROM users WHERE id = ?1",
                )?;
                let user = stmt.query_row(params![id], user_from_row).optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    // Subject operations

    pub async fn insert_subject(&self, subject: Subject) -> Result<(), AppError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subjects (id, user_id, subject_name, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        subject.id,
                        subject.user_id,
                        subject.subject_name,
                        subject.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_subjects(&self, user_id: &str) -> Result<Vec<Subject>, AppError> {
        let user_id = user_id.to_string();
        let subjects = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, subject_name, created_at
                     FROM subjects WHERE user_id = ?1 ORDER BY created_at",
                )?;
                let subjects = stmt
                    .query_map(params![user_id], subject_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subjects)
            })
            .await?;
        Ok(subjects)
    }

    pub async fn find_subject(
        &self,
        user_id: &str,
        subject_id: &str,
    ) -> Result<Option<Subject>, AppError> {
        let user_id = user_id.to_string();
        let subject_id = subject_id.to_string();
        let subject = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, subject_name, created_at
                     FROM subjects WHERE id = ?1 AND user_id = ?2",
                )?;
                let subject = stmt
                    .query_row(params![subject_id, user_id], subject_from_row)
                    .optional()?;
                Ok(subject)
            })
            .await?;
        Ok(subject)
    }

    /// Deletes a subject together with its notes and their generated notes.
    pub async fn delete_subject_cascade(
        &self,
        user_id: &str,
        subject_id: &str,
    ) -> Result<(), AppError> {
        let user_id = user_id.to_string();
        let subject_id = subject_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM generated_notes WHERE user_id = ?1 AND subject_id = ?2",
                    params![user_id, subject_id],
                )?;
                conn.execute(
                    "DELETE FROM notes WHERE user_id = ?1 AND subject_id = ?2",
                    params![user_id, subject_id],
                )?;
                conn.execute(
                    "DELETE FROM subjects WHERE user_id = ?1 AND id = ?2",
                    params![user_id, subject_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Note operations

    pub async fn insert_note(&self, note: Note) -> Result<(), AppError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO notes (id, user_id, subject_id, title, description, filename,
                                        file_url, content_type, cover_image_url, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        note.id,
                        note.user_id,
                        note.subject_id,
                        note.title,
                        note.description,
                        note.filename,
                        note.file_url,
                        note.content_type,
                        note.cover_image_url,
                        note.status,
                        note.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>, AppError> {
        let user_id = user_id.to_string();
        let notes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT n.id, n.user_id, n.subject_id, n.title, n.description, n.filename,
                            n.file_url, n.content_type, n.cover_image_url, n.status, n.created_at,
                            s.subject_name
                     FROM notes n
                     LEFT JOIN subjects s ON s.id = n.subject_id AND s.user_id = n.user_id
                     WHERE n.user_id = ?1 ORDER BY n.created_at",
                )?;
                let notes = stmt
                    .query_map(params![user_id], note_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(notes)
            })
            .await?;
        Ok(notes)
    }

    pub async fn list_subject_notes(
        &self,
        user_id: &str,
        subject_id: &str,
    ) -> Result<Vec<Note>, AppError> {
        let user_id = user_id.to_string();
        let subject_id = subject_id.to_string();
        let notes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT n.id, n.user_id, n.subject_id, n.title, n.description, n.filename,
                            n.file_url, n.content_type, n.cover_image_url, n.status, n.created_at,
                            s.subject_name
                     FROM notes n
                     LEFT JOIN subjects s ON s.id = n.subject_id AND s.user_id = n.user_id
                     WHERE n.user_id = ?1 AND n.subject_id = ?2 ORDER BY n.created_at",
                )?;
                let notes = stmt
                    .query_map(params![user_id, subject_id], note_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(notes)
            })
            .await?;
        Ok(notes)
    }

    pub async fn find_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> Result<Option<Note>, AppError> {
        let user_id = user_id.to_string();
        let note_id = note_id.to_string();
        let note = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT n.id, n.user_id, n.subject_id, n.title, n.description, n.filename,
                            n.file_url, n.content_type, n.cover_image_url, n.status, n.created_at,
                            s.subject_name
                     FROM notes n
                     LEFT JOIN subjects s ON s.id = n.subject_id AND s.user_id = n.user_id
                     WHERE n.id = ?1 AND n.user_id = ?2",
                )?;
                let note = stmt
                    .query_row(params![note_id, user_id], note_from_row)
                    .optional()?;
                Ok(note)
            })
            .await?;
        Ok(note)
    }

    pub async fn update_note(&self, note: Note) -> Result<usize, AppError> {
        let matched = self
            .conn
            .call(move |conn| {
                let matched = conn.execute(
                    "UPDATE notes SET subject_id = ?1, title = ?2, description = ?3,
                                      cover_image_url = ?4, status = ?5
                     WHERE id = ?6 AND user_id = ?7",
                    params![
                        note.subject_id,
                        note.title,
                        note.description,
                        note.cover_image_url,
                        note.status,
                        note.id,
                        note.user_id,
                    ],
                )?;
                Ok(matched)
            })
            .await?;
        Ok(matched)
    }

    /// Deletes the note and every generated note derived from it.
    pub async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<(), AppError> {
        let user_id = user_id.to_string();
        let note_id = note_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM generated_notes WHERE user_id = ?1 AND note_id = ?2",
                    params![user_id, note_id],
                )?;
                conn.execute(
                    "DELETE FROM notes WHERE user_id = ?1 AND id = ?2",
                    params![user_id, note_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Generated-note operations

    /// One generated note per note: a re-generation overwrites the previous
    /// content.
    pub async fn upsert_generated_note(&self, generated: GeneratedNote) -> Result<(), AppError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO generated_notes (id, user_id, note_id, subject_id, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(note_id) DO UPDATE SET
                         content = excluded.content,
                         subject_id = excluded.subject_id,
                         created_at = excluded.created_at",
                    params![
                        generated.id,
                        generated.user_id,
                        generated.note_id,
                        generated.subject_id,
                        generated.content,
                        generated.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn find_generated_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> Result<Option<GeneratedNote>, AppError> {
        let user_id = user_id.to_string();
        let note_id = note_id.to_string();
        let generated = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, note_id, subject_id, content, created_at
                     FROM generated_notes WHERE note_id = ?1 AND user_id = ?2",
                )?;
                let generated = stmt
                    .query_row(params![note_id, user_id], generated_note_from_row)
                    .optional()?;
                Ok(generated)
            })
            .await?;
        Ok(generated)
    }

    pub async fn update_generated_content(
        &self,
        user_id: &str,
        note_id: &str,
        content: String,
    ) -> Result<usize, AppError> {
        let user_id = user_id.to_string();
        let note_id = note_id.to_string();
        let matched = self
            .conn
            .call(move |conn| {
                let matched = conn.execute(
                    "UPDATE generated_notes SET content = ?1
                     WHERE note_id = ?2 AND user_id = ?3",
                    params![content, note_id, user_id],
                )?;
                Ok(matched)
            })
            .await?;
        Ok(matched)
    }

    // Deck operations

    pub async fn insert_deck(&self, deck: Deck) -> Result<(), AppError> {
        let cards = serde_json::to_string(&deck.cards)?;
        let progress = serde_json::to_string(&deck.progress)?;
        let card_states = serde_json::to_string(&deck.card_states)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO decks (id, user_id, title, description, accent_color,
                                        cards, progress, card_states, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        deck.id,
                        deck.user_id,
                        deck.title,
                        deck.description,
                        deck.accent_color,
                        cards,
                        progress,
                        card_states,
                        deck.created_at.to_rfc3339(),
                        deck.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_decks(&self, user_id: &str) -> Result<Vec<Deck>, AppError> {
        let user_id = user_id.to_string();
        let decks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, title, description, accent_color,
                            cards, progress, card_states, created_at, updated_at
                     FROM decks WHERE user_id = ?1 ORDER BY created_at",
                )?;
                let decks = stmt
                    .query_map(params![user_id], deck_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(decks)
            })
            .await?;
        Ok(decks)
    }

    pub async fn find_deck(
        &self,
        user_id: &str,
        deck_id: &str,
    ) -> Result<Option<Deck>, AppError> {
        let user_id = user_id.to_string();
        let deck_id = deck_id.to_string();
        let deck = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, title, description, accent_color,
                            cards, progress, card_states, created_at, updated_at
                     FROM decks WHERE id = ?1 AND user_id = ?2",
                )?;
                let deck = stmt
                    .query_row(params![deck_id, user_id], deck_from_row)
                    .optional()?;
                Ok(deck)
            })
            .await?;
        Ok(deck)
    }

    /// Whole-record write; the caller owns read-modify-write. Concurrent
    /// updates to the same deck are last-write-wins.
    pub async fn update_deck(&self, deck: Deck) -> Result<usize, AppError> {
        let cards = serde_json::to_string(&deck.cards)?;
        let progress = serde_json::to_string(&deck.progress)?;
        let card_states = serde_json::to_string(&deck.card_states)?;
        let matched = self
            .conn
            .call(move |conn| {
                let matched = conn.execute(
                    "UPDATE decks SET title = ?1, description = ?2, accent_color = ?3,
                                      cards = ?4, progress = ?5, card_states = ?6, updated_at = ?7
                     WHERE id = ?8 AND user_id = ?9",
                    params![
                        deck.title,
                        deck.description,
                        deck.accent_color,
                        cards,
                        progress,
                        card_states,
                        deck.updated_at.to_rfc3339(),
                        deck.id,
                        deck.user_id,
                    ],
                )?;
                Ok(matched)
            })
            .await?;
        Ok(matched)
    }

    pub async fn delete_deck(&self, user_id: &str, deck_id: &str) -> Result<(), AppError> {
        let user_id = user_id.to_string();
        let deck_id = deck_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM decks WHERE user_id = ?1 AND id = ?2",
                    params![user_id, deck_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn subject_from_row(row: &Row) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject_name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn note_from_row(row: &Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        filename: row.get(5)?,
        file_url: row.get(6)?,
        content_type: row.get(7)?,
        cover_image_url: row.get(8)?,
        status: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        subject_name: row.get(11)?,
    })
}

fn generated_note_from_row(row: &Row) -> rusqlite::Result<GeneratedNote> {
    Ok(GeneratedNote {
        id: row.get(0)?,
        user_id: row.get(1)?,
        note_id: row.get(2)?,
        subject_id: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn deck_from_row(row: &Row) -> rusqlite::Result<Deck> {
    Ok(Deck {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        accent_color: row.get(4)?,
        cards: json_col(row, 5)?,
        progress: json_col(row, 6)?,
        card_states: json_col(row, 7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
        progress_counts: None,
    })
}
