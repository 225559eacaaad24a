//! Flashcard deck endpoints: CRUD, study-progress updates, and deck
//! generation from a note's summary.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{Card, CardState, Deck};
use crate::objects::object_key;
use crate::progress;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/decks", post(create).get(list))
        .route("/decks/:deck_id", get(get_one).put(update).delete(remove))
        .route("/decks/:deck_id/progress", put(update_progress))
        .route("/generate_from_note", post(generate_from_note))
}

#[derive(Deserialize)]
pub struct CreateDeckRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "underglowColor")]
    pub accent_color: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Json(request): Json<CreateDeckRequest>,
) -> Result<Response, AppError> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Deck title is required".to_string()));
    }

    let mut cards = request.cards;
    upload_card_images(&state, &requester.user_id, &mut cards).await?;
    let (deck_progress, card_states) = progress::initialize(cards.len());

    let mut deck = Deck {
        id: Uuid::new_v4().to_string(),
        user_id: requester.user_id,
        title: request.title,
        description: request.description,
        accent_color: request.accent_color,
        cards,
        progress: deck_progress,
        card_states,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        progress_counts: None,
    };
    state.store.insert_deck(deck.clone()).await?;
    info!("deck {} created with {} cards", deck.id, deck.cards.len());

    progress::attach_display_view(&mut deck);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Deck created", "deck": deck })),
    )
        .into_response())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
) -> Result<Response, AppError> {
    let mut decks = state.store.list_decks(&requester.user_id).await?;
    for deck in &mut decks {
        progress::attach_display_view(deck);
    }
    Ok(Json(json!({ "decks": decks })).into_response())
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(deck_id): Path<String>,
) -> Result<Response, AppError> {
    let mut deck = state
        .store
        .find_deck(&requester.user_id, &deck_id)
        .await?
        .ok_or(AppError::NotFound("Deck"))?;
    progress::attach_display_view(&mut deck);
    Ok(Json(json!({ "deck": deck })).into_response())
}

#[derive(Deserialize, Default)]
pub struct UpdateDeckRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, alias = "underglowColor")]
    pub accent_color: Option<String>,
    /// Replacing the card sequence resets all study progress.
    pub cards: Option<Vec<Card>>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(deck_id): Path<String>,
    Json(request): Json<UpdateDeckRequest>,
) -> Result<Response, AppError> {
    let mut deck = state
        .store
        .find_deck(&requester.user_id, &deck_id)
        .await?
        .ok_or(AppError::NotFound("Deck"))?;

    if let Some(title) = request.title {
        deck.title = title;
    }
    if let Some(description) = request.description {
        deck.description = description;
    }
    if let Some(accent_color) = request.accent_color {
        deck.accent_color = accent_color;
    }
    if let Some(mut cards) = request.cards {
        upload_card_images(&state, &requester.user_id, &mut cards).await?;
        let (deck_progress, card_states) = progress::initialize(cards.len());
        deck.cards = cards;
        deck.progress = deck_progress;
        deck.card_states = card_states;
    }
    deck.updated_at = Utc::now();

    state.store.update_deck(deck.clone()).await?;
    progress::attach_display_view(&mut deck);
    Ok(Json(json!({ "message": "Deck updated", "deck": deck })).into_response())
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(deck_id): Path<String>,
) -> Result<Response, AppError> {
    let deck = state
        .store
        .find_deck(&requester.user_id, &deck_id)
        .await?
        .ok_or(AppError::NotFound("Deck"))?;

    // Card images go best-effort; the record goes regardless.
    for url in deck.cards.iter().filter_map(|c| c.image.as_ref()) {
        if let Some(key) = state.objects.key_for_url(url) {
            if let Err(err) = state.objects.delete(&key).await {
                warn!("failed to delete card image {key}: {err}");
            }
        }
    }

    state.store.delete_deck(&requester.user_id, &deck_id).await?;
    Ok(Json(json!({ "message": "Deck deleted" })).into_response())
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub progress: Option<serde_json::Value>,
    #[serde(default)]
    pub card_states: BTreeMap<String, CardState>,
}

pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(deck_id): Path<String>,
    Json(request): Json<ProgressRequest>,
) -> Result<Response, AppError> {
    let submitted = request
        .progress
        .as_ref()
        .ok_or_else(|| AppError::Validation("Missing required field: progress".to_string()))?;
    let submitted = progress::parse_submitted(submitted)?;

    let mut deck = state
        .store
        .find_deck(&requester.user_id, &deck_id)
        .await?
        .ok_or(AppError::NotFound("Deck"))?;

    let (deck_progress, card_states, counts) =
        progress::apply_update(&mut deck.cards, &submitted, &request.card_states);
    deck.progress = deck_progress;
    deck.card_states = card_states;
    deck.updated_at = Utc::now();

    state.store.update_deck(deck.clone()).await?;
    deck.progress_counts = Some(counts);
    Ok(Json(json!({ "message": "Progress updated", "deck": deck })).into_response())
}

#[derive(Deserialize)]
pub struct GenerateDeckRequest {
    pub note_id: String,
    pub title: Option<String>,
    #[serde(default, alias = "underglowColor")]
    pub accent_color: Option<String>,
}

/// Builds a deck from a note's generated summary. The summary is stored as
/// HTML, so tags are stripped before it is handed to the model.
pub async fn generate_from_note(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Json(request): Json<GenerateDeckRequest>,
) -> Result<Response, AppError> {
    let note = state
        .store
        .find_note(&requester.user_id, &request.note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;
    let generated = state
        .store
        .find_generated_note(&requester.user_id, &request.note_id)
        .await?
        .ok_or(AppError::NotFound("Generated note"))?;

    let text = strip_html(&generated.content);
    let flashcards = state.lm.generate_flashcards(&text).await?;
    let cards: Vec<Card> = flashcards
        .into_iter()
        .map(|f| Card {
            term: f.term,
            definition: f.definition,
            ..Card::default()
        })
        .collect();
    let (deck_progress, card_states) = progress::initialize(cards.len());

    let mut deck = Deck {
        id: Uuid::new_v4().to_string(),
        user_id: requester.user_id,
        title: request.title.unwrap_or_else(|| note.title.clone()),
        description: format!("Generated from note: {}", note.title),
        accent_color: request.accent_color.unwrap_or_default(),
        cards,
        progress: deck_progress,
        card_states,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        progress_counts: None,
    };
    state.store.insert_deck(deck.clone()).await?;
    info!(
        "deck {} generated from note {} with {} cards",
        deck.id,
        request.note_id,
        deck.cards.len()
    );

    progress::attach_display_view(&mut deck);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Deck generated", "deck": deck })),
    )
        .into_response())
}

/// Uploads `data:image/...;base64,` card images to the object store and
/// replaces them with their public URL. Other image strings pass through.
async fn upload_card_images(
    state: &AppState,
    user_id: &str,
    cards: &mut [Card],
) -> Result<(), AppError> {
    for card in cards.iter_mut() {
        let Some(image) = card.image.as_deref() else {
            continue;
        };
        if !image.starts_with("data:image/") {
            continue;
        }
        let (header, payload) = image.split_once(";base64,").ok_or_else(|| {
            AppError::Validation("Card image data URL is missing base64 payload".to_string())
        })?;
        let mime = header.trim_start_matches("data:").to_string();
        let ext = match mime.as_str() {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            other => {
                return Err(AppError::Validation(format!(
                    "Unsupported card image type {other}"
                )))
            }
        };

        let key = object_key(user_id, &format!("flashcard_{}.{ext}", Uuid::new_v4()));
        let url = state.objects.upload_encoded(&key, payload, &mime).await?;
        card.image = Some(url);
    }
    Ok(())
}

fn strip_html(html: &str) -> String {
    let without_tags = Regex::new(r"<[^>]+>").unwrap().replace_all(html, " ");
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeneratedNote, Note, ProgressCounts, PLACEHOLDER_COVER_URL};
    use crate::state::testing;
    use axum::body::to_bytes;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::Value;

    fn three_card_request() -> Json<CreateDeckRequest> {
        Json(CreateDeckRequest {
            title: "Cell biology".to_string(),
            description: "organelles".to_string(),
            accent_color: "#00ff88".to_string(),
            cards: (0..3)
                .map(|i| Card {
                    term: format!("term {i}"),
                    definition: format!("definition {i}"),
                    ..Card::default()
                })
                .collect(),
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_roundtrip_counts() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;

        let response = create(State(state.clone()), requester.clone(), three_card_request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = get_one(State(state.clone()), requester, Path(deck_id))
            .await
            .unwrap();
        let counts: ProgressCounts =
            serde_json::from_value(body_json(response).await["deck"]["progress_counts"].clone())
                .unwrap();
        assert_eq!(
            counts,
            ProgressCounts {
                total: 3,
                learned: 0,
                mastered: 0,
                unfamiliar: 3
            }
        );
    }

    #[tokio::test]
    async fn test_progress_update_scenario() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;
        let response = create(State(state.clone()), requester.clone(), three_card_request())
            .await
            .unwrap();
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = update_progress(
            State(state.clone()),
            requester.clone(),
            Path(deck_id.clone()),
            Json(ProgressRequest {
                progress: Some(json!({
                    "mastered": [0],
                    "learned": [1],
                    "unfamiliar": [2],
                })),
                card_states: BTreeMap::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(
            body["deck"]["progress_counts"],
            json!({ "total": 3, "learned": 1, "mastered": 1, "unfamiliar": 1 })
        );

        // Persisted, not just echoed.
        let stored = state
            .store
            .find_deck(&requester.user_id, &deck_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.progress.mastered, vec![0]);
        assert!(stored.cards[0].mastered);
    }

    #[tokio::test]
    async fn test_progress_requires_payload_and_valid_shape() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;
        let response = create(State(state.clone()), requester.clone(), three_card_request())
            .await
            .unwrap();
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let err = update_progress(
            State(state.clone()),
            requester.clone(),
            Path(deck_id.clone()),
            Json(ProgressRequest {
                progress: None,
                card_states: BTreeMap::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = update_progress(
            State(state.clone()),
            requester.clone(),
            Path(deck_id.clone()),
            Json(ProgressRequest {
                progress: Some(json!([0, 1, 2])),
                card_states: BTreeMap::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Rejected updates change nothing.
        let stored = state
            .store
            .find_deck(&requester.user_id, &deck_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.progress.unfamiliar, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_card_replacement_resets_progress() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;
        let response = create(State(state.clone()), requester.clone(), three_card_request())
            .await
            .unwrap();
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        update_progress(
            State(state.clone()),
            requester.clone(),
            Path(deck_id.clone()),
            Json(ProgressRequest {
                progress: Some(json!({ "mastered": [0, 1, 2] })),
                card_states: BTreeMap::new(),
            }),
        )
        .await
        .unwrap();

        update(
            State(state.clone()),
            requester.clone(),
            Path(deck_id.clone()),
            Json(UpdateDeckRequest {
                cards: Some(vec![Card {
                    term: "fresh".to_string(),
                    definition: "new card".to_string(),
                    ..Card::default()
                }]),
                ..UpdateDeckRequest::default()
            }),
        )
        .await
        .unwrap();

        let stored = state
            .store
            .find_deck(&requester.user_id, &deck_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.cards.len(), 1);
        assert_eq!(stored.progress.unfamiliar, vec![0]);
        assert!(stored.progress.mastered.is_empty());
        assert_eq!(stored.card_states.len(), 1);
    }

    #[tokio::test]
    async fn test_data_url_card_images_are_uploaded() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode([1u8, 2, 3]));
        let response = create(
            State(state.clone()),
            requester.clone(),
            Json(CreateDeckRequest {
                title: "With images".to_string(),
                description: String::new(),
                accent_color: String::new(),
                cards: vec![
                    Card {
                        term: "a".to_string(),
                        definition: "b".to_string(),
                        image: Some(data_url),
                        ..Card::default()
                    },
                    Card {
                        term: "c".to_string(),
                        definition: "d".to_string(),
                        image: Some("https://elsewhere.test/pic.png".to_string()),
                        ..Card::default()
                    },
                ],
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let decks = state.store.list_decks(&requester.user_id).await.unwrap();
        let image_url = decks[0].cards[0].image.as_deref().unwrap();
        assert!(image_url.starts_with("https://test-bucket.objects.test/"));
        let key = state.objects.key_for_url(image_url).unwrap();
        assert_eq!(state.objects.fetch(&key).await.unwrap(), vec![1, 2, 3]);
        // External URLs pass through untouched.
        assert_eq!(
            decks[0].cards[1].image.as_deref(),
            Some("https://elsewhere.test/pic.png")
        );
    }

    #[tokio::test]
    async fn test_delete_removes_card_images() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode([7u8]));
        let response = create(
            State(state.clone()),
            requester.clone(),
            Json(CreateDeckRequest {
                title: "Doomed".to_string(),
                description: String::new(),
                accent_color: String::new(),
                cards: vec![Card {
                    term: "a".to_string(),
                    definition: "b".to_string(),
                    image: Some(data_url),
                    ..Card::default()
                }],
            }),
        )
        .await
        .unwrap();
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let stored = state
            .store
            .find_deck(&requester.user_id, &deck_id)
            .await
            .unwrap()
            .unwrap();
        let key = state
            .objects
            .key_for_url(stored.cards[0].image.as_deref().unwrap())
            .unwrap();

        remove(State(state.clone()), requester.clone(), Path(deck_id.clone()))
            .await
            .unwrap();
        assert!(state
            .store
            .find_deck(&requester.user_id, &deck_id)
            .await
            .unwrap()
            .is_none());
        assert!(state.objects.fetch(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let state = testing::state().await;
        let owner = testing::seed_user(&state, "owner@example.com").await;
        let other = testing::seed_user(&state, "other@example.com").await;
        let response = create(State(state.clone()), owner, three_card_request())
            .await
            .unwrap();
        let deck_id = body_json(response).await["deck"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let err = get_one(State(state.clone()), other.clone(), Path(deck_id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Deck")));
        let err = remove(State(state.clone()), other, Path(deck_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Deck")));
    }

    #[tokio::test]
    async fn test_generate_from_note() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "u@example.com").await;

        let note = Note {
            id: Uuid::new_v4().to_string(),
            user_id: requester.user_id.clone(),
            subject_id: None,
            title: "Photosynthesis".to_string(),
            description: "light reactions".to_string(),
            filename: "photo.png".to_string(),
            file_url: "https://test-bucket.objects.test/users/u/photo.png".to_string(),
            content_type: "image/png".to_string(),
            cover_image_url: PLACEHOLDER_COVER_URL.to_string(),
            status: "completed".to_string(),
            created_at: Utc::now(),
            subject_name: None,
        };
        state.store.insert_note(note.clone()).await.unwrap();

        // Without a generated summary there is nothing to build from.
        let err = generate_from_note(
            State(state.clone()),
            requester.clone(),
            Json(GenerateDeckRequest {
                note_id: note.id.clone(),
                title: None,
                accent_color: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Generated note")));

        state
            .store
            .upsert_generated_note(GeneratedNote {
                id: Uuid::new_v4().to_string(),
                user_id: requester.user_id.clone(),
                note_id: note.id.clone(),
                subject_id: None,
                content: "<h1>Photosynthesis</h1><p>Light becomes chemical energy.</p>"
                    .to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let response = generate_from_note(
            State(state.clone()),
            requester.clone(),
            Json(GenerateDeckRequest {
                note_id: note.id.clone(),
                title: None,
                accent_color: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let decks = state.store.list_decks(&requester.user_id).await.unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].title, "Photosynthesis");
        assert_eq!(decks[0].cards.len(), 2);
        assert_eq!(decks[0].progress.unfamiliar, vec![0, 1]);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<h1>Title</h1><p>Body  text</p>"),
            "Title Body text"
        );
        assert_eq!(strip_html("no tags"), "no tags");
    }
}
