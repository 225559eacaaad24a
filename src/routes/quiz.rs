//! Quiz endpoint: flashcards generated across every note in a subject.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::warn;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::lm::ImageSource;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/generate/:subject_id", post(generate))
}

/// Extracts text from every note in the subject, concatenates it and asks
/// the model for one combined flashcard set. Notes whose media the OCR
/// gateway cannot handle are skipped with a warning rather than failing
/// the whole quiz.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(subject_id): Path<String>,
) -> Result<Response, AppError> {
    state
        .store
        .find_subject(&requester.user_id, &subject_id)
        .await?
        .ok_or(AppError::NotFound("Subject"))?;

    let notes = state
        .store
        .list_subject_notes(&requester.user_id, &subject_id)
        .await?;
    if notes.is_empty() {
        return Err(AppError::Validation(
            "Subject has no notes to generate a quiz from".to_string(),
        ));
    }

    let mut extracted = Vec::new();
    for note in &notes {
        let Some(key) = state.objects.key_for_url(&note.file_url) else {
            warn!("note {} has a foreign file URL, skipping", note.id);
            continue;
        };
        let bytes = state.objects.fetch(&key).await?;
        match state
            .lm
            .extract_text(ImageSource::Bytes(bytes), &note.content_type)
            .await
        {
            Ok(text) => extracted.push(text),
            Err(AppError::Validation(reason)) => {
                warn!("note {} skipped for quiz: {reason}", note.id);
            }
            Err(err) => return Err(err),
        }
    }
    if extracted.is_empty() {
        return Err(AppError::Validation(
            "No readable content in this subject's notes".to_string(),
        ));
    }

    let flashcards = state.lm.generate_flashcards(&extracted.join(" ")).await?;
    Ok(Json(json!({ "flashcards": flashcards })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, Subject, PLACEHOLDER_COVER_URL};
    use crate::state::testing;
    use chrono::Utc;
    use uuid::Uuid;

    async fn seed_subject(state: &Arc<AppState>, user_id: &str) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            subject_name: "Biology".to_string(),
            created_at: Utc::now(),
        };
        state.store.insert_subject(subject.clone()).await.unwrap();
        subject
    }

    async fn seed_note(
        state: &Arc<AppState>,
        user_id: &str,
        subject_id: &str,
        filename: &str,
        content_type: &str,
    ) {
        let key = format!("users/{user_id}/{filename}");
        let file_url = state
            .objects
            .upload(&key, b"bytes".to_vec(), content_type)
            .await
            .unwrap();
        state
            .store
            .insert_note(Note {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                subject_id: Some(subject_id.to_string()),
                title: filename.to_string(),
                description: "desc".to_string(),
                filename: filename.to_string(),
                file_url,
                content_type: content_type.to_string(),
                cover_image_url: PLACEHOLDER_COVER_URL.to_string(),
                status: "pending".to_string(),
                created_at: Utc::now(),
                subject_name: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_subject_is_404() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "q@example.com").await;
        let err = generate(State(state.clone()), requester, Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Subject")));
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "q@example.com").await;
        let subject = seed_subject(&state, &requester.user_id).await;
        let err = generate(State(state.clone()), requester, Path(subject.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_quiz_from_subject_notes() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "q@example.com").await;
        let subject = seed_subject(&state, &requester.user_id).await;
        seed_note(&state, &requester.user_id, &subject.id, "page1.png", "image/png").await;
        seed_note(&state, &requester.user_id, &subject.id, "page2.jpg", "image/jpeg").await;
        // OCR cannot read a pdf; the note is skipped, not fatal.
        seed_note(
            &state,
            &requester.user_id,
            &subject.id,
            "syllabus.pdf",
            "application/pdf",
        )
        .await;

        let response = generate(State(state.clone()), requester, Path(subject.id))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_subject_with_only_unreadable_notes_rejected() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "q@example.com").await;
        let subject = seed_subject(&state, &requester.user_id).await;
        seed_note(
            &state,
            &requester.user_id,
            &subject.id,
            "syllabus.pdf",
            "application/pdf",
        )
        .await;

        let err = generate(State(state.clone()), requester, Path(subject.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
