//! Subject endpoints. Subjects are per-user folders that notes and
//! generated notes hang off; deleting one cascades to its contents.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{Subject, PLACEHOLDER_COVER_URL};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create))
        .route("/list", get(list))
        .route("/delete/:subject_id", delete(remove))
}

#[derive(Deserialize)]
pub struct CreateSubjectRequest {
    pub subject_name: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Json(request): Json<CreateSubjectRequest>,
) -> Result<Response, AppError> {
    let name = request.subject_name.trim();
    if name.is_empty() {
        return Err(AppError::Validation(
            "Subject name is required".to_string(),
        ));
    }

    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        user_id: requester.user_id,
        subject_name: name.to_string(),
        created_at: Utc::now(),
    };
    state.store.insert_subject(subject.clone()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Subject created", "subject": subject })),
    )
        .into_response())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
) -> Result<Response, AppError> {
    let subjects = state.store.list_subjects(&requester.user_id).await?;
    Ok(Json(json!({ "subjects": subjects })).into_response())
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(subject_id): Path<String>,
) -> Result<Response, AppError> {
    state
        .store
        .find_subject(&requester.user_id, &subject_id)
        .await?
        .ok_or(AppError::NotFound("Subject"))?;

    // Stored objects for the subject's notes are removed best-effort; the
    // records go regardless.
    let notes = state
        .store
        .list_subject_notes(&requester.user_id, &subject_id)
        .await?;
    for note in &notes {
        for url in [&note.file_url, &note.cover_image_url] {
            if url.as_str() == PLACEHOLDER_COVER_URL {
                continue;
            }
            if let Some(key) = state.objects.key_for_url(url) {
                if let Err(err) = state.objects.delete(&key).await {
                    tracing::warn!("failed to delete stored file {key}: {err}");
                }
            }
        }
    }

    state
        .store
        .delete_subject_cascade(&requester.user_id, &subject_id)
        .await?;
    info!(
        "subject {subject_id} deleted with {} notes",
        notes.len()
    );

    Ok(Json(json!({ "message": "Subject and its notes deleted" })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;
    use crate::state::testing;

    fn subject_request(name: &str) -> Json<CreateSubjectRequest> {
        Json(CreateSubjectRequest {
            subject_name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "s@example.com").await;

        let response = create(
            State(state.clone()),
            requester.clone(),
            subject_request("Biology"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let subjects = state.store.list_subjects(&requester.user_id).await.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].subject_name, "Biology");
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let state = testing::state().await;
        let requester = testing::seed_user(&state, "s@example.com").await;
        let err = create(State(state.clone()), requester, subject_request("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_scopes_to_owner() {
        let state = testing::state().await;
        let owner = testing::seed_user(&state, "owner@example.com").await;
        let other = testing::seed_user(&state, "other@example.com").await;

        create(State(state.clone()), owner.clone(), subject_request("Math"))
            .await
            .unwrap();
        let subject = state.store.list_subjects(&owner.user_id).await.unwrap()[0].clone();

        let file_key = format!("users/{}/week1.pdf", owner.user_id);
        let file_url = state
            .objects
            .upload(&file_key, b"pdf bytes".to_vec(), "application/pdf")
            .await
            .unwrap();
        let cover_key = format!("users/{}/cover.png", owner.user_id);
        let cover_image_url = state
            .objects
            .upload(&cover_key, b"cover bytes".to_vec(), "image/png")
            .await
            .unwrap();
        state
            .store
            .insert_note(Note {
                id: Uuid::new_v4().to_string(),
                user_id: owner.user_id.clone(),
                subject_id: Some(subject.id.clone()),
                title: "Week 1".to_string(),
                description: "intro".to_string(),
                filename: "week1.pdf".to_string(),
                file_url,
                content_type: "application/pdf".to_string(),
                cover_image_url,
                status: "pending".to_string(),
                created_at: Utc::now(),
                subject_name: None,
            })
            .await
            .unwrap();

        // Another user cannot delete it.
        let err = remove(State(state.clone()), other, Path(subject.id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Subject")));

        remove(State(state.clone()), owner.clone(), Path(subject.id.clone()))
            .await
            .unwrap();
        assert!(state
            .store
            .find_subject(&owner.user_id, &subject.id)
            .await
            .unwrap()
            .is_none());
        assert!(state
            .store
            .list_notes(&owner.user_id)
            .await
            .unwrap()
            .is_empty());
        // Both the document and its cover leave the object store.
        assert!(state.objects.fetch(&file_key).await.is_err());
        assert!(state.objects.fetch(&cover_key).await.is_err());
    }
}
