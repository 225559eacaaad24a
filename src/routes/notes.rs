//! Note endpoints: document upload, OCR + summarization pipeline, CRUD
//! over notes and their generated summaries.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::lm::ImageSource;
use crate::models::{GeneratedNote, Note, PLACEHOLDER_COVER_URL};
use crate::objects::{content_type_for, object_key};
use crate::state::AppState;

const ALLOWED_EXTENSIONS: [&str; 7] = ["pdf", "txt", "doc", "docx", "jpg", "jpeg", "png"];

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/generate", post(generate))
        .route("/extract_text", post(extract_text))
        .route("/list", get(list))
        .route("/get/:note_id", get(get_one))
        .route("/update/:note_id", put(update))
        .route("/delete/:note_id", delete(remove))
        .route("/update_generated_notes/:note_id", put(update_generated))
}

fn ensure_allowed_extension(filename: &str) -> Result<(), AppError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "File type not allowed: {filename}. Allowed: pdf, txt, doc, docx, jpg, jpeg, png"
        )))
    }
}

fn missing(field: &str) -> AppError {
    AppError::Validation(format!("Missing required field: {field}"))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut cover: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut subject_id: Option<String> = None;

    let form_error = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Malformed multipart body: {e}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(form_error)?.to_vec();
                file = Some((filename, bytes));
            }
            "cover_image" => {
                let filename = field.file_name().unwrap_or("cover.png").to_string();
                let bytes = field.bytes().await.map_err(form_error)?.to_vec();
                if !bytes.is_empty() {
                    cover = Some((filename, bytes));
                }
            }
            "title" => title = Some(field.text().await.map_err(form_error)?),
            "description" => description = Some(field.text().await.map_err(form_error)?),
            "subject_id" => subject_id = Some(field.text().await.map_err(form_error)?),
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| missing("file"))?;
    let title = title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| missing("title"))?;
    let description = description
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| missing("description"))?;
    let subject_id = subject_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| missing("subject_id"))?;

    ensure_allowed_extension(&filename)?;
    state
        .store
        .find_subject(&requester.user_id, &subject_id)
        .await?
        .ok_or(AppError::NotFound("Subject"))?;

    let content_type = content_type_for(&filename).to_string();
    let key = object_key(&requester.user_id, &filename);
    let file_url = state.objects.upload(&key, bytes, &content_type).await?;

    let cover_image_url = match cover {
        Some((cover_name, cover_bytes)) => {
            let cover_key = object_key(&requester.user_id, &cover_name);
            state
                .objects
                .upload(&cover_key, cover_bytes, content_type_for(&cover_name))
                .await?
        }
        None => PLACEHOLDER_COVER_URL.to_string(),
    };

    let note = Note {
        id: Uuid::new_v4().to_string(),
        user_id: requester.user_id,
        subject_id: Some(subject_id),
        title,
        description,
        filename,
        file_url: file_url.clone(),
        content_type,
        cover_image_url: cover_image_url.clone(),
        status: "pending".to_string(),
        created_at: Utc::now(),
        subject_name: None,
    };
    state.store.insert_note(note.clone()).await?;
    info!("note {} uploaded ({})", note.id, note.filename);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Note uploaded",
            "note_id": note.id,
            "file_url": file_url,
            "cover_image_url": cover_image_url,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct NoteIdRequest {
    pub note_id: String,
}

/// OCR + summarize pipeline. The stored object is handed to the model via
/// a time-limited link; the resulting HTML summary is upserted so a
/// re-generation overwrites the previous one.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Json(request): Json<NoteIdRequest>,
) -> Result<Response, AppError> {
    let mut note = state
        .store
        .find_note(&requester.user_id, &request.note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;

    let key = state
        .objects
        .key_for_url(&note.file_url)
        .ok_or_else(|| AppError::Internal(format!("note {} has a foreign file URL", note.id)))?;
    let presigned = state
        .objects
        .presign(&key, state.config.presign_ttl_secs)
        .await?;

    let text = state
        .lm
        .extract_text(ImageSource::Url(presigned), &note.content_type)
        .await?;
    let summary = state.lm.summarize(&text).await?;

    state
        .store
        .upsert_generated_note(GeneratedNote {
            id: Uuid::new_v4().to_string(),
            user_id: requester.user_id.clone(),
            note_id: note.id.clone(),
            subject_id: note.subject_id.clone(),
            content: summary.html.clone(),
            created_at: Utc::now(),
        })
        .await?;

    note.status = "completed".to_string();
    state.store.update_note(note).await?;
    info!(
        "note {} summarized ({} tokens)",
        request.note_id, summary.tokens_used
    );

    Ok(Json(json!({
        "message": "Notes generated",
        "summary": summary.html,
    }))
    .into_response())
}

/// OCR only: returns the raw extracted text without summarizing.
pub async fn extract_text(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Json(request): Json<NoteIdRequest>,
) -> Result<Response, AppError> {
    let note = state
        .store
        .find_note(&requester.user_id, &request.note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;

    let key = state
        .objects
        .key_for_url(&note.file_url)
        .ok_or_else(|| AppError::Internal(format!("note {} has a foreign file URL", note.id)))?;
    let bytes = state.objects.fetch(&key).await?;
    let text = state
        .lm
        .extract_text(ImageSource::Bytes(bytes), &note.content_type)
        .await?;

    Ok(Json(json!({ "extracted_text": text })).into_response())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
) -> Result<Response, AppError> {
    let notes = state.store.list_notes(&requester.user_id).await?;
    Ok(Json(json!({ "notes": notes })).into_response())
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(note_id): Path<String>,
) -> Result<Response, AppError> {
    let note = state
        .store
        .find_note(&requester.user_id, &note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;
    let generated = state
        .store
        .find_generated_note(&requester.user_id, &note_id)
        .await?;

    Ok(Json(json!({
        "note": note,
        "generated_note": generated.map(|g| g.content),
    }))
    .into_response())
}

#[derive(Deserialize, Default)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject_id: Option<String>,
    pub cover_image_url: Option<String>,
    pub status: Option<String>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(note_id): Path<String>,
    Json(request): Json<UpdateNoteRequest>,
) -> Result<Response, AppError> {
    let mut note = state
        .store
        .find_note(&requester.user_id, &note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;

    if let Some(subject_id) = request.subject_id {
        state
            .store
            .find_subject(&requester.user_id, &subject_id)
            .await?
            .ok_or(AppError::NotFound("Subject"))?;
        note.subject_id = Some(subject_id);
    }
    if let Some(title) = request.title {
        note.title = title;
    }
    if let Some(description) = request.description {
        note.description = description;
    }
    if let Some(cover_image_url) = request.cover_image_url {
        note.cover_image_url = cover_image_url;
    }
    if let Some(status) = request.status {
        note.status = status;
    }

    note.subject_name = None;
    state.store.update_note(note).await?;
    Ok(Json(json!({ "message": "Note updated" })).into_response())
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(note_id): Path<String>,
) -> Result<Response, AppError> {
    let note = state
        .store
        .find_note(&requester.user_id, &note_id)
        .await?
        .ok_or(AppError::NotFound("Note"))?;

    // Stored assets go best-effort; the records go regardless.
    for url in [&note.file_url, &note.cover_image_url] {
        if url.as_str() == PLACEHOLDER_COVER_URL {
            continue;
        }
        if let Some(key) = state.objects.key_for_url(url) {
            if let Err(err) = state.objects.delete(&key).await {
                warn!("failed to delete stored file {key}: {err}");
            }
        }
    }

    state.store.delete_note(&requester.user_id, &note_id).await?;
    Ok(Json(json!({ "message": "Note deleted" })).into_response())
}

#[derive(Deserialize)]
pub struct UpdateGeneratedRequest {
    pub content: String,
}

pub async fn update_generated(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
    Path(note_id): Path<String>,
    Json(request): Json<UpdateGeneratedRequest>,
) -> Result<Response, AppError> {
    if request.content.trim().is_empty() {
        return Err(missing("content"));
    }
    let matched = state
        .store
        .update_generated_content(&requester.user_id, &note_id, request.content)
        .await?;
    if matched == 0 {
        return Err(AppError::NotFound("Generated note"));
    }
    Ok(Json(json!({ "message": "Generated notes updated" })).into_response())
}
