//! Account endpoints: signup, login, logout, token refresh, profile.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{
    bearer_token, hash_password, is_valid_email, is_valid_password, verify_password, AuthUser,
    TokenKind,
};
use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<Response, AppError> {
    let email = request.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if !is_valid_password(&request.password) {
        return Err(AppError::Validation(
            "Password must be at least 8 characters with an uppercase letter, a lowercase \
             letter and a digit"
                .to_string(),
        ));
    }
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(
            "An account with this email already exists".to_string(),
        ));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.clone(),
        password_hash: hash_password(&request.password),
        full_name: request.full_name,
        created_at: Utc::now(),
    };
    state.store.insert_user(user.clone()).await?;
    info!("new account registered: {}", user.id);

    let access_token = state.tokens.mint(&user.id, TokenKind::Access)?;
    let refresh_token = state.tokens.mint(&user.id, TokenKind::Refresh)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Account created",
            "access_token": access_token,
            "refresh_token": refresh_token,
            "user": { "id": user.id, "email": user.email },
        })),
    )
        .into_response())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let email = request.email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(AppError::Auth("Invalid password".to_string()));
    }

    let access_token = state.tokens.mint(&user.id, TokenKind::Access)?;
    let refresh_token = state.tokens.mint(&user.id, TokenKind::Refresh)?;

    Ok(Json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "user": { "id": user.id, "email": user.email },
    }))
    .into_response())
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
) -> Result<Response, AppError> {
    state.tokens.revoke(&requester.jti);
    Ok(Json(json!({ "message": "Logged out" })).into_response())
}

/// Exchanges a refresh token, presented as the bearer credential, for a
/// fresh access token.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)?;
    let claims = state.tokens.verify(token, TokenKind::Refresh)?;
    let access_token = state.tokens.mint(&claims.sub, TokenKind::Access)?;
    Ok(Json(json!({ "access_token": access_token })).into_response())
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    requester: AuthUser,
) -> Result<Response, AppError> {
    let user = state
        .store
        .find_user_by_id(&requester.user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "full_name": user.full_name,
        "created_at": user.created_at,
    }))
    .into_response())
}
