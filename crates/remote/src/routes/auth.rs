use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tracing::{info, instrument};
use utils::api::auth::{AuthUser, PasswordGrantRequest, TokenResponse, UpdateUserRequest};
use uuid::Uuid;

use super::error::ErrorResponse;
use crate::{
    AppState,
    auth::{ACCESS_TOKEN_TTL_SECS, RequestContext},
    store::{Account, StoreError},
};

const MIN_PASSWORD_CHARS: usize = 6;

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/auth/v1/user", get(current_user).put(update_user))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/admin/users/{user_id}", delete(delete_user))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub grant_type: String,
}

#[instrument(name = "auth.token", skip(state, payload), fields(grant_type = %query.grant_type))]
pub async fn token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(payload): Json<PasswordGrantRequest>,
) -> Result<Json<TokenResponse>, ErrorResponse> {
    if query.grant_type != "password" {
        return Err(ErrorResponse::oauth(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "Only the password grant is supported",
        ));
    }

    let account = state
        .store()
        .verify_password(payload.email.trim(), &payload.password)
        .await
        .map_err(|_| {
            ErrorResponse::oauth(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "Invalid login credentials",
            )
        })?;

    issue_token(&state, &account).await.map(Json)
}

#[instrument(name = "auth.signup", skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<PasswordGrantRequest>,
) -> Result<Json<TokenResponse>, ErrorResponse> {
    let email = payload.email.trim();
    if !email.contains('@') {
        return Err(ErrorResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Unable to validate email address: invalid format",
        ));
    }
    check_password(&payload.password)?;

    let account = state
        .store()
        .create_account(email, &payload.password)
        .await
        .map_err(|error| match error {
            StoreError::Conflict(message) => {
                ErrorResponse::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            other => other.into(),
        })?;
    info!(user_id = %account.id, "account created");

    issue_token(&state, &account).await.map(Json)
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<AuthUser>, ErrorResponse> {
    let account = state.store().account(ctx.user_id).await?;
    Ok(Json(account.to_user()))
}

#[instrument(name = "auth.update_user", skip(state, payload), fields(user_id = %ctx.user_id))]
pub async fn update_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<AuthUser>, ErrorResponse> {
    if let Some(password) = &payload.password {
        check_password(password)?;
    }
    let current = state.store().account(ctx.user_id).await?;
    // Changing to the same address is accepted and does nothing.
    let new_email = payload
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.eq_ignore_ascii_case(&current.email));
    if new_email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(ErrorResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Unable to validate email address: invalid format",
        ));
    }

    let account = state
        .store()
        .update_account(ctx.user_id, new_email, payload.password)
        .await?;
    Ok(Json(account.to_user()))
}

#[instrument(name = "auth.logout", skip(state), fields(user_id = %ctx.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ErrorResponse> {
    state.store().revoke_session(ctx.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accounts may only delete themselves.
#[instrument(name = "auth.delete_user", skip(state), fields(user_id = %ctx.user_id))]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    if user_id != ctx.user_id {
        return Err(ErrorResponse::new(StatusCode::FORBIDDEN, "User not allowed"));
    }
    state.store().delete_account(user_id).await?;
    info!(%user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn check_password(password: &str) -> Result<(), ErrorResponse> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ErrorResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Password should be at least 6 characters.",
        ));
    }
    Ok(())
}

async fn issue_token(state: &AppState, account: &Account) -> Result<TokenResponse, ErrorResponse> {
    let session = state.store().open_session(account.id).await;
    let access_token = state.jwt().encode(&session, account).map_err(|error| {
        tracing::error!(?error, "failed to sign access token");
        ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to sign access token")
    })?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: Some(ACCESS_TOKEN_TTL_SECS),
        refresh_token: None,
        user: account.to_user(),
    })
}
