use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use secrecy::ExposeSecret;
use tracing::warn;
use uuid::Uuid;

use crate::{AppState, routes::error::ErrorResponse, store::StoreError};

pub const API_KEY_HEADER: &str = "apikey";

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// Every route needs the project key in the `apikey` header.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if key == state.config().anon_key.expose_secret() => next.run(req).await,
        Some(_) => {
            ErrorResponse::new(StatusCode::UNAUTHORIZED, "Invalid API key").into_response()
        }
        None => ErrorResponse::new(StatusCode::UNAUTHORIZED, "No API key found in request")
            .into_response(),
    }
}

/// Resolves the bearer token to a live session and attaches a
/// [`RequestContext`].
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let bearer = match req.headers().typed_get::<Authorization<Bearer>>() {
        Some(Authorization(token)) => token.token().to_owned(),
        None => return unauthorized("Missing authorization header"),
    };

    let identity = match state.jwt().decode(&bearer) {
        Ok(identity) => identity,
        Err(error) => {
            warn!(?error, "failed to decode session token");
            return unauthorized("Invalid JWT");
        }
    };

    let session = match state.store().session(identity.session_id).await {
        Ok(session) => session,
        Err(StoreError::NotFound(_)) => {
            warn!("session `{}` not found", identity.session_id);
            return unauthorized("Session not found");
        }
        Err(error) => {
            warn!(?error, "failed to load session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if session.revoked_at.is_some() || session.user_id != identity.user_id {
        warn!("session `{}` rejected (revoked or reassigned)", session.id);
        return unauthorized("Session expired");
    }

    req.extensions_mut().insert(RequestContext {
        user_id: session.user_id,
        session_id: session.id,
    });

    next.run(req).await
}

fn unauthorized(message: &str) -> Response {
    ErrorResponse::new(StatusCode::UNAUTHORIZED, message).into_response()
}
