use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AsHeaderName, CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use tracing::{debug, instrument};
use utils::api::storage::{UPSERT_HEADER, UploadObjectResponse};

use super::error::ErrorResponse;
use crate::{AppState, auth::RequestContext, store::StoredObject};

/// Uploads; size is checked by the handler against the configured limit.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/storage/v1/object/{bucket}/{*path}", post(upload_object))
        .layer(DefaultBodyLimit::disable())
}

/// Public reads need neither the project key nor a session.
pub fn public_router() -> Router<AppState> {
    Router::new().route(
        "/storage/v1/object/public/{bucket}/{*path}",
        get(public_object),
    )
}

#[instrument(
    name = "storage.upload",
    skip(state, headers, body),
    fields(user_id = %ctx.user_id, bytes = body.len())
)]
pub async fn upload_object(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadObjectResponse>, ErrorResponse> {
    ensure_bucket(&state, &bucket)?;

    // Objects live under a folder named after their owner.
    let owner = path.split('/').next().unwrap_or_default();
    if owner != ctx.user_id.to_string() {
        return Err(ErrorResponse::new(
            StatusCode::FORBIDDEN,
            "new row violates row-level security policy",
        ));
    }

    if body.len() > state.config().max_object_bytes {
        return Err(ErrorResponse::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "The object exceeded the maximum allowed size",
        ));
    }

    let upsert = header(&headers, UPSERT_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let object = StoredObject {
        bytes: body,
        content_type: header(&headers, CONTENT_TYPE)
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        cache_control: header(&headers, CACHE_CONTROL),
        updated_at: Utc::now(),
    };

    state
        .store()
        .put_object(&bucket, &path, object, upsert)
        .await?;
    debug!(%bucket, %path, upsert, "object stored");

    Ok(Json(UploadObjectResponse {
        key: format!("{bucket}/{path}"),
    }))
}

pub async fn public_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Response, ErrorResponse> {
    ensure_bucket(&state, &bucket)?;
    let object = state
        .store()
        .object(&bucket, &path)
        .await
        .ok_or_else(|| ErrorResponse::new(StatusCode::NOT_FOUND, "Object not found"))?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&object.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(value) = object
        .cache_control
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(CACHE_CONTROL, value);
    }
    Ok((headers, object.bytes).into_response())
}

fn header(headers: &HeaderMap, name: impl AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn ensure_bucket(state: &AppState, bucket: &str) -> Result<(), ErrorResponse> {
    if state.config().buckets.iter().any(|b| b == bucket) {
        Ok(())
    } else {
        Err(ErrorResponse::new(StatusCode::NOT_FOUND, "Bucket not found"))
    }
}
