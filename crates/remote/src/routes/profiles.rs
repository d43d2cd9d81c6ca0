//! The `profiles` table, filtered the way the hosted row API filters it:
//! `id=eq.<uuid>` selects the row, `select=` projects columns, and callers
//! only ever see their own row.

use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Map, Value};
use tracing::instrument;
use utils::api::profile::{ProfilePatch, ProfileRecord};
use uuid::Uuid;

use super::error::ErrorResponse;
use crate::{AppState, auth::RequestContext};

pub fn router() -> Router<AppState> {
    Router::new().route("/rest/v1/profiles", get(select_profiles).patch(update_profiles))
}

#[instrument(name = "profiles.select", skip(state, params), fields(user_id = %ctx.user_id))]
pub async fn select_profiles(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, ErrorResponse> {
    let id = id_filter(&params)?;
    let columns = params.get("select").map(String::as_str).unwrap_or("*");

    let rows = match visible_row(&state, &ctx, id).await {
        Some(record) => vec![project(&record, columns)?],
        None => Vec::new(),
    };
    Ok(Json(rows))
}

#[instrument(name = "profiles.update", skip(state, params, headers, patch), fields(user_id = %ctx.user_id))]
pub async fn update_profiles(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> Result<Response, ErrorResponse> {
    let id = id_filter(&params)?;

    // Rows owned by someone else are invisible, so the update matches nothing.
    let updated = if id == ctx.user_id {
        state.store().patch_profile(id, &patch).await?
    } else {
        None
    };

    let wants_rows = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("return=representation"));
    if wants_rows {
        Ok(Json(updated.into_iter().collect::<Vec<_>>()).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

async fn visible_row(state: &AppState, ctx: &RequestContext, id: Uuid) -> Option<ProfileRecord> {
    if id != ctx.user_id {
        return None;
    }
    state.store().profile(id).await
}

fn id_filter(params: &HashMap<String, String>) -> Result<Uuid, ErrorResponse> {
    let raw = params.get("id").ok_or_else(|| {
        ErrorResponse::new(StatusCode::BAD_REQUEST, "an `id=eq.<uuid>` filter is required")
    })?;
    raw.strip_prefix("eq.")
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| {
            ErrorResponse::new(
                StatusCode::BAD_REQUEST,
                format!("invalid input syntax for type uuid: \"{raw}\""),
            )
        })
}

fn project(record: &ProfileRecord, columns: &str) -> Result<Value, ErrorResponse> {
    let Value::Object(all) = serde_json::to_value(record).map_err(|e| {
        ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?
    else {
        return Err(ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "profile row is not an object",
        ));
    };
    if columns.trim() == "*" {
        return Ok(Value::Object(all));
    }

    let mut picked = Map::new();
    for column in columns.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let value = all.get(column).ok_or_else(|| {
            ErrorResponse::new(
                StatusCode::BAD_REQUEST,
                format!("column profiles.{column} does not exist"),
            )
        })?;
        picked.insert(column.to_string(), value.clone());
    }
    Ok(Value::Object(picked))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keeps_requested_columns_in_order() {
        let record = ProfileRecord {
            id: Uuid::nil(),
            username: Some("kisan".into()),
            full_name: None,
            avatar_url: None,
            updated_at: None,
        };
        let row = project(&record, "username,full_name,avatar_url").unwrap();
        assert_eq!(
            row,
            serde_json::json!({"username": "kisan", "full_name": null, "avatar_url": null})
        );
        assert!(project(&record, "username,email").is_err());
    }

    #[test]
    fn id_filter_needs_eq_operator() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), format!("eq.{}", Uuid::nil()));
        assert_eq!(id_filter(&params).unwrap(), Uuid::nil());

        params.insert("id".to_string(), "u1".to_string());
        assert!(id_filter(&params).is_err());
    }
}
