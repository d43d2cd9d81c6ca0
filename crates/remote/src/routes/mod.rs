use axum::{
    Router,
    http::{Request, header::HeaderName},
    middleware,
    routing::get,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, field};

use crate::{
    AppState,
    auth::{require_api_key, require_session},
};

mod auth;
pub mod error;
mod profiles;
mod storage;

pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .and_then(|id| id.header_value().to_str().ok());
            let span = tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = field::Empty
            );
            if let Some(request_id) = request_id {
                span.record("request_id", field::display(request_id));
            }
            span
        })
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR));

    let public_top = Router::<AppState>::new()
        .route("/health", get(health))
        .merge(storage::public_router());

    let keyed_protected = Router::<AppState>::new()
        .merge(profiles::router())
        .merge(storage::router())
        .merge(auth::protected_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let keyed = Router::<AppState>::new()
        .merge(auth::public_router())
        .merge(keyed_protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::<AppState>::new()
        .merge(public_top)
        .merge(keyed)
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid {},
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
