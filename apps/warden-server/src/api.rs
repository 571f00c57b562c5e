//! Admin HTTP surface. This stands in for whatever front-end drives
//! the engine; rendering and localization live on the other side of
//! the event bus.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use warden_engine::{Engine, EngineError, Verdict};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/requests", post(submit_request))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/approve", post(approve_request))
        .route("/requests/{id}/deny", post(deny_request))
        .route("/whitelist/sync", post(sync_whitelist))
        .route("/whois/{name}", get(whois))
        .route("/identities/{identity}/names", get(identity_names))
        .with_state(state)
}

#[derive(Deserialize)]
struct SubmitReq {
    identity: i64,
    origin_channel: i64,
    in_game_name: String,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
struct DecideReq {
    reviewer: i64,
}

async fn submit_request(
    State(state): State<AppState>,
    Json(req): Json<SubmitReq>,
) -> Response {
    match state
        .engine
        .submit(
            req.identity,
            req.origin_channel,
            &req.in_game_name,
            req.comment.as_deref(),
        )
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_request(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.engine.store().get_async(id).await {
        Ok(Some(req)) => Json(req).into_response(),
        Ok(None) => error_response(EngineError::NotFound(id)),
        Err(err) => error_response(err.into()),
    }
}

async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DecideReq>,
) -> Response {
    decide(state, id, Verdict::Approve, req.reviewer).await
}

async fn deny_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DecideReq>,
) -> Response {
    decide(state, id, Verdict::Deny, req.reviewer).await
}

async fn decide(state: AppState, id: i64, verdict: Verdict, reviewer: i64) -> Response {
    match state.engine.decide(id, verdict, reviewer).await {
        Ok(req) => Json(req).into_response(),
        Err(err) => error_response(err),
    }
}

async fn sync_whitelist(State(state): State<AppState>) -> Response {
    match state.engine.reconcile().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn whois(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.engine.store().identity_for_name_async(&name).await {
        Ok(Some(identity)) => Json(json!({"identity": identity})).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no approved request for {name:?}")})),
        )
            .into_response(),
        Err(err) => error_response(err.into()),
    }
}

async fn identity_names(State(state): State<AppState>, Path(identity): Path<i64>) -> Response {
    match state.engine.store().names_for_identity_async(identity).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => error_response(err.into()),
    }
}

fn error_response(err: EngineError) -> Response {
    let (status, retryable) = match &err {
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, false),
        EngineError::AlreadyDecided(_) => (StatusCode::CONFLICT, false),
        EngineError::InvalidName(_) => (StatusCode::UNPROCESSABLE_ENTITY, false),
        EngineError::RemoteUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, true),
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, false),
    };
    (
        status,
        Json(json!({"error": err.to_string(), "retryable": retryable})),
    )
        .into_response()
}
