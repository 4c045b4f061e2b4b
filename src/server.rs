//! HTTP surface of the orchestrator.
//!
//! Per-adapter publish failures are normal, reported outcomes; only
//! orchestrator-internal failures surface as 500s.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::ai::{GenerationService, TranscriptionService};
use crate::db::{self, Pool};
use crate::fanout::Orchestrator;
use crate::model::{Post, PostStatus, PublishResult, ServiceKind};

const ALLOWED_AUDIO_TYPES: &[&str] = &["audio/mpeg", "audio/wav", "audio/ogg", "audio/webm"];

/// Server state shared across handlers.
pub struct AppState {
    pub pool: Pool,
    pub orchestrator: Orchestrator,
    pub generator: Arc<dyn GenerationService>,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub shutdown: CancellationToken,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/publish", post(publish_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/transcribe", post(transcribe_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    account_ids: Vec<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media_urls: Vec<String>,
}

/// One entry per requested account. Service and name are absent for ids
/// with no matching active account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponseEntry {
    account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<ServiceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_name: Option<String>,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<PublishResult> for PublishResponseEntry {
    fn from(result: PublishResult) -> Self {
        Self {
            account_id: result.account_id,
            service: Some(result.service),
            account_name: Some(result.account_name),
            success: result.success,
            message_id: result.message_id,
            error: result.error,
        }
    }
}

async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> impl IntoResponse {
    let (Some(user_id), Some(post_id), Some(text)) = (
        req.user_id.filter(|s| !s.trim().is_empty()),
        req.post_id.filter(|s| !s.trim().is_empty()),
        req.text.filter(|s| !s.trim().is_empty()),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields");
    };
    if req.account_ids.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields");
    }

    let accounts = match db::fetch_active_accounts(&state.pool, &user_id, &req.account_ids).await {
        Ok(accounts) => accounts,
        Err(err) => {
            error!(?err, "failed to fetch accounts");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch accounts");
        }
    };
    if accounts.is_empty() {
        return error_response(StatusCode::NOT_FOUND, "No active accounts found");
    }

    // Adapters publish the request's content; the stored post row is only
    // the target of the final status write.
    let post = Post {
        id: post_id,
        user_id,
        generation_id: None,
        title: req.title,
        body: text,
        media_urls: req.media_urls,
        status: PostStatus::Draft,
        published_to: None,
        created_at: Utc::now(),
    };

    let cancel = state.shutdown.child_token();
    let (_status, results) = match state.orchestrator.publish(&post, accounts, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(?err, post_id = %post.id, "publish orchestration failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    // One entry per requested account id; ids without an active account
    // are reported, not silently dropped.
    let mut entries: Vec<PublishResponseEntry> =
        results.into_iter().map(PublishResponseEntry::from).collect();
    for account_id in &req.account_ids {
        if !entries.iter().any(|e| &e.account_id == account_id) {
            entries.push(PublishResponseEntry {
                account_id: account_id.clone(),
                service: None,
                account_name: None,
                success: false,
                message_id: None,
                error: Some("account not found or inactive".into()),
            });
        }
    }

    (
        StatusCode::OK,
        Json(json!({"success": true, "results": entries})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(default)]
    idea: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    let (Some(idea), Some(user_id)) = (
        req.idea.filter(|s| !s.trim().is_empty()),
        req.user_id.filter(|s| !s.trim().is_empty()),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields");
    };

    match db::get_daily_credits(&state.pool, &user_id).await {
        Ok(Some(credits)) if credits > 0 => {}
        Ok(_) => return error_response(StatusCode::TOO_MANY_REQUESTS, "Daily limit exceeded"),
        Err(err) => {
            error!(?err, "failed to fetch credits");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    }

    let text = match state.generator.generate(&idea).await {
        Ok(text) => text,
        Err(err) => {
            error!(?err, "generation failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    // History and quota are best-effort bookkeeping around the returned text.
    if let Err(err) = db::insert_generation(&state.pool, &user_id, &idea, &text).await {
        warn!(?err, "failed to record generation");
    }
    let credits_left = match db::spend_credit(&state.pool, &user_id).await {
        Ok(Some(left)) => left,
        Ok(None) => 0,
        Err(err) => {
            warn!(?err, "failed to spend credit");
            0
        }
    };

    (
        StatusCode::OK,
        Json(json!({"success": true, "text": text, "creditsLeft": credits_left})),
    )
}

async fn transcribe_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut audio: Option<(String, Vec<u8>)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("audio") {
            let content_type = field.content_type().unwrap_or_default().to_string();
            match field.bytes().await {
                Ok(bytes) => audio = Some((content_type, bytes.to_vec())),
                Err(err) => {
                    warn!(?err, "failed to read audio part");
                }
            }
            break;
        }
    }

    let Some((content_type, bytes)) = audio else {
        return error_response(StatusCode::BAD_REQUEST, "No audio file provided");
    };
    if !ALLOWED_AUDIO_TYPES.contains(&content_type.as_str()) {
        return error_response(StatusCode::BAD_REQUEST, "Unsupported audio format");
    }

    match state.transcriber.transcribe(&content_type, bytes).await {
        Ok(text) => (
            StatusCode::OK,
            Json(json!({"success": true, "text": text})),
        ),
        Err(err) => {
            error!(?err, "transcription failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({"error": message})))
}
