//! REST API server for the Numa assistant
//!
//! Thin adapter around the orchestrator: request routing, multipart
//! parsing and owner-token validation live here; all behavior lives in
//! the core.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::NumaError;
use crate::models::{Period, TransactionFilter, TransactionKind, TransactionStatus};
use crate::orchestrator::Orchestrator;
use crate::taxonomy::Category;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State & Auth
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth_secret: String,
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Opaque credential digest stored on the user row. The core never
/// interprets it; equality is the whole contract.
pub fn hash_credential(password: &str, secret: &str) -> String {
    sha256_hex(&format!("{}:{}", secret, password))
}

/// Bearer token: "<owner_id>.<signature>". Stateless to validate and
/// bound to the configured secret.
pub fn issue_token(owner: Uuid, secret: &str) -> String {
    format!("{}.{}", owner, sha256_hex(&format!("{}:{}", secret, owner)))
}

fn verify_token(token: &str, secret: &str) -> Option<Uuid> {
    let (id_part, signature) = token.split_once('.')?;
    let owner = Uuid::parse_str(id_part).ok()?;
    if sha256_hex(&format!("{}:{}", secret, owner)) == signature {
        Some(owner)
    } else {
        None
    }
}

fn current_owner(headers: &HeaderMap, state: &ApiState) -> Result<Uuid, (StatusCode, Json<ApiResponse>)> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| verify_token(token, &state.auth_secret))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Could not validate credentials".into())),
            )
        })
}

fn status_for(error: &NumaError) -> StatusCode {
    match error {
        NumaError::TransactionNotFound | NumaError::UnknownOwner => StatusCode::NOT_FOUND,
        NumaError::NotProvisional(_) => StatusCode::CONFLICT,
        NumaError::MissingMerchant
        | NumaError::InvalidAmount(_)
        | NumaError::InvalidConcept(_)
        | NumaError::DuplicateEmail(_)
        | NumaError::UnintelligibleAudio => StatusCode::BAD_REQUEST,
        NumaError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: NumaError) -> (StatusCode, Json<ApiResponse>) {
    (status_for(&error), Json(ApiResponse::error(error.to_string())))
}

async fn read_upload(mut multipart: Multipart, field_names: &[&str]) -> Option<Vec<u8>> {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if field_names.contains(&name.as_str()) {
            return field.bytes().await.ok().map(|b| b.to_vec());
        }
    }
    None
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn register(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let credential_hash = hash_credential(&req.password, &state.auth_secret);

    match state
        .orchestrator
        .ledger()
        .register_user(&req.email, &req.name, &credential_hash)
        .await
    {
        Ok(user) => (StatusCode::CREATED, Json(ApiResponse::success(user))),
        Err(e) => error_response(e),
    }
}

async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user = match state
        .orchestrator
        .ledger()
        .find_user_by_email(&req.email)
        .await
    {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let valid = user
        .as_ref()
        .map(|u| u.credential_hash == hash_credential(&req.password, &state.auth_secret))
        .unwrap_or(false);

    match (user, valid) {
        (Some(user), true) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "access_token": issue_token(user.id, &state.auth_secret),
                "token_type": "bearer",
            }))),
        ),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Incorrect email or password".into())),
        ),
    }
}

async fn voice(
    State(state): State<ApiState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> (StatusCode, Json<serde_json::Value>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err((status, response)) => {
            return (status, Json(serde_json::to_value(response.0).unwrap_or_default()))
        }
    };

    let Some(audio) = read_upload(multipart, &["audio_file", "audio"]).await else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": "audio_file field is required"})),
        );
    };

    info!(owner_id = %owner, audio_bytes = audio.len(), "Voice upload received");
    let envelope = state.orchestrator.handle_voice(owner, &audio).await;
    let status = match envelope.envelope_type {
        crate::models::EnvelopeType::Error => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(serde_json::to_value(envelope).unwrap_or_default()))
}

async fn chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err((status, response)) => {
            return (status, Json(serde_json::to_value(response.0).unwrap_or_default()))
        }
    };

    let envelope = state.orchestrator.handle_text(owner, &req.message).await;
    let status = match envelope.envelope_type {
        crate::models::EnvelopeType::Error => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(serde_json::to_value(envelope).unwrap_or_default()))
}

async fn verify_with_document(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(transaction_id): Path<Uuid>,
    multipart: Multipart,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err(rejection) => return rejection,
    };

    let Some(document) = read_upload(multipart, &["document", "file"]).await else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("document field is required".into())),
        );
    };

    match state
        .orchestrator
        .verify_document(owner, transaction_id, &document)
        .await
    {
        Ok(transaction) => (StatusCode::OK, Json(ApiResponse::success(transaction))),
        Err(e) => error_response(e),
    }
}

async fn verify_manual(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(transaction_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err(rejection) => return rejection,
    };

    match state.orchestrator.manual_verify(owner, transaction_id).await {
        Ok(transaction) => (StatusCode::OK, Json(ApiResponse::success(transaction))),
        Err(e) => error_response(e),
    }
}

fn parse_filter(params: &HashMap<String, String>) -> TransactionFilter {
    TransactionFilter {
        period: params.get("period").and_then(|p| match p.as_str() {
            "today" => Some(Period::Today),
            "yesterday" => Some(Period::Yesterday),
            "week" => Some(Period::ThisWeek),
            "month" => Some(Period::ThisMonth),
            _ => None,
        }),
        category: params.get("category").and_then(|c| Category::parse(c)),
        status: params.get("status").and_then(|s| match s.as_str() {
            "provisional" => Some(TransactionStatus::Provisional),
            "verified" => Some(TransactionStatus::Verified),
            "verified_manual" => Some(TransactionStatus::VerifiedManual),
            _ => None,
        }),
        kind: params.get("type").and_then(|t| match t.as_str() {
            "EXPENSE" => Some(TransactionKind::Expense),
            "INCOME" => Some(TransactionKind::Income),
            "DEBT" => Some(TransactionKind::Debt),
            _ => None,
        }),
    }
}

async fn list_transactions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err(rejection) => return rejection,
    };

    let filter = parse_filter(&params);
    match state.orchestrator.list_transactions(owner, &filter).await {
        Ok(transactions) => (StatusCode::OK, Json(ApiResponse::success(transactions))),
        Err(e) => error_response(e),
    }
}

async fn daily_summary(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = match current_owner(&headers, &state) {
        Ok(owner) => owner,
        Err(rejection) => return rejection,
    };

    let date = params
        .get("date")
        .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive());

    match state.orchestrator.daily_summary(owner, date).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router & Startup
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, auth_secret: String) -> Router {
    let state = ApiState {
        orchestrator,
        auth_secret,
    };

    Router::new()
        .route("/health", get(health))
        .route("/users", post(register))
        .route("/token", post(login))
        .route("/api/voice", post(voice))
        .route("/api/chat", post(chat))
        .route("/api/transactions", get(list_transactions))
        .route("/api/transactions/:id/verify", post(verify_with_document))
        .route("/api/transactions/:id/verify_manual", post(verify_manual))
        .route("/api/summary/daily", get(daily_summary))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    auth_secret: String,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, auth_secret);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);
    axum::serve(listener, router).await?;

    Ok(())
}
