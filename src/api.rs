//! Compliance facade: the HTTP boundary of the lifecycle engine.
//!
//! Seven operator-facing routes: sign, verify, register retention, force
//! backup, force integrity check, statistics, and backup listing. Every
//! mutating route requires an elevated role; the authentication layer itself
//! is out of scope and supplies the actor via `x-actor-id` / `x-actor-role`
//! headers. Responses use a `{success, message, ...}` JSON envelope with 200
//! on success and 4xx/5xx with a message on failure.

use crate::archive::BackupArchiver;
use crate::config::ApiConfig;
use crate::error::{CustodiaError, Result};
use crate::integrity::IntegrityService;
use crate::observability;
use crate::retention::RetentionService;
use crate::signature::{SignRequest, SignatureLedger};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state behind the facade.
#[derive(Clone)]
pub struct ApiState {
    pub retention: Arc<RetentionService>,
    pub integrity: Arc<IntegrityService>,
    pub signatures: Arc<SignatureLedger>,
    pub archiver: Arc<BackupArchiver>,
}

/// Actor roles recognized by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator,
    Clinician,
}

/// The caller, as asserted by the (out-of-scope) authentication layer.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Option<Role>,
}

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let role = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| match raw.to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Some(Role::Administrator),
            "clinician" => Some(Role::Clinician),
            _ => None,
        });

    Actor { id, role }
}

fn require_role(headers: &HeaderMap, allowed: &[Role]) -> std::result::Result<Actor, Response> {
    let actor = actor_from_headers(headers);
    match actor.role {
        Some(role) if allowed.contains(&role) => Ok(actor),
        _ => Err(failure(
            StatusCode::FORBIDDEN,
            "caller role is not permitted for this operation",
        )),
    }
}

fn ok(body: serde_json::Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn error_response(e: &CustodiaError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    failure(status, e.to_string())
}

/// Build the facade router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/compliance/sign", post(sign_document))
        .route("/compliance/verify/:document_id", get(verify_signature))
        .route("/compliance/retention/register", post(register_retention))
        .route("/compliance/backup/create", post(create_backup))
        .route("/compliance/integrity/verify", post(verify_integrity))
        .route("/compliance/statistics", get(statistics))
        .route("/compliance/backups", get(list_backups))
        .with_state(state)
}

/// Serve the facade until the task is aborted.
pub async fn run_api_server(config: ApiConfig, state: ApiState) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Compliance facade listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| CustodiaError::Network(e.to_string()))?;
    Ok(())
}

async fn sign_document(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SignRequest>,
) -> Response {
    let _actor = match require_role(&headers, &[Role::Clinician, Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match state.signatures.sign(request).await {
        Ok(signature) => {
            observability::record_signature_created();
            ok(json!({
                "success": true,
                "message": "document signed",
                "signatureId": signature.id,
                "signedAt": signature.signed_at,
            }))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyQuery {
    document_content: String,
    document_type: Option<String>,
}

async fn verify_signature(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let _actor = match require_role(&headers, &[Role::Clinician, Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match state
        .signatures
        .verify(
            &document_id,
            query.document_type.as_deref(),
            &query.document_content,
        )
        .await
    {
        Ok(is_valid) => {
            observability::record_signature_verification(is_valid);
            ok(json!({
                "success": true,
                "isValid": is_valid,
                "message": if is_valid { "signature valid" } else { "signature invalid" },
            }))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRetentionRequest {
    entity_type: String,
    entity_id: String,
    created_at: DateTime<Utc>,
    retention_days: Option<u32>,
}

async fn register_retention(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRetentionRequest>,
) -> Response {
    let actor = match require_role(&headers, &[Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match state
        .retention
        .register(
            &request.entity_type,
            &request.entity_id,
            request.created_at,
            request.retention_days,
            &actor.id,
        )
        .await
    {
        Ok(record) => ok(json!({
            "success": true,
            "message": "entity registered for retention",
            "retentionId": record.id,
            "retentionUntil": record.retention_until,
        })),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityRequest {
    entity_type: String,
    entity_id: String,
}

async fn create_backup(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<EntityRequest>,
) -> Response {
    let actor = match require_role(&headers, &[Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match state
        .retention
        .force_backup(&request.entity_type, &request.entity_id, &actor.id)
        .await
    {
        Ok((location, _digest)) => ok(json!({
            "success": true,
            "message": "backup created",
            "backupLocation": location,
        })),
        Err(e) => error_response(&e),
    }
}

async fn verify_integrity(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<EntityRequest>,
) -> Response {
    let _actor = match require_role(&headers, &[Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match state
        .integrity
        .verify_record(&request.entity_type, &request.entity_id, Utc::now())
        .await
    {
        Ok(is_valid) => ok(json!({
            "success": true,
            "isValid": is_valid,
            "message": if is_valid {
                "integrity verified"
            } else {
                "integrity problems detected"
            },
        })),
        Err(e) => error_response(&e),
    }
}

async fn statistics(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let _actor = match require_role(&headers, &[Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    // Best effort: each section is computed independently and a bad backup
    // entry is skipped by the listing rather than failing the response.
    let retention = state.retention.statistics().await;
    let integrity = state.integrity.statistics().await;
    let backups = state.archiver.list_backups().await;

    ok(json!({
        "success": true,
        "retention": {
            "totalRecords": retention.total_records,
            "backedUpRecords": retention.backed_up_records,
            "pendingDeletion": retention.pending_deletion,
            "deletedRecords": retention.deleted_records,
        },
        "integrity": {
            "totalRecords": integrity.total_records,
            "verifiedRecords": integrity.verified_records,
            "failedRecords": integrity.failed_records,
            "integrityPercentage": integrity.integrity_percentage,
        },
        "backups": {
            "totalBackups": backups.len(),
            "backups": backups,
        },
    }))
}

async fn list_backups(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let _actor = match require_role(&headers, &[Role::Administrator]) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let backups = state.archiver.list_backups().await;
    ok(json!({ "success": true, "backups": backups }))
}
