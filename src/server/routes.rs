/// REST API routes for the audit trail.
///
/// Error bodies are `{"detail": "..."}`. Only `resend` and `store_cid`
/// report chain failures to the caller; everywhere else an unanchored
/// hash is represented by a `null` transaction reference.
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AppState;
use crate::audit::{AnchorOutcome, GenericRecord, StoredReference, Verification};
use crate::chain::ChainMode;
use crate::error::AnchorError;
use crate::state::models::AuditRecord;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
}

fn service_error(e: AnchorError) -> ApiError {
    let status = match &e {
        AnchorError::NotFound(_) => StatusCode::NOT_FOUND,
        AnchorError::ReadOnly => StatusCode::FORBIDDEN,
        AnchorError::ChainUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        AnchorError::NotSent(_) | AnchorError::MissingField(_) | AnchorError::InvalidHash(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reject(status, e.to_string())
}

/// Malformed or missing JSON bodies are client errors with a `detail` body.
fn body_error(e: JsonRejection) -> ApiError {
    reject(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e.body_text()))
}

// ─── Health ──────────────────────────────────────────────

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    chain_mode: ChainMode,
    chain_connected: bool,
    read_only: bool,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        chain_mode: state.service.chain().mode(),
        chain_connected: state.service.chain().is_connected(),
        read_only: state.service.is_read_only(),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Audits ──────────────────────────────────────────────

/// GET /api/audits — All audit rows, newest first.
async fn list_audits(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    state.service.list().await.map(Json).map_err(service_error)
}

/// GET /api/audits/{id}
async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<AuditRecord>, ApiError> {
    state.service.get(id).await.map(Json).map_err(service_error)
}

/// GET /api/audits/{id}/verify — Check on-chain presence of the hash.
async fn verify_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Verification>, ApiError> {
    state.service.verify(id).await.map(Json).map_err(service_error)
}

#[derive(Debug, Serialize)]
struct ResendResponse {
    tx_hash: String,
}

/// POST /api/audits/{id}/resend — Submit the stored hash again.
async fn resend_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ResendResponse>, ApiError> {
    let tx_hash = state.service.resend(id).await.map_err(service_error)?;
    Ok(Json(ResendResponse { tx_hash }))
}

#[derive(Debug, Deserialize)]
struct StoreCidRequest {
    #[serde(default)]
    cid: Option<String>,
}

/// POST /api/audits/{id}/store_cid — Anchor an off-chain content identifier.
async fn store_cid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Result<Json<StoreCidRequest>, JsonRejection>,
) -> Result<Json<StoredReference>, ApiError> {
    state.service.get(id).await.map_err(service_error)?;

    let cid = match body {
        Ok(Json(req)) => req.cid.filter(|c| !c.trim().is_empty()),
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(e) => return Err(body_error(e)),
    }
    .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Missing cid in request body"))?;

    state
        .service
        .store_reference(id, &cid)
        .await
        .map(Json)
        .map_err(service_error)
}

/// Anchoring hook called by the host application after a record mutation.
#[derive(Debug, Deserialize)]
struct AnchorRequest {
    record_type: String,
    object_id: i64,
    fields: Map<String, Value>,
}

/// POST /api/audits/anchor — Hash, anchor and record a domain record.
async fn anchor_record(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AnchorRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AnchorOutcome>), ApiError> {
    let Json(req) = body.map_err(body_error)?;
    if req.record_type.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing record_type"));
    }

    let mut record = GenericRecord::new(req.record_type, req.object_id, req.fields);
    let outcome = state
        .service
        .anchor_and_record(&mut record)
        .await
        .map_err(service_error)?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

pub fn audit_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/audits", get(list_audits))
        .route("/api/audits/anchor", post(anchor_record))
        .route("/api/audits/{id}", get(get_audit))
        .route("/api/audits/{id}/verify", get(verify_audit))
        .route("/api/audits/{id}/resend", post(resend_audit))
        .route("/api/audits/{id}/store_cid", post(store_cid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::MemoryAuditStore;
    use crate::audit::AnchorService;
    use crate::chain::simulated::SimulatedChain;
    use crate::chain::{ChainClient, ChainMode};
    use crate::server::build_app;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn offline_app() -> Router {
        let client = ChainClient::disconnected(ChainMode::Remote);
        let service = AnchorService::new(Arc::new(client), Arc::new(MemoryAuditStore::new()));
        build_app(AppState { service })
    }

    /// Send a raw body, returning the status and the body parsed as JSON.
    async fn send_raw(
        app: &Router,
        uri: &str,
        content_type: Option<&str>,
        body: &'static str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let resp = app
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app(read_only: bool) -> Router {
        let chain = SimulatedChain::with_default_account();
        let client = ChainClient::new(
            ChainMode::Simulated,
            Arc::new(chain.clone()),
            chain.contract_address(),
        );
        let service = AnchorService::new(Arc::new(client), Arc::new(MemoryAuditStore::new()))
            .read_only(read_only)
            .receipt_timeout(Duration::from_secs(5));
        build_app(AppState { service })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn anchor(app: &Router) -> Value {
        let (status, body) = send(
            app,
            "POST",
            "/api/audits/anchor",
            Some(json!({
                "record_type": "Patient",
                "object_id": 1,
                "fields": {"name": "A", "age": 30}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(false);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["chain_connected"], true);
        assert_eq!(body["chain_mode"], "simulated");
        assert_eq!(body["read_only"], false);
    }

    #[tokio::test]
    async fn test_anchor_then_list_and_verify() {
        let app = app(false);
        let body = anchor(&app).await;
        assert_eq!(
            body["record_hash"],
            "0x4731f8b2b0b833d05c665d5dba3e2e436917ba05656a89099398146ec9cdf892"
        );
        assert!(body["tx_hash"].is_string());
        let id = body["audit"]["id"].as_i64().unwrap();

        let (status, list) = send(&app, "GET", "/api/audits", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, verify) = send(&app, "GET", &format!("/api/audits/{id}/verify"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verify["on_chain"], true);
        assert_eq!(verify["record_hash"], body["record_hash"]);
    }

    #[tokio::test]
    async fn test_unknown_audit_is_404() {
        let app = app(false);
        let (status, body) = send(&app, "GET", "/api/audits/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].is_string());

        let (status, _) = send(&app, "POST", "/api/audits/42/resend", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resend() {
        let app = app(false);
        let id = anchor(&app).await["audit"]["id"].as_i64().unwrap();
        let (status, body) = send(&app, "POST", &format!("/api/audits/{id}/resend"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["tx_hash"].as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn test_resend_forbidden_when_read_only() {
        let app = app(true);
        let id = anchor(&app).await["audit"]["id"].as_i64().unwrap();
        let (status, _) = send(&app, "POST", &format!("/api/audits/{id}/resend"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_store_cid() {
        let app = app(false);
        let id = anchor(&app).await["audit"]["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/audits/{id}/store_cid"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/audits/{id}/store_cid"),
            Some(json!({"cid": "bafybeigdyrzt"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["tx_hash"].is_string());
        assert!(body["record_id"].is_string());

        let (_, audit) = send(&app, "GET", &format!("/api/audits/{id}"), None).await;
        assert_eq!(audit["off_chain_reference"], "bafybeigdyrzt");
    }

    #[tokio::test]
    async fn test_store_cid_without_body_is_json_400() {
        let app = app(false);
        let id = anchor(&app).await["audit"]["id"].as_i64().unwrap();
        let uri = format!("/api/audits/{id}/store_cid");

        let (status, body) = send_raw(&app, &uri, None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing cid in request body");

        let (status, body) = send_raw(&app, &uri, Some("application/json"), r#"{"cid": 5}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let (status, body) = send_raw(&app, &uri, Some("application/json"), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_store_cid_unknown_audit_is_404_before_cid_check() {
        let app = app(false);
        let (status, body) = send(&app, "POST", "/api/audits/42/store_cid", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].is_string());

        let (status, _) = send_raw(&app, "/api/audits/42/store_cid", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_anchor_with_malformed_body_is_json_400() {
        let app = app(false);
        let (status, body) = send_raw(
            &app,
            "/api/audits/anchor",
            Some("application/json"),
            r#"{"record_type": "Patient"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("Invalid request body"));

        let (status, body) = send_raw(&app, "/api/audits/anchor", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_chain_actions_unavailable_without_client() {
        let app = offline_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/audits/anchor",
            Some(json!({"record_type": "Patient", "object_id": 1, "fields": {"name": "A"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["tx_hash"].is_null());
        let id = body["audit"]["id"].as_i64().unwrap();

        let (status, body) = send(&app, "POST", &format!("/api/audits/{id}/resend"), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Blockchain client not configured");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/audits/{id}/store_cid"),
            Some(json!({"cid": "bafy"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Blockchain client not configured");

        let (_, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(health["chain_connected"], false);
    }
}
