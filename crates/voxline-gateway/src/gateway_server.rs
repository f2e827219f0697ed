//! Webhook ingestion and call read endpoints.
//!
//! The ingestion endpoint is ack-first: once a payload normalizes, the
//! delivery is acknowledged immediately and reconciliation runs detached.
//! A store outage or a reconciliation failure never turns into a delivery
//! failure, so the upstream platform has no reason to retry-storm us.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

use voxline_call::{
    current_unix_timestamp_ms, normalize_call_event, CallRecord, CallRecordFilter, CallSequencer,
    CallStore, NormalizeError, SequencerConfig, SequencerStats,
};

pub const WEBHOOK_VAPI_ENDPOINT: &str = "/webhooks/vapi";
pub const CALLS_ENDPOINT: &str = "/calls";
pub const CALL_DETAIL_ENDPOINT: &str = "/calls/{call_id}";
pub const HEALTH_ENDPOINT: &str = "/health";

#[derive(Debug, Clone)]
pub struct GatewayServerConfig {
    pub bind: String,
    pub state_dir: PathBuf,
    pub sequencer: SequencerConfig,
}

pub struct GatewayState {
    sequencer: CallSequencer,
}

/// Binds the configured address and serves the gateway until ctrl-c.
pub async fn run_gateway_server(config: GatewayServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;

    let store = CallStore::open(&config.state_dir)?;
    let sequencer = CallSequencer::new(store, config.sequencer.clone());
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;
    println!(
        "voxline gateway listening: addr={} state_dir={}",
        local_addr,
        config.state_dir.display()
    );

    serve_gateway(listener, sequencer).await
}

/// Serves the gateway router on an already-bound listener. Split out from
/// [`run_gateway_server`] so tests can bind an ephemeral port themselves.
pub async fn serve_gateway(listener: TcpListener, sequencer: CallSequencer) -> Result<()> {
    let app = build_gateway_router(Arc::new(GatewayState { sequencer }));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")
}

fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(WEBHOOK_VAPI_ENDPOINT, post(handle_vapi_webhook))
        .route(CALLS_ENDPOINT, get(handle_calls_list))
        .route(CALL_DETAIL_ENDPOINT, get(handle_call_detail))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    success: bool,
    message: &'static str,
    call_id: String,
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CallListQuery {
    #[serde(default)]
    filter: Option<String>,
}

#[derive(Debug, Serialize)]
struct CallListResponse {
    total: usize,
    calls: Vec<CallRecord>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    stats: SequencerStats,
}

/// JSON error envelope mapped onto an HTTP status.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    fn from_normalize(error: &NormalizeError) -> Self {
        match error {
            NormalizeError::MalformedPayload { .. } => {
                Self::bad_request("malformed_payload", error.to_string())
            }
            NormalizeError::MissingCallId => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "missing_call_id",
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

/// Ingestion boundary. Normalization failures are the only synchronous
/// rejections; everything downstream of a normalized event is detached.
async fn handle_vapi_webhook(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let received_unix_ms = current_unix_timestamp_ms();
    let event = match normalize_call_event(&body, received_unix_ms) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(error = %error, "rejected webhook delivery");
            return ApiError::from_normalize(&error).into_response();
        }
    };

    tracing::info!(
        call_id = %event.call_id,
        kind = event.kind.as_str(),
        "webhook event accepted"
    );
    let ack = WebhookAck {
        success: true,
        message: "webhook received",
        call_id: event.call_id.clone(),
        kind: event.kind.as_str(),
    };
    state.sequencer.ingest_detached(event);
    (StatusCode::OK, Json(ack)).into_response()
}

async fn handle_calls_list(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<CallListQuery>,
) -> Response {
    let filter = match query.filter.as_deref() {
        None => CallRecordFilter::All,
        Some(raw) => match CallRecordFilter::parse(raw) {
            Some(filter) => filter,
            None => {
                return ApiError::bad_request(
                    "invalid_filter",
                    format!("unknown call filter '{raw}' (expected all, active, or inactive)"),
                )
                .into_response()
            }
        },
    };
    let calls = state.sequencer.list_calls(filter);
    (
        StatusCode::OK,
        Json(CallListResponse {
            total: calls.len(),
            calls,
        }),
    )
        .into_response()
}

async fn handle_call_detail(
    State(state): State<Arc<GatewayState>>,
    Path(call_id): Path<String>,
) -> Response {
    match state.sequencer.get_call(&call_id) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => ApiError::not_found(
            "call_not_found",
            format!("call '{call_id}' has never been reconciled"),
        )
        .into_response(),
    }
}

async fn handle_health(State(state): State<Arc<GatewayState>>) -> Response {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: "voxline-gateway",
            stats: state.sequencer.stats(),
        }),
    )
        .into_response()
}
