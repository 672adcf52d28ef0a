//! HTTP handlers for the ingestion edge (§4.5), the interaction callback
//! (§4.7), and the two health endpoints (§4.5's route table).

use crate::normalize::{self, SourceAPayload, SourceBPayload};
use crate::signature::SignatureVerifier;
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use feedback_broker::BrokerProducer;
use feedback_errors::GatewayError;
use feedback_model::{parse_correlation, Decision, SignalEnvelope};
use feedback_orchestrator::Engine;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Request bodies over this size are rejected before JSON parsing runs
/// (§4.5's route table: "Request body limits: 256 KiB").
pub const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn BrokerProducer>,
    pub engine: Arc<Engine>,
    pub source_a_verifier: Arc<dyn SignatureVerifier>,
    pub source_b_verifier: Arc<dyn SignatureVerifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/source-a", axum::routing::post(webhook_source_a))
        .route("/webhooks/source-b", axum::routing::post(webhook_source_b))
        .route("/webhooks/interaction", axum::routing::post(interaction))
        .route("/health", axum::routing::get(health))
        .route("/health/details", axum::routing::get(health_details))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn extract_signature_headers(headers: &HeaderMap) -> Result<(i64, String), GatewayError> {
    let timestamp = headers
        .get("x-signature-timestamp")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(GatewayError::BadSignature)?;
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(GatewayError::BadSignature)?;
    Ok((timestamp, signature))
}

/// §4.5's route table: `/webhooks/{source-a}` → 202 `{feedback_id, status}` / 400 / 401.
async fn webhook_source_a(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if body.len() > MAX_BODY_BYTES {
        return gateway_error_response(GatewayError::BodyTooLarge { limit: MAX_BODY_BYTES });
    }

    let (timestamp, signature) = match extract_signature_headers(&headers) {
        Ok(v) => v,
        Err(err) => return gateway_error_response(err),
    };
    if let Err(err) = state.source_a_verifier.verify(timestamp, &body, &signature) {
        return gateway_error_response(err);
    }

    let payload: SourceAPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return gateway_error_response(GatewayError::MalformedPayload(e.to_string())),
    };
    let event = match normalize::normalize_source_a(payload) {
        Ok(e) => e,
        Err(err) => return gateway_error_response(err),
    };

    accept_event(&state, event).await
}

/// §4.5's route table: `/webhooks/{source-b}` → echoes `challenge` verbatim
/// for the URL-verify handshake, otherwise 202 / 400 / 401.
async fn webhook_source_b(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if body.len() > MAX_BODY_BYTES {
        return gateway_error_response(GatewayError::BodyTooLarge { limit: MAX_BODY_BYTES });
    }

    let (timestamp, signature) = match extract_signature_headers(&headers) {
        Ok(v) => v,
        Err(err) => return gateway_error_response(err),
    };
    if let Err(err) = state.source_b_verifier.verify(timestamp, &body, &signature) {
        return gateway_error_response(err);
    }

    let payload: SourceBPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return gateway_error_response(GatewayError::MalformedPayload(e.to_string())),
    };

    let event = match payload {
        SourceBPayload::Challenge { challenge } => {
            return (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response();
        }
        SourceBPayload::Event(event) => match normalize::normalize_source_b(event) {
            Ok(e) => e,
            Err(err) => return gateway_error_response(err),
        },
    };

    accept_event(&state, event).await
}

/// §1/§4.5: the accept path only has to durably record the event before
/// replying; starting the workflow is the broker consumer launcher's job
/// (§4.6), kept off this path so accept latency never includes journal I/O.
async fn accept_event(state: &AppState, event: feedback_model::FeedbackEvent) -> axum::response::Response {
    let feedback_id = event.feedback_id;

    if let Err(e) = state.broker.publish(&event).await {
        tracing::error!(feedback_id = %feedback_id, error = %e, "broker publish failed");
        return gateway_error_response(GatewayError::BrokerWriteFailed(e.into()));
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({ "feedback_id": feedback_id, "status": "accepted" })),
    )
        .into_response()
}

#[derive(Debug, serde::Deserialize)]
pub struct InteractionPayload {
    pub custom_id: String,
    pub actor_id: String,
    pub interaction_id: String,
}

/// §4.7: decodes the correlation id and signals the target workflow; any
/// outcome (including "workflow no longer exists") gets a benign in-band
/// acknowledgement, never the internal error detail (§7 "user-visible failures").
async fn interaction(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if body.len() > MAX_BODY_BYTES {
        return gateway_error_response(GatewayError::BodyTooLarge { limit: MAX_BODY_BYTES });
    }
    let payload: InteractionPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return gateway_error_response(GatewayError::MalformedPayload(e.to_string())),
    };

    let (decision, workflow_id) = match parse_correlation(&payload.custom_id) {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::OK, Json(json!({ "message": "Sorry, that action could not be processed." })))
                .into_response()
        }
    };

    let envelope = SignalEnvelope {
        workflow_id: workflow_id.clone(),
        decision,
        actor_id: payload.actor_id,
        interaction_id: payload.interaction_id,
    };

    let message = match state.engine.signal(&workflow_id, envelope).await {
        Ok(()) => match decision {
            Decision::Approve => "Approved. Publishing the issue now.",
            Decision::Reject => "Rejected. No issue will be published.",
        },
        Err(_) => "This feedback item is no longer awaiting a decision.",
    };

    (StatusCode::OK, Json(json!({ "message": message }))).into_response()
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    ts: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthBody {
        status: "healthy",
        ts: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
struct DependencyReport {
    name: &'static str,
    healthy: bool,
}

#[derive(Serialize)]
struct HealthDetailsBody {
    status: &'static str,
    dependencies: Vec<DependencyReport>,
}

/// §4.5's route table: readiness, reporting per dependency. The gateway's
/// only directly-held dependency is the broker producer handle; orchestrator
/// reachability is implied by being in-process.
async fn health_details(State(state): State<AppState>) -> impl IntoResponse {
    let broker_healthy = tokio::time::timeout(Duration::from_millis(200), async {
        state.broker.healthy().await
    })
    .await
    .unwrap_or(false);

    let dependencies = vec![DependencyReport {
        name: "broker",
        healthy: broker_healthy,
    }];
    let overall_healthy = dependencies.iter().all(|d| d.healthy);

    let body = HealthDetailsBody {
        status: if overall_healthy { "healthy" } else { "degraded" },
        dependencies,
    };
    let code = if overall_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

fn gateway_error_response(err: GatewayError) -> axum::response::Response {
    let status = match err {
        GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::BadSignature | GatewayError::StaleTimestamp => StatusCode::UNAUTHORIZED,
        GatewayError::EmptyText | GatewayError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        GatewayError::BrokerWriteFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    // §4.5: unauthenticated endpoints must not reveal whether a signature was
    // structurally valid vs. cryptographically invalid, so 401s carry no body detail.
    let body = match status {
        StatusCode::UNAUTHORIZED => json!({ "error": "unauthorized" }),
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(body)).into_response()
}
