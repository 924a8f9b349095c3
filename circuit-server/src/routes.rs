//! HTTP surface: health, metrics, and the chat-completions endpoint in both
//! buffered and streaming form.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use circuit::audit::{record_best_effort, AuditRow};
use circuit::pipeline::GatewayState;
use circuit::provider::{ChatRequest, ChunkKind, Provider};
use circuit::quota::QuotaStore;
use circuit::rate_limit::store::TokenStore;
use circuit::stream::{normalize_chunk, StreamOutcome, StreamSession};
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::sqlite::{SqliteAuditStore, SqliteQuotaStore};

pub type AppState = Arc<
    AppDeps<circuit::rate_limit::store::AnyTokenStore, SqliteQuotaStore, SqliteAuditStore>,
>;

pub struct AppDeps<TS: TokenStore, QS: QuotaStore, AS: circuit::audit::AuditStore> {
    pub gateway: GatewayState<TS, QS, AS>,
    pub primary: Arc<dyn Provider>,
    pub fallback: Arc<dyn Provider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_json(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match params.get("client") {
        Some(client_hash) => match state.gateway.metrics.snapshot_client(client_hash) {
            Some(snapshot) => Json(serde_json::to_value(snapshot).unwrap()),
            None => Json(serde_json::json!({"error": "unknown client"})),
        },
        None => Json(serde_json::to_value(state.gateway.metrics.snapshot_global()).unwrap()),
    }
}

async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.gateway.metrics.export_prometheus();
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let bearer = bearer_token(&headers);

    if request.stream {
        return stream_completion(state, bearer, request).await.into_response();
    }

    let outcome = state
        .gateway
        .handle_buffered(bearer.as_deref(), request, state.primary.clone(), state.fallback.clone())
        .await;

    (
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(outcome.body),
    )
        .into_response()
}

async fn stream_completion(state: AppState, bearer: Option<String>, request: ChatRequest) -> Response {
    let client_hash = match state.gateway.admit_stream(bearer.as_deref(), &request).await {
        Ok(hash) => hash,
        Err(err) => {
            let body = serde_json::json!({"error": {"code": err.code(), "message": err.to_string()}});
            return (StatusCode::from_u16(err.status_code()).unwrap(), Json(body)).into_response();
        }
    };

    let request_id = Uuid::new_v4().to_string();
    let provider = state.primary.clone();
    let model = request.model.clone();
    let messages = request.messages.clone();
    let started_at = state.gateway.clock.now_millis();

    let upstream = match provider.stream(&request).await {
        Ok(s) => s,
        Err(_) => {
            // admit_stream already consumed the breaker's single half-open
            // probe slot (or counted against closed-state failures); the
            // stream never opened, so record the failure here or the
            // breaker can never admit another probe.
            state.gateway.breaker.record_failure();
            let body = serde_json::json!({"error": {"code": "service_unavailable", "message": "stream failed to start"}});
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }
    };

    let session = StreamSession::open(
        request_id,
        client_hash,
        provider.name().to_string(),
        model,
        messages,
        state.gateway.breaker.clone(),
    );

    let event_stream = drive_stream(state, session, upstream, started_at);
    Sse::new(event_stream).keep_alive(KeepAlive::default()).into_response()
}

fn drive_stream(
    state: AppState,
    session: StreamSession,
    upstream: futures::stream::BoxStream<'static, Result<ChunkKind, circuit::error::ProviderError>>,
    started_at: u64,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    stream::unfold((state, Some(session), upstream), move |(state, session_opt, mut upstream)| async move {
        use futures::StreamExt;
        let mut session = session_opt?;
        match upstream.next().await {
            Some(Ok(chunk)) => {
                let normalized = normalize_chunk(chunk);
                session.push_chunk(&normalized);
                let text = String::from_utf8_lossy(&normalized.raw_frame_to_forward).to_string();
                Some((Ok(Event::default().data(text)), (state, Some(session), upstream)))
            }
            Some(Err(_)) => {
                let date = state.gateway.clock.today_utc();
                let request_id = session.request_id().to_string();
                let client_hash = session.client_hash().to_string();
                let provider_name = session.provider_name().to_string();
                let model = session.model().to_string();
                let outcome = session.finalize_failure(&state.gateway.estimator, &state.gateway.quota, date).await;
                settle_stream(&state, &request_id, &client_hash, &provider_name, &model, started_at, outcome).await;
                let event = Event::default().event("error").data("upstream stream failed");
                Some((Ok(event), (state, None, upstream)))
            }
            None => {
                let date = state.gateway.clock.today_utc();
                let request_id = session.request_id().to_string();
                let client_hash = session.client_hash().to_string();
                let provider_name = session.provider_name().to_string();
                let model = session.model().to_string();
                let outcome = session.finalize_success(&state.gateway.estimator, &state.gateway.quota, date).await;
                settle_stream(&state, &request_id, &client_hash, &provider_name, &model, started_at, outcome).await;
                let event = Event::default().data("[DONE]");
                Some((Ok(event), (state, None, upstream)))
            }
        }
    })
}

/// Writes the audit row and records metrics for a just-settled stream,
/// mirroring what `pipeline::GatewayState::settle_success` does for the
/// buffered path. A ledger failure is logged, not propagated — the client
/// has already received the bytes.
async fn settle_stream(
    state: &AppState,
    request_id: &str,
    client_hash: &str,
    provider_name: &str,
    model: &str,
    started_at: u64,
    outcome: Result<StreamOutcome, sqlx::Error>,
) {
    let latency_ms = state.gateway.clock.now_millis().saturating_sub(started_at);
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(request_id, error = %err, "failed to settle stream session against the quota ledger");
            return;
        }
    };

    let is_error = outcome.status_code >= 400;
    record_best_effort(
        &state.gateway.audit,
        AuditRow {
            request_id: request_id.to_string(),
            timestamp: state.gateway.clock.now_utc(),
            provider_name: provider_name.to_string(),
            model: model.to_string(),
            status_code: outcome.status_code,
            latency_ms,
            tokens_input: outcome.tokens_input,
            tokens_output: outcome.tokens_output,
            cost_usd: outcome.cost_usd,
        },
    )
    .await;
    state.gateway.metrics.record_request(client_hash, latency_ms, is_error);
}
