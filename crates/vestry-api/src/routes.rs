use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vestry_core::db::{
    Database, DeviceRepository, LibSqlDeviceRepository, LibSqlTaskRepository, StatusCounts,
    SyncTaskRepository,
};
use vestry_core::models::SyncLogEntry;
use vestry_core::notify::DeliveryClient;
use vestry_core::sync::{
    delta_sync, force_sync, ingest, process_queue, AuditSink, DeltaSyncRequest, DeltaSyncResponse,
    HandlerRegistry, IngestOutcome, IngestSettings, RateLimitMetricsSnapshot, RateLimiter,
    ReconcileOutcome, SweepSummary, DEFAULT_WINDOW_MS,
};
use vestry_core::{ChangeEvent, ChangeType, EntityKind};

use crate::auth::{resolve_actor, CurrentActor};
use crate::config::AppConfig;
use crate::error::AppError;

const STATUS_TASK_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;
const STATUS_DEVICE_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const STATUS_LOG_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: Arc<Database>,
    registry: HandlerRegistry,
    limiter: RateLimiter,
    delivery: Option<DeliveryClient>,
    ingest_settings: IngestSettings,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Arc<Database>) -> Result<Self, AppError> {
        let limiter = RateLimiter::new(config.rate_limit_window, config.rate_limit_per_window);
        let delivery = match &config.delivery_webhook_url {
            Some(url) => Some(DeliveryClient::new(url.clone())?),
            None => None,
        };
        let ingest_settings = IngestSettings {
            high_value_threshold: config.high_value_threshold,
        };
        Ok(Self {
            registry: HandlerRegistry::standard(),
            limiter,
            delivery,
            ingest_settings,
            config,
            db,
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/sync/process", post(process_sync_queue))
        .route("/sync/mobile", post(mobile_delta_sync))
        .route("/sync/status", get(sync_status))
        .route("/sync/force", post(force_full_sync))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            attach_actor,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_rate_limit,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Layered outermost so over-limit callers are turned away before any work.
async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request, state.config.trust_forwarded_for);
    let endpoint = request.uri().path().to_string();
    state
        .limiter
        .check(state.db.connection(), &ip, &endpoint)
        .await?;
    Ok(next.run(request).await)
}

/// Resolve the optional bearer token into an actor id for audit attribution.
/// Never rejects; anonymous callers get full access (a deliberate property
/// of the webhook-driven surface, noted in the operations runbook).
async fn attach_actor(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let actor = resolve_actor(
        request.headers(),
        state.config.identity_jwt_secret.as_deref(),
    );
    request.extensions_mut().insert(actor);
    next.run(request).await
}

/// `x-forwarded-for` is attacker-controlled on a direct connection, so it
/// only counts when the deployment has declared a trusted proxy in front.
fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.limiter.metrics_snapshot(),
    })
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type")]
    change_type: String,
    table: String,
    record: serde_json::Value,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    success: bool,
    #[serde(flatten)]
    outcome: IngestOutcome,
}

async fn receive_webhook(
    State(state): State<AppState>,
    Extension(actor): Extension<CurrentActor>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookResponse>, AppError> {
    let change_type: ChangeType = payload
        .change_type
        .parse()
        .map_err(AppError::bad_request)?;
    let entity_kind: EntityKind = payload.table.parse().map_err(AppError::bad_request)?;

    if !payload.record.is_object() {
        return Err(AppError::bad_request("record must be a JSON object"));
    }

    let event = ChangeEvent {
        change_type,
        entity_kind,
        record: payload.record,
        previous_record: payload.old_record,
    };

    let outcome = ingest(
        state.db.connection(),
        &state.ingest_settings,
        &event,
        actor.0.as_deref(),
    )
    .await?;

    tracing::info!(
        kind = entity_kind.as_str(),
        change = change_type.as_str(),
        rules_fired = outcome.rules_fired,
        tasks_enqueued = outcome.tasks_enqueued,
        "Webhook ingested"
    );
    Ok(Json(WebhookResponse {
        success: true,
        outcome,
    }))
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    #[serde(flatten)]
    summary: SweepSummary,
    notifications_delivered: u64,
}

async fn process_sync_queue(
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, AppError> {
    let conn = state.db.connection();
    let summary = process_queue(conn, &state.registry).await?;

    let notifications_delivered = match &state.delivery {
        Some(client) => client.flush(conn).await,
        None => 0,
    };

    tracing::info!(
        items_seen = summary.items_seen,
        successes = summary.successes,
        failures = summary.failures,
        notifications_delivered,
        "Queue sweep finished"
    );
    Ok(Json(SweepResponse {
        summary,
        notifications_delivered,
    }))
}

async fn mobile_delta_sync(
    State(state): State<AppState>,
    Json(request): Json<DeltaSyncRequest>,
) -> Result<Json<DeltaSyncResponse>, AppError> {
    // Replica deployments pull the latest remote state before reading.
    state.db.refresh().await?;
    let response = delta_sync(state.db.connection(), &request).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    tasks: StatusCounts,
    active_devices: u64,
    recent_activity: Vec<SyncLogEntry>,
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let conn = state.db.connection();
    let now = Utc::now().timestamp_millis();

    let tasks = LibSqlTaskRepository::new(conn)
        .status_counts(now - STATUS_TASK_WINDOW_MS)
        .await?;
    let active_devices = LibSqlDeviceRepository::new(conn)
        .active_count(now - STATUS_DEVICE_WINDOW_MS)
        .await?;
    let recent_activity = AuditSink::new(conn).recent(STATUS_LOG_LIMIT).await?;

    Ok(Json(StatusResponse {
        tasks,
        active_devices,
        recent_activity,
    }))
}

async fn force_full_sync(
    State(state): State<AppState>,
    Extension(actor): Extension<CurrentActor>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let outcome = force_sync(state.db.connection(), DEFAULT_WINDOW_MS, actor.0.as_deref()).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;

    fn request_with(forwarded: Option<&str>, peer: &str) -> Request {
        let mut builder = axum::http::Request::builder().uri("/v1/webhook");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn forwarded_header_ignored_without_trusted_proxy() {
        let request = request_with(Some("203.0.113.9"), "192.0.2.7:4242");
        assert_eq!(client_ip(&request, false), "192.0.2.7");
    }

    #[test]
    fn forwarded_header_wins_behind_trusted_proxy() {
        let request = request_with(Some("203.0.113.9, 10.0.0.1"), "192.0.2.7:4242");
        assert_eq!(client_ip(&request, true), "203.0.113.9");
    }

    #[test]
    fn trusted_proxy_falls_back_to_peer_without_header() {
        let request = request_with(None, "192.0.2.7:4242");
        assert_eq!(client_ip(&request, true), "192.0.2.7");
    }
}
