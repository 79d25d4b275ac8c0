mod idempotency;
mod jobs;
mod security;

use arbitrage_engine::{
    Engine, EngineError, EngineErrorKind,
    config::{ConfigError, SETTINGS},
    metrics::inc_requests,
    models::{ApiError, BatchQuoteRequest, QuoteReport, QuoteRequest, ZoneCheckRequest},
    rating::{RatingInput, RatingResult},
    strategy::{ListingDecision, ProductContext},
    zones::ZoneValidation,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use idempotency::IdempotencyStore;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const OPENAPI_YAML: &str = include_str!("../docs/openapi.yaml");

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "arbitrage.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = &*SETTINGS;
    let engine = Engine::from_settings(settings).wrap_err("failed to load rules")?;
    let (queue, _worker) = jobs::JobQueue::spawn(engine.clone(), settings.queue_capacity, settings.job_ttl);
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|url| redis::Client::open(url).ok());

    let state = AppState {
        engine,
        queue,
        openapi: Arc::new(load_openapi()),
        idempotency: IdempotencyStore::new(redis, settings.idempotency_ttl_secs),
        prometheus_handle,
    };
    let app = router(state, AuthState::from_env(), settings.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], settings.port).into();
    info!(target = "arbitrage.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    engine: Engine,
    queue: jobs::JobQueue,
    openapi: Arc<Value>,
    idempotency: IdempotencyStore,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .nest(
            "/pricing",
            Router::new()
                .route("/quote", post(quote))
                .route("/zones", post(check_zones)),
        )
        .route("/ratings", post(rate))
        .route("/listings/decide", post(decide_listing))
        .nest(
            "/jobs",
            Router::new()
                .route("/pricing", post(enqueue_pricing_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/admin/rules/reload", post(reload_rules))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> Value {
    serde_yaml::from_str(OPENAPI_YAML).unwrap_or_else(|_| json!({ "openapi": "3.0.3" }))
}

/// Liveness plus batch intake health.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health(State(state): State<AppState>) -> Json<Value> {
    let batch = state.engine.batch().health();
    let status = if batch.accepting { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "service": "arbitrage-engine",
        "rates_source": state.engine.rates().source_name(),
        "batch": batch,
    }))
}

fn presented_matches(headers: &HeaderMap, header_name: &str, env_key: &str) -> bool {
    match std::env::var(env_key) {
        Ok(secret) => headers
            .get(header_name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|presented| presented == secret),
        Err(_) => true,
    }
}

async fn openapi_json(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, AppError> {
    if !presented_matches(&headers, "X-Docs-Key", "OPENAPI_KEY") {
        return Err(AppError::Unauthorized("docs"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Arbitrage Engine API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !presented_matches(&headers, "X-Metrics-Key", "METRICS_KEY") {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Price one product end to end.
///
/// - Method: `POST`
/// - Path: `/pricing/quote`
/// - Auth: `Authorization: Bearer <key>` or `X-Engine-Key: <key>`
/// - Body: `QuoteRequest`
/// - Response: `QuoteReport` (pricing, rating, zone check, per-stage transcript)
async fn quote(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<QuoteReport>, AppError> {
    inc_requests("/pricing/quote");
    info!(
        target = "arbitrage.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        sku = payload.sku.as_deref().unwrap_or("-"),
        "quote requested"
    );
    let report = state.engine.quote(payload).await?;
    Ok(Json(report))
}

async fn check_zones(
    State(state): State<AppState>,
    Json(payload): Json<ZoneCheckRequest>,
) -> Json<ZoneValidation> {
    inc_requests("/pricing/zones");
    Json(state.engine.check_zones(&payload.terms, payload.zones.as_deref()))
}

async fn rate(State(state): State<AppState>, Json(payload): Json<RatingInput>) -> Json<RatingResult> {
    inc_requests("/ratings");
    Json(state.engine.rate(&payload))
}

/// Pick the marketplace account for a product.
///
/// Repeating a request with the same `Idempotency-Key` returns the stored
/// decision.
async fn decide_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(product): Json<ProductContext>,
) -> Json<ListingDecision> {
    inc_requests("/listings/decide");
    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(key) = &key
        && let Some(existing) = state.idempotency.get::<ListingDecision>(&context.org_id, key).await
    {
        return Json(existing);
    }
    let decision = state.engine.decide(&product);
    if let Some(key) = &key {
        state.idempotency.put(&context.org_id, key, &decision).await;
    }
    Json(decision)
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_pricing_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BatchQuoteRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    inc_requests("/jobs/pricing");
    if payload.items.is_empty() {
        return Err(EngineError::invalid_input("jobs", "items must not be empty").into());
    }
    let health = state.engine.batch().health();
    if !health.accepting {
        return Err(AppError::Unavailable(
            health.reason.unwrap_or_else(|| "batch intake paused".into()),
        ));
    }
    let id = state
        .queue
        .enqueue(payload, context)
        .await
        .map_err(|err| AppError::Engine(EngineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(EngineError::invalid_input("jobs", "invalid_job_id").into());
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

async fn reload_rules(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    inc_requests("/admin/rules/reload");
    let rules = state.engine.rules().reload()?;
    state.engine.rates().invalidate().await;
    Ok(Json(json!({
        "status": "reloaded",
        "rules": rules.strategy.rules.len(),
        "accounts": rules.strategy.accounts.len(),
        "marketplaces": rules.marketplaces.len(),
        "zones": rules.zones.len(),
    })))
}

#[derive(Debug)]
enum AppError {
    Engine(EngineError),
    Config(ConfigError),
    Unauthorized(&'static str),
    NotFound(&'static str),
    Unavailable(String),
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Engine(err) => {
                let status = match err.kind() {
                    EngineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    EngineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.stage().to_string(), Some(err.detail().to_string()))
            }
            AppError::Config(err) => {
                let status = match &err {
                    ConfigError::NoPath => StatusCode::CONFLICT,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, "rules_reload".to_string(), Some(err.to_string()))
            }
            AppError::Unauthorized(scope) => (StatusCode::UNAUTHORIZED, scope.to_string(), Some("unauthorized".into())),
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string(), Some("not_found".into())),
            AppError::Unavailable(reason) => (StatusCode::SERVICE_UNAVAILABLE, "batch".to_string(), Some(reason)),
        };
        (status, Json(ApiError { error, detail })).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
