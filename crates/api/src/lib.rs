mod config;
mod rate_limit;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Json, Path, Query, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use promptly_agents::{
    resolve_owner, Completer, PromptInput, PromptOutcome, PromptWorkflow, WorkflowError,
};
use promptly_core::{
    classify, explanation, render_named, ClassificationResult, ConfidenceBand, CoreError, Intent,
    PromptRecord,
};
use promptly_observability::{AppMetrics, MetricsSnapshot};
use promptly_storage::Store;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

pub use crate::config::ApiConfig;
use crate::rate_limit::IpRateLimiter;

const MAX_BODY_BYTES: usize = 64 * 1024;
const LIMITER_PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone)]
pub struct ApiState {
    pub workflow: PromptWorkflow<Store, Completer>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: String,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub storage_backend: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    capabilities: HealthCapabilities,
}

#[derive(Debug, Serialize)]
struct HealthCapabilities {
    completion: bool,
    storage: &'static str,
}

#[derive(Debug, Serialize)]
struct IntentInfo {
    code: &'static str,
    display_name: &'static str,
    icon: &'static str,
    accent: &'static str,
    explanation: &'static str,
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    classification: ClassificationResult,
    display_name: &'static str,
    icon: &'static str,
    band: ConfidenceBand,
    confidence_percent: u8,
}

#[derive(Debug, Deserialize)]
struct RenderRequest {
    text: String,
    intent: String,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    text: String,
    owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    owner_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    owner_id: String,
    prompts: Vec<PromptRecord>,
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    intent: String,
}

pub async fn build_app(config: ApiConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url)
            .await
            .context("failed to open prompt history database")?,
        None => Store::memory(),
    };
    let storage_backend = store.backend_name();

    let completer =
        Completer::from_config(&config.completion).context("failed to build completion client")?;

    let workflow = PromptWorkflow::new(Arc::new(store), Arc::new(completer), metrics.clone())
        .with_history_limit(config.history_limit);

    let state = ApiState {
        workflow,
        metrics,
        api_key: config.api_key,
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
        storage_backend,
    };

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/intents", get(list_intents))
        .route("/v1/classify", post(classify_text))
        .route("/v1/render", post(render_text))
        .route("/v1/prompts", get(prompt_history).post(submit_prompt))
        .route("/v1/prompts/:id", get(recall_prompt))
        .route("/v1/prompts/:id/intent", post(override_prompt_intent))
        .route("/v1/prompts/:id/completion", post(complete_prompt))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(build_cors_layer(&state.allowed_origins))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        capabilities: HealthCapabilities {
            completion: state.workflow.completion_enabled(),
            storage: state.storage_backend,
        },
    };
    (StatusCode::OK, Json(payload))
}

async fn list_intents() -> impl IntoResponse {
    let intents = Intent::ALL
        .iter()
        .map(|intent| IntentInfo {
            code: intent.as_code(),
            display_name: intent.display_name(),
            icon: intent.icon(),
            accent: intent.accent(),
            explanation: explanation(*intent),
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "intents": intents })))
}

async fn classify_text(Json(request): Json<ClassifyRequest>) -> impl IntoResponse {
    let classification = classify(&request.text);
    let payload = ClassifyResponse {
        display_name: classification.intent.display_name(),
        icon: classification.intent.icon(),
        band: classification.band(),
        confidence_percent: classification.confidence_percent(),
        classification,
    };
    (StatusCode::OK, Json(payload))
}

async fn render_text(Json(request): Json<RenderRequest>) -> Response {
    match render_named(&request.text, &request.intent) {
        Ok(rendered) => (StatusCode::OK, Json(rendered)).into_response(),
        Err(err) => core_error_response(err),
    }
}

async fn submit_prompt(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    let input = PromptInput {
        text: request.text,
        owner_id: request.owner_id,
    };
    outcome_response(state.workflow.submit(input).await)
}

async fn prompt_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let owner_id = resolve_owner(query.owner_id.as_deref());
    let limit = query.limit.unwrap_or(state.workflow.history_limit());
    match state.workflow.history(Some(&owner_id), limit).await {
        Ok(prompts) => (StatusCode::OK, Json(HistoryResponse { owner_id, prompts })).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

async fn recall_prompt(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    outcome_response(state.workflow.recall(&id).await)
}

async fn override_prompt_intent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Response {
    let intent = match Intent::parse(&request.intent) {
        Ok(intent) => intent,
        Err(err) => return core_error_response(err),
    };
    outcome_response(state.workflow.override_intent(&id, intent).await)
}

async fn complete_prompt(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.workflow.generate_completion(&id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

fn outcome_response(result: Result<PromptOutcome, WorkflowError>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into()
        })),
    )
        .into_response()
}

fn core_error_response(err: CoreError) -> Response {
    match err {
        CoreError::UnknownIntent(_) => {
            error_response(StatusCode::BAD_REQUEST, "unknown_intent", err.to_string())
        }
    }
}

fn workflow_error_response(err: WorkflowError) -> Response {
    match &err {
        WorkflowError::EmptyPrompt => {
            error_response(StatusCode::BAD_REQUEST, "empty_prompt", err.to_string())
        }
        WorkflowError::RecordNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, "prompt_not_found", err.to_string())
        }
        WorkflowError::CompletionUnavailable => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "completion_unavailable",
            "set PROMPTLY_COMPLETION_URL to enable AI responses",
        ),
        WorkflowError::Completion(_) => {
            error_response(StatusCode::BAD_GATEWAY, "completion_failed", err.to_string())
        }
        WorkflowError::Storage(source) => {
            error!(error = ?source, "prompt storage failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "prompt history is unavailable",
            )
        }
    }
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid x-api-key",
        );
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    if state.limiter.tracked_keys() > LIMITER_PRUNE_THRESHOLD {
        state.limiter.prune();
    }

    let ip = request_ip(&request);
    if let Err(wait) = state.limiter.check(&ip) {
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this IP",
        );
        let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    next.run(request).await
}

fn is_public_endpoint(path: &str) -> bool {
    path == "/health"
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_forwarded(value: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/v1/classify");
        if let Some(value) = value {
            builder = builder.header("x-forwarded-for", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn request_ip_uses_first_forwarded_hop() {
        assert_eq!(
            request_ip(&request_with_forwarded(Some("203.0.113.9, 10.0.0.1"))),
            "203.0.113.9"
        );
        assert_eq!(request_ip(&request_with_forwarded(Some(" , 10.0.0.1"))), "local");
        assert_eq!(request_ip(&request_with_forwarded(None)), "local");
    }

    #[test]
    fn only_health_is_public() {
        assert!(is_public_endpoint("/health"));
        assert!(!is_public_endpoint("/v1/intents"));
        assert!(!is_public_endpoint("/health/extra"));
    }

    #[test]
    fn workflow_errors_map_to_statuses() {
        let cases = [
            (WorkflowError::EmptyPrompt, StatusCode::BAD_REQUEST),
            (
                WorkflowError::RecordNotFound("x".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                WorkflowError::CompletionUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                WorkflowError::Completion(promptly_agents::CompletionError::EmptyResponse),
                StatusCode::BAD_GATEWAY,
            ),
            (
                WorkflowError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(workflow_error_response(err).status(), status);
        }
    }
}
