use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use promptly_api::{build_app, ApiConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "dev-promptly-key";

async fn app(config: ApiConfig) -> Router {
    build_app(config).await.expect("app should build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, read_json(response).await)
}

async fn spawn_completion_endpoint(status: StatusCode) -> String {
    let router = Router::new().route(
        "/generate",
        post(move |Json(body): Json<Value>| async move {
            let prompt = body["xml_prompt"].as_str().unwrap_or_default().to_string();
            let root = prompt.lines().next().unwrap_or_default().to_string();
            (status, Json(json!({ "response": format!("answered {root}") })))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/generate")
}

fn config_with_completion(endpoint: String) -> ApiConfig {
    let mut config = ApiConfig::default();
    config.completion.endpoint = Some(endpoint);
    config.completion.max_retries = 0;
    config.completion.initial_backoff = Duration::from_millis(1);
    config
}

#[tokio::test]
async fn health_is_public() {
    let app = app(ApiConfig::default()).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().get("x-request-id").is_some());

    let parsed = read_json(response).await;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["capabilities"]["storage"], "memory");
    assert_eq!(parsed["capabilities"]["completion"], false);
}

#[tokio::test]
async fn classify_requires_api_key() {
    let app = app(ApiConfig::default()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/classify")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "summarize this" }).to_string()))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn intents_lists_every_category() {
    let app = app(ApiConfig::default()).await;

    let (status, body) = send(&app, get("/v1/intents")).await;
    assert_eq!(status, StatusCode::OK);

    let intents = body["intents"].as_array().unwrap();
    let codes = intents
        .iter()
        .map(|intent| intent["code"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        codes,
        vec![
            "summarization",
            "question_answer",
            "translation",
            "creative_writing",
            "code_generation",
            "analysis",
            "general"
        ]
    );
    assert_eq!(intents[4]["display_name"], "Code Generation");
    assert_eq!(intents[4]["icon"], "💻");
}

#[tokio::test]
async fn classify_returns_ranked_result() {
    let app = app(ApiConfig::default()).await;

    let (status, body) = send(
        &app,
        post_json(
            "/v1/classify",
            json!({ "text": "Can you summarize the key points of this article?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "summarization");
    assert_eq!(body["band"], "medium");
    assert_eq!(body["confidence_percent"], 45);
    assert_eq!(body["matched_keywords"], json!(["summarize", "key points"]));

    let alternatives = body["alternative_intents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|alt| alt["intent"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(alternatives, vec!["question_answer", "creative_writing"]);
}

#[tokio::test]
async fn classify_falls_back_to_general() {
    let app = app(ApiConfig::default()).await;

    let (status, body) = send(&app, post_json("/v1/classify", json!({ "text": "" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "general");
    assert_eq!(body["confidence"], 0.5);
    assert_eq!(body["matched_keywords"], json!([]));
    assert_eq!(body["alternative_intents"], json!([]));
}

#[tokio::test]
async fn render_escapes_text_and_rejects_unknown_intent() {
    let app = app(ApiConfig::default()).await;

    let (status, body) = send(
        &app,
        post_json(
            "/v1/render",
            json!({ "text": "x < 5 && y > 3", "intent": "code_generation" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let markup = body["markup"].as_str().unwrap();
    assert!(markup.starts_with("<coding_task>"));
    assert!(markup.contains("<instruction>x &lt; 5 &amp;&amp; y &gt; 3</instruction>"));

    let (status, body) = send(
        &app,
        post_json(
            "/v1/render",
            json!({ "text": "anything", "intent": "not_a_category" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_intent");
    assert!(body.get("markup").is_none());
}

#[tokio::test]
async fn prompt_lifecycle_submit_history_recall_override() {
    let app = app(ApiConfig::default()).await;

    let (status, submitted) = send(
        &app,
        post_json(
            "/v1/prompts",
            json!({ "text": "Compare Rust and Go", "owner_id": "ada" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["record"]["intent"], "analysis");
    assert_eq!(submitted["display_name"], "Analysis");
    let id = submitted["record"]["id"].as_str().unwrap().to_string();

    let (status, history) = send(&app, get("/v1/prompts?owner_id=ada")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["owner_id"], "ada");
    assert_eq!(history["prompts"].as_array().unwrap().len(), 1);
    assert_eq!(history["prompts"][0]["id"], id.as_str());

    let (status, recalled) = send(&app, get(&format!("/v1/prompts/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recalled["record"]["markup"], submitted["record"]["markup"]);

    let (status, overridden) = send(
        &app,
        post_json(
            &format!("/v1/prompts/{id}/intent"),
            json!({ "intent": "creative_writing" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overridden["classification"]["intent"], "creative_writing");
    assert_eq!(overridden["classification"]["matched_keywords"], json!(["compare"]));
    assert!(overridden["record"]["markup"]
        .as_str()
        .unwrap()
        .starts_with("<creative_task>"));

    let (status, body) = send(
        &app,
        post_json(
            &format!("/v1/prompts/{id}/intent"),
            json!({ "intent": "poetry" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_intent");

    let (status, body) = send(&app, get("/v1/prompts/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "prompt_not_found");
}

#[tokio::test]
async fn blank_prompts_are_rejected() {
    let app = app(ApiConfig::default()).await;

    let (status, body) = send(&app, post_json("/v1/prompts", json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "empty_prompt");
}

#[tokio::test]
async fn history_keeps_only_the_most_recent_prompts() {
    let app = app(ApiConfig::default()).await;

    for idx in 0..12 {
        let (status, _) = send(
            &app,
            post_json("/v1/prompts", json!({ "text": format!("note {idx}") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, history) = send(&app, get("/v1/prompts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["owner_id"], "anonymous");
    let prompts = history["prompts"].as_array().unwrap();
    assert_eq!(prompts.len(), 10);
    assert_eq!(prompts[0]["plain_text"], "note 11");
}

#[tokio::test]
async fn history_echoes_the_owner_it_looked_up() {
    let app = app(ApiConfig::default()).await;

    let (status, history) = send(&app, get("/v1/prompts?owner_id=%20%20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["owner_id"], "anonymous");
    assert_eq!(history["prompts"], json!([]));

    let (status, _) = send(
        &app,
        post_json(
            "/v1/prompts",
            json!({ "text": "Explain tides", "owner_id": "ada" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, history) = send(&app, get("/v1/prompts?owner_id=%20ada%20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["owner_id"], "ada");
    assert_eq!(history["prompts"].as_array().unwrap().len(), 1);

    let (_, history) = send(&app, get("/v1/prompts?owner_id=%20nobody%20")).await;
    assert_eq!(history["owner_id"], "nobody");
    assert_eq!(history["prompts"], json!([]));
}

#[tokio::test]
async fn completion_without_endpoint_is_unavailable() {
    let app = app(ApiConfig::default()).await;

    let (_, submitted) = send(
        &app,
        post_json("/v1/prompts", json!({ "text": "Explain tides" })),
    )
    .await;
    let id = submitted["record"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        post_json(&format!("/v1/prompts/{id}/completion"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "completion_unavailable");

    let (status, _) = send(
        &app,
        post_json("/v1/prompts/missing/completion", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completion_is_stored_on_the_record() {
    let endpoint = spawn_completion_endpoint(StatusCode::OK).await;
    let app = app(config_with_completion(endpoint)).await;

    let (_, submitted) = send(
        &app,
        post_json("/v1/prompts", json!({ "text": "Write a poem about the sea" })),
    )
    .await;
    let id = submitted["record"]["id"].as_str().unwrap();

    let (status, record) = send(
        &app,
        post_json(&format!("/v1/prompts/{id}/completion"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["ai_response"], "answered <creative_task>");

    let (_, recalled) = send(&app, get(&format!("/v1/prompts/{id}"))).await;
    assert_eq!(recalled["record"]["ai_response"], "answered <creative_task>");
}

#[tokio::test]
async fn upstream_failure_is_a_bad_gateway() {
    let endpoint = spawn_completion_endpoint(StatusCode::INTERNAL_SERVER_ERROR).await;
    let app = app(config_with_completion(endpoint)).await;

    let (_, submitted) = send(
        &app,
        post_json("/v1/prompts", json!({ "text": "Summarize this report" })),
    )
    .await;
    let id = submitted["record"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        post_json(&format!("/v1/prompts/{id}/completion"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "completion_failed");
}

#[tokio::test]
async fn rate_limit_applies_per_forwarded_ip() {
    let config = ApiConfig {
        rate_limit_max: 2,
        ..ApiConfig::default()
    };
    let app = app(config).await;

    let from = |ip: &str| {
        Request::builder()
            .method("GET")
            .uri("/v1/intents")
            .header("x-api-key", API_KEY)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(from("198.51.100.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let limited = app.clone().oneshot(from("198.51.100.7")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get("retry-after").is_some());
    assert_eq!(read_json(limited).await["error"], "rate_limited");

    let other = app.clone().oneshot(from("198.51.100.8")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn rejected_browser_requests_still_carry_cors_headers() {
    let config = ApiConfig {
        rate_limit_max: 1,
        ..ApiConfig::default()
    };
    let app = app(config).await;
    let origin = "http://localhost:5173";

    let unauthorized = Request::builder()
        .method("POST")
        .uri("/v1/classify")
        .header("content-type", "application/json")
        .header("origin", origin)
        .body(Body::from(json!({ "text": "summarize this" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(unauthorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        origin
    );

    let limited = |ip: &str| {
        Request::builder()
            .method("GET")
            .uri("/v1/intents")
            .header("x-api-key", API_KEY)
            .header("x-forwarded-for", ip)
            .header("origin", origin)
            .body(Body::empty())
            .unwrap()
    };
    let first = app.clone().oneshot(limited("192.0.2.44")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.oneshot(limited("192.0.2.44")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        second.headers().get("access-control-allow-origin").unwrap(),
        origin
    );
}
