// mot-summary-rs/src/main.rs
// MOT Summary Service - HTTP entry point
//
// Implements:
// - POST /chat: registration in, MOT history fetched, summarized, LLM stream started
// - GET /stream: server-sent events relaying the model's reply fragments
// - GET /health: service health with uptime
// - GET /: minimal chat page driving the two endpoints above

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use mot_summary::llm_client::{build_prompt, LLMClient};
use mot_summary::mot_client::{MotApiError, MotClient, MotCredentials, VehicleRecord};
use mot_summary::stream_registry::StreamRegistry;
use mot_summary::summary::{generate_summary, SUMMARY_ERROR_MESSAGE};

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Both request bodies on this surface are a few dozen bytes of JSON.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

const GENERIC_ERROR_MESSAGE: &str = "Error processing your request. Please try again.";
const MISSING_REGISTRATION_MESSAGE: &str = "Registration number is required";
const NO_PENDING_STREAM_MESSAGE: &str =
    "Error: No summary available. Please submit a registration first.";
const STREAM_FAILURE_MESSAGE: &str =
    "Error: Problem streaming summary from model. Please try again.";

/// Shared application state
#[derive(Clone)]
struct AppState {
    llm: Arc<LLMClient>,
    streams: Arc<StreamRegistry>,
}

/// Chat request body (JSON)
#[derive(Debug, Deserialize)]
struct ChatRequest {
    registration: Option<String>,
}

/// Chat response body (JSON)
#[derive(Debug, Serialize)]
struct ChatResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    service_name: String,
    uptime_seconds: i64,
    status: String,
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ChatResponse {
            success: false,
            stream_id: None,
            error: Some(message.to_string()),
        }),
    )
        .into_response()
}

/// Map a pipeline error to the caller-facing status and message. The real
/// cause has already been logged where it occurred; clients only see fixed
/// strings.
fn pipeline_error_response(err: &MotApiError) -> axum::response::Response {
    match err {
        MotApiError::Parse(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SUMMARY_ERROR_MESSAGE)
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE),
    }
}

/// Token fetch and history fetch, strictly in that order.
async fn fetch_record(client: &MotClient, registration: &str) -> Result<VehicleRecord, MotApiError> {
    let token = client.obtain_token().await?;
    client.fetch_vehicle(registration, &token).await
}

/// POST /chat - fetch MOT history, summarize, start the model stream
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    let registration = match request.registration.as_deref().map(str::trim) {
        Some(reg) if !reg.is_empty() => reg.to_string(),
        _ => return error_response(StatusCode::BAD_REQUEST, MISSING_REGISTRATION_MESSAGE),
    };

    let mot_client = match MotClient::new() {
        Ok(client) => client,
        Err(err) => {
            log::error!("MOT client configuration error: {}", err);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE);
        }
    };

    let record = match fetch_record(&mot_client, &registration).await {
        Ok(record) => record,
        Err(err) => {
            log::error!("MOT pipeline error: {}", err);
            return pipeline_error_response(&err);
        }
    };

    let outcome = generate_summary(&record);
    if outcome.is_empty() {
        // Distinguishable from generic failures: no history is a client-level
        // condition, not a server error.
        return error_response(StatusCode::BAD_REQUEST, outcome.text());
    }

    let prompt = build_prompt(outcome.text());

    match state.llm.stream_summary(&prompt).await {
        Ok(summary_stream) => {
            let stream_id = state.streams.insert(summary_stream).await;
            log::info!("Started summary stream {}", stream_id);
            (
                StatusCode::OK,
                Json(ChatResponse {
                    success: true,
                    stream_id: Some(stream_id),
                    error: None,
                }),
            )
                .into_response()
        }
        Err(err) => {
            log::error!("Failed to start LLM stream: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE)
        }
    }
}

/// GET /stream?id=<uuid> - relay model fragments as server-sent events
async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Sse<BoxStream<'static, Result<Event, Infallible>>> {
    let claimed = match params.id {
        Some(id) => state.streams.claim(&id).await,
        None => None,
    };

    let events: BoxStream<'static, Result<Event, Infallible>> = match claimed {
        Some(summary_stream) => stream::unfold(summary_stream, |mut summary_stream| async move {
            match summary_stream.next_fragment().await {
                Some(Ok(text)) => Some((Event::default().data(text), summary_stream)),
                Some(Err(err)) => {
                    // One terminal diagnostic fragment, then the stream ends.
                    log::error!("Error during summary streaming: {}", err);
                    Some((Event::default().data(STREAM_FAILURE_MESSAGE), summary_stream))
                }
                None => None,
            }
        })
        .map(Ok)
        .boxed(),
        None => stream::once(async { Ok(Event::default().data(NO_PENDING_STREAM_MESSAGE)) }).boxed(),
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /health - health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = START_TIME.elapsed().as_secs() as i64;

    let llm_configured = state.llm.is_configured();
    let mot_configured = MotCredentials::from_env().is_ok();
    let healthy = llm_configured && mot_configured;

    Json(HealthResponse {
        healthy,
        service_name: config_rs::get_formatted_service_name("MOT_SUMMARY"),
        uptime_seconds: uptime,
        status: if healthy { "SERVING" } else { "DEGRADED" }.to_string(),
    })
}

/// GET / - chat page
async fn root_handler() -> impl IntoResponse {
    Html(INDEX_PAGE)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let _ = *START_TIME;

    let addr = config_rs::get_bind_address("MOT_SUMMARY", 8000);

    if MotCredentials::from_env().is_err() {
        log::warn!("MOT API credentials are not fully configured; /chat requests will fail");
    }

    let state = Arc::new(AppState {
        llm: Arc::new(LLMClient::new()),
        streams: Arc::new(StreamRegistry::new()),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/chat", post(chat_handler))
        .route("/stream", get(stream_handler))
        .route("/health", get(health_handler))
        .layer(RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("MOT summary service starting on {}", addr);
    println!("MOT summary service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), 4096)
            .await
            .expect("response body should be readable");
        String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
    }

    #[tokio::test]
    async fn test_parse_failure_surfaces_summary_apology() {
        let response =
            pipeline_error_response(&MotApiError::Parse("unexpected shape".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_text(response).await;
        assert!(body.contains(SUMMARY_ERROR_MESSAGE));
        assert!(body.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn test_auth_and_upstream_failures_surface_generic_message() {
        let errors = [
            MotApiError::Auth("token endpoint returned 401".to_string()),
            MotApiError::Upstream("vehicle history endpoint returned 503".to_string()),
            MotApiError::Config("MOT_CLIENT_ID is not set".to_string()),
        ];

        for err in errors {
            let response = pipeline_error_response(&err);
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

            let body = body_text(response).await;
            assert!(body.contains(GENERIC_ERROR_MESSAGE));
            // The real cause stays server-side.
            assert!(!body.contains("401"));
            assert!(!body.contains("503"));
            assert!(!body.contains("MOT_CLIENT_ID"));
        }
    }

    #[tokio::test]
    async fn test_missing_registration_response_shape() {
        let response = error_response(StatusCode::BAD_REQUEST, MISSING_REGISTRATION_MESSAGE);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_text(response).await;
        assert!(body.contains(MISSING_REGISTRATION_MESSAGE));
        assert!(body.contains("\"success\":false"));
    }
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>MOT History Summary</title>
    <style>
        body { font-family: sans-serif; max-width: 40rem; margin: 2rem auto; }
        .messages { border: 1px solid #ccc; padding: 1rem; min-height: 12rem; white-space: pre-wrap; }
        form { margin-top: 1rem; }
    </style>
</head>
<body>
    <h1>MOT History Summary</h1>
    <div class="messages"></div>
    <form>
        <input name="registration" placeholder="Vehicle registration" autocomplete="off" />
        <button type="submit">Summarize</button>
    </form>
    <script>
        document.querySelector("form").addEventListener("submit", function (event) {
            event.preventDefault();
            const input = document.querySelector('input[name="registration"]');
            const registration = input.value.trim();
            const messages = document.querySelector(".messages");
            if (!registration) { return; }
            input.value = "";

            const userDiv = document.createElement("div");
            userDiv.textContent = "User: " + registration;
            messages.appendChild(userDiv);

            fetch("/chat", {
                method: "POST",
                headers: { "Content-Type": "application/json" },
                body: JSON.stringify({ registration: registration }),
            })
                .then((response) => response.json())
                .then((data) => {
                    const modelDiv = document.createElement("div");
                    messages.appendChild(modelDiv);
                    if (!data.success) {
                        modelDiv.textContent = "Error: " + data.error;
                        return;
                    }
                    const eventSource = new EventSource("/stream?id=" + data.stream_id);
                    eventSource.onmessage = function (event) {
                        if (event.data.startsWith("Error:")) {
                            modelDiv.textContent = event.data;
                            eventSource.close();
                        } else {
                            modelDiv.textContent += event.data;
                        }
                        messages.scrollTop = messages.scrollHeight;
                    };
                    eventSource.onerror = function () {
                        eventSource.close();
                    };
                });
        });
    </script>
</body>
</html>
"#;
