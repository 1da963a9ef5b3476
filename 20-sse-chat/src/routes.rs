use std::sync::Arc;

use axum::{
    extract::{Query, State},
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{hub::Hub, server::ServerConfig, sse};

/// Shared by every handler; cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<ServerConfig>,
}

/// Builds the full HTTP surface around `hub`.
///
/// Named routes are matched first; everything else is looked up in the public
/// directory, and misses there end in a plain-text 404.
pub fn router(hub: Hub, config: ServerConfig) -> Router {
    let static_files = ServeDir::new(&config.public_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(respond_not_found.into_service());

    let state = AppState {
        hub,
        config: Arc::new(config),
    };

    Router::new()
        .route("/text", get(respond_text))
        .route("/json", get(respond_json))
        .route("/echo", get(respond_echo))
        .route("/chat", get(respond_chat))
        .route("/sse", get(sse::subscribe))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn respond_text() -> &'static str {
    "hi"
}

async fn respond_json() -> Json<Value> {
    Json(json!({
        "text": "hi",
        "numbers": [1, 2, 3],
    }))
}

async fn respond_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[derive(Debug, Deserialize)]
pub struct EchoQuery {
    #[serde(default)]
    pub input: String,
}

/// The `/echo` payload: the input as given, upper-cased, its length in
/// characters and the characters reversed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    pub normal: String,
    pub shouty: String,
    pub char_count: usize,
    pub backwards: String,
}

impl Echo {
    pub fn new(input: &str) -> Self {
        Self {
            normal: input.to_string(),
            shouty: input.to_uppercase(),
            char_count: input.chars().count(),
            backwards: input.chars().rev().collect(),
        }
    }
}

async fn respond_echo(Query(query): Query<EchoQuery>) -> Json<Echo> {
    Json(Echo::new(&query.input))
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub message: Option<String>,
}

/// `GET /chat`: hands the message to the hub and acknowledges at once.
///
/// The acknowledgement only means the server accepted the message; subscribers
/// may or may not have seen it yet.
async fn respond_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> StatusCode {
    state.hub.publish(query.message.unwrap_or_default());
    StatusCode::OK
}
