//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CatalogResponse, ChatRequest, ChatResponse, ConfirmationRequest, ConversationListResponse,
    ConversationResponse, ConversationWithTurnsResponse, ErrorResponse, RenameRequest,
    SuccessResponse,
};
use super::AppState;
use crate::runtime::SseEvent;
use crate::state_machine::Event;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Datelike;
use chrono::{Local, Timelike};
use rand::seq::SliceRandom;
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversation listing
        .route("/api/conversations", get(list_conversations))
        // Conversation creation (becomes current)
        .route("/api/conversations/new", post(create_conversation))
        // Current-conversation pointer
        .route("/api/conversations/current", get(get_current))
        .route("/api/conversations/:id/select", post(select_conversation))
        // Read-only transcript view
        .route("/api/conversations/:id", get(get_conversation))
        // SSE streaming
        .route("/api/conversations/:id/stream", get(stream_conversation))
        // User actions
        .route("/api/conversations/:id/chat", post(send_chat))
        .route(
            "/api/conversations/:id/confirmation",
            post(resolve_confirmation),
        )
        // Lifecycle
        .route("/api/conversations/:id/delete", post(delete_conversation))
        .route("/api/conversations/:id/rename", post(rename_conversation))
        // Tool catalog
        .route("/api/servers", get(list_servers))
        .route("/api/tools/refresh", post(refresh_tools))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversation Listing
// ============================================================

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state
        .runtime
        .db()
        .list_conversations()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let json_convs: Vec<Value> = conversations
        .into_iter()
        .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
        .collect();

    Ok(Json(ConversationListResponse {
        conversations: json_convs,
    }))
}

// ============================================================
// Conversation Creation
// ============================================================

async fn create_conversation(
    State(state): State<AppState>,
) -> Result<Json<ConversationResponse>, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let title = generate_slug();

    let conversation = state
        .runtime
        .db()
        .create_conversation(&id, &title)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // A new conversation immediately becomes the current one.
    state
        .runtime
        .db()
        .set_current(&id, false)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ConversationResponse {
        conversation: serde_json::to_value(conversation).unwrap_or(Value::Null),
    }))
}

// ============================================================
// Current-conversation pointer
// ============================================================

async fn get_current(
    State(state): State<AppState>,
) -> Result<Json<ConversationWithTurnsResponse>, AppError> {
    let conversation = state
        .runtime
        .db()
        .get_current()
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("No current conversation".to_string()))?;

    conversation_with_turns(&state, conversation)
}

async fn select_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .runtime
        .db()
        .set_current(&id, true)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Conversation Retrieval
// ============================================================

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationWithTurnsResponse>, AppError> {
    let conversation = state
        .runtime
        .db()
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    conversation_with_turns(&state, conversation)
}

fn conversation_with_turns(
    state: &AppState,
    conversation: crate::db::ConversationRecord,
) -> Result<Json<ConversationWithTurnsResponse>, AppError> {
    let turns = state
        .runtime
        .db()
        .get_turns(&conversation.id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let json_turns: Vec<Value> = turns
        .iter()
        .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
        .collect();

    Ok(Json(ConversationWithTurnsResponse {
        agent_working: conversation.is_agent_working(),
        conversation: serde_json::to_value(&conversation).unwrap_or(Value::Null),
        turns: json_turns,
    }))
}

// ============================================================
// SSE Streaming
// ============================================================

async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let conversation = state
        .runtime
        .db()
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    let turns = state
        .runtime
        .db()
        .get_turns(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let json_turns: Vec<Value> = turns
        .iter()
        .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
        .collect();

    // Subscribe to updates
    let broadcast_rx = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    let init_event = SseEvent::Init {
        agent_working: conversation.is_agent_working(),
        conversation: serde_json::to_value(&conversation).unwrap_or(Value::Null),
        turns: json_turns,
    };

    Ok(sse_stream(init_event, broadcast_rx))
}

// ============================================================
// User Actions
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let event = Event::UserMessage { text: req.text };

    state
        .runtime
        .send_event(&id, event)
        .await
        .map_err(AppError::BadRequest)?;

    Ok(Json(ChatResponse { queued: true }))
}

async fn resolve_confirmation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmationRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let event = Event::ConfirmationDecision {
        turn_id: req.turn_id,
        approve: req.approve,
        reason: req.reason,
    };

    state
        .runtime
        .send_event(&id, event)
        .await
        .map_err(AppError::BadRequest)?;

    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Lifecycle
// ============================================================

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .runtime
        .db()
        .delete_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    state
        .runtime
        .db()
        .update_title(&id, &req.title)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    let conversation = state
        .runtime
        .db()
        .get_conversation(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ConversationResponse {
        conversation: serde_json::to_value(conversation).unwrap_or(Value::Null),
    }))
}

// ============================================================
// Tool Catalog
// ============================================================

async fn list_servers(State(state): State<AppState>) -> Json<CatalogResponse> {
    let init = state.runtime.session_init().await;
    Json(CatalogResponse {
        servers: serde_json::to_value(&init.catalog).unwrap_or(Value::Null),
    })
}

/// Re-fetch the catalog from the bridge and rebuild the system instruction,
/// swapping both at once.
async fn refresh_tools(State(state): State<AppState>) -> Result<Json<CatalogResponse>, AppError> {
    let init = state
        .runtime
        .refresh_session()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(CatalogResponse {
        servers: serde_json::to_value(&init.catalog).unwrap_or(Value::Null),
    }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("liaison ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Slug Generation
// ============================================================

/// Default title for a fresh conversation, replaced by the generated title
/// when the first turn lands.
fn generate_slug() -> String {
    let now = Local::now();

    // Day of week
    let day = match now.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    };

    // Time of day
    let time = match now.hour() {
        6..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };

    // Random words
    let words = &[
        "autumn", "river", "mountain", "forest", "meadow", "ocean", "desert", "valley", "sunrise",
        "sunset", "thunder", "lightning", "rainbow", "crystal", "shadow", "light", "ancient",
        "swift", "quiet", "brave", "golden", "silver", "azure", "emerald", "falcon", "wolf",
        "raven", "tiger", "eagle", "fox", "dream", "spark", "flame", "frost", "storm", "breeze",
        "tide", "star",
    ];

    let mut rng = rand::thread_rng();
    let adjective = words.choose(&mut rng).unwrap_or(&"blue");
    let noun = words.choose(&mut rng).unwrap_or(&"sky");

    format!("{day}-{time}-{adjective}-{noun}")
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
