//! Server-Sent Events support

use crate::runtime::SseEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream
pub fn sse_stream(
    init_event: SseEvent,
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Create stream that starts with init event then broadcasts
    let init = futures::stream::once(async move { Ok(sse_event_to_axum(init_event)) });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(sse_event_to_axum(event))),
        Err(_) => None, // Skip lagged messages
    });

    let combined = init.chain(broadcasts);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = match event {
        SseEvent::Init {
            conversation,
            turns,
            agent_working,
        } => (
            "init",
            json!({
                "type": "init",
                "conversation": conversation,
                "turns": turns,
                "agent_working": agent_working
            }),
        ),
        SseEvent::TurnStarted { turn } => (
            "turn_started",
            json!({
                "type": "turn_started",
                "turn": turn
            }),
        ),
        SseEvent::SegmentAppended { turn_id, segment } => (
            "segment_appended",
            json!({
                "type": "segment_appended",
                "turn_id": turn_id,
                "segment": segment
            }),
        ),
        SseEvent::ConfirmationRequested { turn_id, pending } => (
            "confirmation_requested",
            json!({
                "type": "confirmation_requested",
                "turn_id": turn_id,
                "pending": pending
            }),
        ),
        SseEvent::StateChange { state } => (
            "state_change",
            json!({
                "type": "state_change",
                "state": state
            }),
        ),
        SseEvent::TitleChanged { title } => (
            "title_changed",
            json!({
                "type": "title_changed",
                "title": title
            }),
        ),
        SseEvent::AgentDone => (
            "agent_done",
            json!({
                "type": "agent_done"
            }),
        ),
        SseEvent::Error { message } => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
