// ABOUTME: Server-Sent Events endpoint relaying a workspace's execution events
// ABOUTME: Each event is named after its stream or lifecycle kind and carries the JSON LogEvent

use super::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use runbox_runner::{validation::validate_workspace_id, LogEvent};
use std::convert::Infallible;
use tracing::{info, warn};

/// Maximum size for one event's text; longer lines are cut before sending.
pub const MAX_SSE_TEXT_BYTES: usize = 64 * 1024;

/// Subscribe to a workspace's events from now on. Nothing is replayed.
pub async fn stream_events(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    validate_workspace_id(&workspace_id)?;
    info!("Event stream opened for workspace {}", workspace_id);

    let subscription = state.registry.subscribe(&workspace_id);
    let stream = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse_event(event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn to_sse_event(mut event: LogEvent) -> Event {
    if event.text.len() > MAX_SSE_TEXT_BYTES {
        let mut cut = MAX_SSE_TEXT_BYTES;
        while !event.text.is_char_boundary(cut) {
            cut -= 1;
        }
        event.text.truncate(cut);
    }

    let name = event.event_name();
    let id = format!("{}:{}", event.execution_id, event.sequence);
    match Event::default().event(name).id(id).json_data(&event) {
        Ok(sse_event) => sse_event,
        Err(e) => {
            warn!("Failed to encode event {} for SSE: {}", event.sequence, e);
            Event::default().event("error").data("event encoding failed")
        }
    }
}
