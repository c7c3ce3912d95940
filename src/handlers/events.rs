use crate::events::BusMessage;
use crate::routes;
use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

fn to_event(msg: Result<BusMessage, BroadcastStreamRecvError>) -> Option<Result<Event, Infallible>> {
    match msg {
        Ok(msg) => Some(Ok(Event::default()
            .event(msg.channel)
            .data(msg.payload.to_string()))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE subscriber lagged, dropped {} messages", skipped);
            None
        }
    }
}

/// GET /api/events handler - Server-sent stream of state changes
///
/// Each event is named after its channel (for example `fleet:status`) and
/// carries the JSON payload as data.
#[utoipa::path(
    get,
    path = routes::EVENTS,
    responses(
        (status = 200, description = "text/event-stream of bus messages", content_type = "text/event-stream", body = String)
    ),
    tag = "events"
)]
pub async fn sse_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(to_event);
    Sse::new(stream).keep_alive(KeepAlive::default())
}
