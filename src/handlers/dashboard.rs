use crate::error::{ApiError, ErrorResponse};
use crate::models::{DashboardResponse, EventListResponse, EventsQuery};
use crate::routes;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

const DASHBOARD_RECENT_EVENTS: i64 = 10;
const DEFAULT_EVENTS_LIMIT: u32 = 50;
const MAX_EVENTS_LIMIT: u32 = 500;

/// GET /api/dashboard handler - Counts, fleet and ledger summaries
#[utoipa::path(
    get,
    path = routes::DASHBOARD,
    responses(
        (status = 200, description = "Dashboard overview", body = DashboardResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "dashboard"
)]
pub async fn dashboard_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DashboardResponse>), ApiError> {
    let (directory, fleet, ledger, recent_events) = tokio::try_join!(
        state.store.directory_counts(),
        state.store.fleet_summary(),
        state.store.ledger_summary(None),
        state.store.list_system_events(DASHBOARD_RECENT_EVENTS),
    )?;

    Ok((
        StatusCode::OK,
        Json(DashboardResponse {
            directory,
            fleet,
            ledger,
            recent_events,
        }),
    ))
}

/// GET /api/dashboard/events handler - System events, newest first
///
/// `limit` defaults to 50 and is capped at 500.
#[utoipa::path(
    get,
    path = routes::DASHBOARD_EVENTS,
    params(EventsQuery),
    responses(
        (status = 200, description = "System events", body = EventListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "dashboard"
)]
pub async fn events_log_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<(StatusCode, Json<EventListResponse>), ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .min(MAX_EVENTS_LIMIT);

    let events = state.store.list_system_events(limit as i64).await?;
    Ok((
        StatusCode::OK,
        Json(EventListResponse {
            total: events.len(),
            events,
        }),
    ))
}
