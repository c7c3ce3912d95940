use crate::error::{ApiError, ErrorResponse};
use crate::events::channel;
use crate::models::{
    parse_enum_param, parse_path_id, parse_uuid_param, FleetAgentDetail, FleetDetailResponse,
    FleetQuery, FleetResponse, HeartbeatResponse, StatusRequest,
};
use crate::routes;
use crate::state::AppState;
use crate::store::{
    guard, Agent, AgentFilter, AgentStatus, Edit, LedgerFilter, Severity, SystemEvent,
    WriteConflict, RECENT_ACTIONS_LIMIT,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::json;

fn settable_statuses() -> String {
    AgentStatus::SETTABLE
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// GET /api/fleet handler - Agents with activity plus a fleet-wide summary
#[utoipa::path(
    get,
    path = routes::FLEET,
    params(FleetQuery),
    responses(
        (status = 200, description = "Fleet overview", body = FleetResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn fleet_handler(
    State(state): State<AppState>,
    Query(query): Query<FleetQuery>,
) -> Result<(StatusCode, Json<FleetResponse>), ApiError> {
    let filter = AgentFilter {
        entity_id: parse_uuid_param("entity_id", query.entity_id.as_deref())?,
        status: parse_enum_param(query.status.as_deref())?,
    };

    let agents = state.store.fleet_agents(&filter).await?;
    let summary = state.store.fleet_summary().await?;

    tracing::debug!("Fleet query returned {} agents ({:?})", agents.len(), filter);
    Ok((StatusCode::OK, Json(FleetResponse { agents, summary })))
}

/// GET /api/fleet/{id} handler - One agent with its recent ledger activity
#[utoipa::path(
    get,
    path = routes::FLEET_AGENT,
    params(
        ("id" = String, Path, description = "Agent UUID")
    ),
    responses(
        (status = 200, description = "Agent detail", body = FleetDetailResponse),
        (status = 400, description = "Invalid UUID format", body = ErrorResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn fleet_agent_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<FleetDetailResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let agent = state
        .store
        .get_agent(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", id))?;

    let entity_name = state
        .store
        .get_business(agent.entity_id)
        .await?
        .map(|business| business.name);
    let recent = state
        .store
        .list_ledger_entries(&LedgerFilter::for_agent(id, RECENT_ACTIONS_LIMIT))
        .await?;

    Ok((
        StatusCode::OK,
        Json(FleetDetailResponse {
            agent: FleetAgentDetail { agent, entity_name },
            recent_actions: recent.entries,
        }),
    ))
}

/// PATCH /api/fleet/{id}/status handler - Operator status change
#[utoipa::path(
    patch,
    path = routes::FLEET_STATUS,
    params(
        ("id" = String, Path, description = "Agent UUID")
    ),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status updated", body = Agent),
        (status = 400, description = "Status is not settable", body = ErrorResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn update_fleet_status_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let status = req
        .status
        .as_deref()
        .and_then(|s| s.parse::<AgentStatus>().ok())
        .filter(|s| AgentStatus::SETTABLE.contains(s))
        .ok_or_else(|| {
            ApiError::Validation(format!("status must be one of: {}", settable_statuses()))
        })?;

    let change = guard(move |current: &Agent| {
        let event = SystemEvent::new(
            "status_change",
            Some(current.entity_id),
            Some(current.id),
            json!({"from": current.status, "to": status}),
            Severity::Info,
        );
        let mut row = current.clone();
        row.status = status;
        Ok(Edit::Write {
            row,
            event: Some(event),
        })
    });
    let updated = state
        .store
        .modify_agent(id, change)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", id))?;

    let previous = updated.previous.status;
    let agent = updated.current;
    state.bus.publish(
        channel::FLEET_STATUS,
        &json!({"agent_id": agent.id, "status": status}),
    );

    tracing::info!("Agent {} status {} -> {}", id, previous, status);
    Ok((StatusCode::OK, Json(agent)))
}

/// POST /api/fleet/{id}/heartbeat handler - Mark an agent alive
#[utoipa::path(
    post,
    path = routes::FLEET_HEARTBEAT,
    params(
        ("id" = String, Path, description = "Agent UUID")
    ),
    responses(
        (status = 200, description = "Heartbeat recorded", body = HeartbeatResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse),
        (status = 409, description = "Agent is archived", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn heartbeat_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<HeartbeatResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let now = Utc::now();

    let beat = guard(move |current: &Agent| {
        if current.status == AgentStatus::Archived {
            return Err(WriteConflict(format!(
                "Agent {} is archived and cannot report heartbeats",
                current.id
            ))
            .into());
        }
        let mut row = current.clone();
        row.last_heartbeat = Some(now);
        row.status = AgentStatus::Active;
        Ok(Edit::Write { row, event: None })
    });
    let agent = state
        .store
        .modify_agent(id, beat)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", id))?
        .current;

    tracing::debug!("Heartbeat from agent {}", id);
    Ok((
        StatusCode::OK,
        Json(HeartbeatResponse {
            id,
            status: agent.status,
            last_heartbeat: now,
        }),
    ))
}
