use crate::error::{ApiError, ErrorResponse};
use crate::events::channel;
use crate::models::{
    links, non_blank, parse_body_id, parse_path_id, parse_uuid_param, AgentListResponse,
    AgentQuery, ArchiveResponse, Link, Linked, ProvisionRequest, ProvisionResponse,
    RegisterAgentRequest, RegisteredAgent, SpawnRequest, UpdateAgentRequest,
};
use crate::routes::{self, with_id};
use crate::state::AppState;
use crate::store::{
    guard, Agent, AgentFilter, AgentStatus, Edit, LedgerActionType, LedgerEntry, LedgerStatus,
    Severity, SystemEvent,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Actor that signs provisioning ledger entries
pub const PROVISIONER_ID: &str = "GENII_PROVISIONER";

fn validate_cost(cost: f64) -> Result<(), ApiError> {
    if !cost.is_finite() || cost < 0.0 {
        return Err(ApiError::Validation(
            "monthly_cost_usd must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/agents/provision handler - Create an agent and its audit trail
///
/// The agent row, its `provision` system event and a signed `provision` ledger
/// entry are committed together. Subscribers and the provisioning webhook are
/// only notified once that commit has succeeded.
#[utoipa::path(
    post,
    path = routes::AGENT_PROVISION,
    request_body = ProvisionRequest,
    responses(
        (status = 201, description = "Agent provisioning started", body = ProvisionResponse),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn provision_handler(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<ProvisionResponse>), ApiError> {
    let name = non_blank(req.name.as_deref());
    let role = non_blank(req.role.as_deref());
    let entity_id = parse_body_id(req.entity_id.as_deref())?;
    let (Some(name), Some(role), Some(entity_id)) = (name, role, entity_id) else {
        return Err(ApiError::Validation(
            "name, role, and entity_id are required".to_string(),
        ));
    };
    validate_cost(req.monthly_cost_usd)?;

    if state.store.get_business(entity_id).await?.is_none() {
        return Err(ApiError::not_found("Business", entity_id));
    }

    let now = Utc::now();
    let agent = Agent {
        id: Uuid::new_v4(),
        name: name.clone(),
        role: role.clone(),
        entity_id,
        parent_agent_id: None,
        project_id: None,
        task: None,
        skills: req.skills,
        mcps: req.mcps,
        status: AgentStatus::Provisioning,
        monthly_cost_usd: req.monthly_cost_usd,
        openclaw_instance_id: None,
        instance_url: None,
        api_key_hash: None,
        last_heartbeat: None,
        created_at: now,
    };

    let event = SystemEvent::new(
        "provision",
        Some(entity_id),
        Some(agent.id),
        json!({
            "name": agent.name,
            "role": agent.role,
            "skills": agent.skills,
            "mcps": agent.mcps,
        }),
        Severity::Info,
    );

    let recipient_id = agent.id.to_string();
    let payload = json!({
        "action": "provision",
        "agent_id": agent.id,
        "entity_id": entity_id,
        "name": agent.name,
        "role": agent.role,
        "monthly_cost_usd": agent.monthly_cost_usd,
    });
    let sigs = state.signer.sign_entry(&payload, PROVISIONER_ID, &recipient_id);
    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        entity_id,
        agent_id: Some(agent.id),
        action_type: LedgerActionType::Provision,
        amount: None,
        status: LedgerStatus::Posted,
        notes: Some(format!("Agent \"{}\" provisioned with role: {}", name, role)),
        ai_recommendation: Some(json!({
            "action": "agent_provisioned",
            "name": name,
            "role": role,
        })),
        actor_id: PROVISIONER_ID.to_string(),
        recipient_id,
        payload,
        actor_sig: sigs.actor_sig,
        recipient_sig: sigs.recipient_sig,
        auditor_sig: sigs.auditor_sig,
        created_at: now,
    };

    state.store.provision_agent(&agent, &event, &entry).await?;

    state.bus.publish(channel::FLEET_PROVISION, &agent);
    let n8n_triggered = state.webhook.trigger(json!({
        "agent_id": agent.id,
        "name": agent.name,
        "role": agent.role,
        "entity_id": entity_id,
        "skills": agent.skills,
        "mcps": agent.mcps,
    }));

    tracing::info!(
        "Provisioned agent {} ({}) for entity {}",
        agent.id,
        agent.role,
        entity_id
    );
    Ok((
        StatusCode::CREATED,
        Json(ProvisionResponse {
            message: format!(
                "Agent \"{}\" provisioning started. OpenClaw instance will be live in <60s.",
                name
            ),
            agent,
            n8n_triggered,
        }),
    ))
}

/// GET /api/agents handler - List agents, newest first
#[utoipa::path(
    get,
    path = routes::AGENTS,
    params(AgentQuery),
    responses(
        (status = 200, description = "Agents", body = AgentListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn list_agents_handler(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> Result<(StatusCode, Json<AgentListResponse>), ApiError> {
    let filter = AgentFilter {
        entity_id: parse_uuid_param("entity_id", query.entity_id.as_deref())?,
        status: None,
    };
    let agents = state.store.list_agents(&filter).await?;

    Ok((
        StatusCode::OK,
        Json(AgentListResponse {
            total: agents.len(),
            agents,
        }),
    ))
}

/// GET /api/v1/agents handler - The agent listing under the versioned prefix
#[utoipa::path(
    get,
    path = routes::AGENTS_V1,
    params(AgentQuery),
    responses(
        (status = 200, description = "Agents", body = AgentListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn list_agents_v1_handler(
    state: State<AppState>,
    query: Query<AgentQuery>,
) -> Result<(StatusCode, Json<AgentListResponse>), ApiError> {
    list_agents_handler(state, query).await
}

/// Hex SHA-256 of an issued API key; only the hash is stored
fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// POST /api/v1/agents/register handler - Enrol an externally hosted agent
///
/// The agent starts `active` and receives an API key. The key is returned once
/// and only its hash is kept.
#[utoipa::path(
    post,
    path = routes::AGENT_REGISTER,
    request_body = RegisterAgentRequest,
    responses(
        (status = 201, description = "Agent registered", body = Linked<RegisteredAgent>),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn register_agent_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Linked<RegisteredAgent>>), ApiError> {
    let entity_id = parse_body_id(req.entity_id.as_deref())?;
    let agent_type = non_blank(req.agent_type.as_deref());
    let instance_url = non_blank(req.instance_url.as_deref());
    let (Some(entity_id), Some(agent_type), Some(instance_url)) =
        (entity_id, agent_type, instance_url)
    else {
        return Err(ApiError::Validation(
            "entity_id, agent_type, and instance_url are required".to_string(),
        ));
    };
    if !(instance_url.starts_with("http://") || instance_url.starts_with("https://")) {
        return Err(ApiError::Validation(
            "instance_url must be an http or https URL".to_string(),
        ));
    }

    if state.store.get_business(entity_id).await?.is_none() {
        return Err(ApiError::not_found("Business", entity_id));
    }

    let api_key = format!("gk_{}", Uuid::new_v4().simple());
    let agent = Agent {
        id: Uuid::new_v4(),
        name: non_blank(req.name.as_deref()).unwrap_or_else(|| agent_type.clone()),
        role: agent_type,
        entity_id,
        parent_agent_id: None,
        project_id: None,
        task: None,
        skills: Vec::new(),
        mcps: Vec::new(),
        status: AgentStatus::Active,
        monthly_cost_usd: 0.0,
        openclaw_instance_id: None,
        instance_url: Some(instance_url),
        api_key_hash: Some(hash_api_key(&api_key)),
        last_heartbeat: None,
        created_at: Utc::now(),
    };
    let event = SystemEvent::new(
        "agent_registered",
        Some(entity_id),
        Some(agent.id),
        json!({
            "agent_type": agent.role,
            "instance_url": agent.instance_url,
            "owner_email": non_blank(req.owner_email.as_deref()),
        }),
        Severity::Info,
    );

    state.store.insert_agent(&agent, Some(&event)).await?;
    state.bus.publish(channel::FLEET_PROVISION, &agent);

    tracing::info!(
        "Registered {} agent {} at {}",
        agent.role,
        agent.id,
        agent.instance_url.as_deref().unwrap_or_default()
    );
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: links([
                ("spawn", Link::post(with_id(routes::AGENT_SPAWN, agent.id))),
                ("status", Link::get(with_id(routes::FLEET_AGENT, agent.id))),
                ("heartbeat", Link::post(with_id(routes::FLEET_HEARTBEAT, agent.id))),
            ]),
            data: RegisteredAgent { agent, api_key },
        }),
    ))
}

/// PATCH /api/agents/{id} handler - Update skills, tools, cost or instance
#[utoipa::path(
    patch,
    path = routes::AGENT,
    params(
        ("id" = String, Path, description = "Agent UUID")
    ),
    request_body = UpdateAgentRequest,
    responses(
        (status = 200, description = "Agent updated", body = Agent),
        (status = 400, description = "Empty or invalid patch", body = ErrorResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn update_agent_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let id = parse_path_id(&id_str)?;
    if req.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }
    if let Some(cost) = req.monthly_cost_usd {
        validate_cost(cost)?;
    }

    // Only the requested fields change; the rest comes from the stored row
    let patch = guard(move |current: &Agent| {
        let mut row = current.clone();
        if let Some(skills) = &req.skills {
            row.skills = skills.clone();
        }
        if let Some(mcps) = &req.mcps {
            row.mcps = mcps.clone();
        }
        if let Some(cost) = req.monthly_cost_usd {
            row.monthly_cost_usd = cost;
        }
        if let Some(instance_id) = non_blank(req.openclaw_instance_id.as_deref()) {
            row.openclaw_instance_id = Some(instance_id);
        }
        Ok(Edit::Write { row, event: None })
    });
    let agent = state
        .store
        .modify_agent(id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", id))?
        .current;

    state.bus.publish(channel::FLEET_UPDATED, &agent);

    tracing::info!("Updated agent {}", id);
    Ok((StatusCode::OK, Json(agent)))
}

/// DELETE /api/agents/{id} handler - Soft-archive an agent
#[utoipa::path(
    delete,
    path = routes::AGENT,
    params(
        ("id" = String, Path, description = "Agent UUID")
    ),
    responses(
        (status = 200, description = "Agent archived", body = ArchiveResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn archive_agent_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<ArchiveResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;

    let archive = guard(|current: &Agent| {
        if current.status == AgentStatus::Archived {
            return Ok(Edit::Keep);
        }
        let event = SystemEvent::new(
            "agent_archived",
            Some(current.entity_id),
            Some(current.id),
            json!({"previous_status": current.status}),
            Severity::Info,
        );
        let mut row = current.clone();
        row.status = AgentStatus::Archived;
        Ok(Edit::Write {
            row,
            event: Some(event),
        })
    });
    let updated = state
        .store
        .modify_agent(id, archive)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", id))?;

    let agent = updated.current;
    if updated.changed {
        state.bus.publish(
            channel::FLEET_STATUS,
            &json!({"agent_id": agent.id, "status": agent.status}),
        );
        tracing::info!("Archived agent {} (was {})", id, updated.previous.status);
    }

    Ok((
        StatusCode::OK,
        Json(ArchiveResponse {
            archived: true,
            agent,
        }),
    ))
}

/// POST /api/v1/agents/{id}/spawn handler - Create a sub-agent on a project
#[utoipa::path(
    post,
    path = routes::AGENT_SPAWN,
    params(
        ("id" = String, Path, description = "Parent agent UUID")
    ),
    request_body = SpawnRequest,
    responses(
        (status = 201, description = "Sub-agent spawned", body = Linked<Agent>),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 404, description = "Parent agent or project not found", body = ErrorResponse),
        (status = 409, description = "Parent agent is archived", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn spawn_agent_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(req): Json<SpawnRequest>,
) -> Result<(StatusCode, Json<Linked<Agent>>), ApiError> {
    let parent_id = parse_path_id(&id_str)?;
    let role = non_blank(req.role.as_deref());
    let task = non_blank(req.task.as_deref());
    let project_id = parse_body_id(req.project_id.as_deref())?;
    let (Some(role), Some(task), Some(project_id)) = (role, task, project_id) else {
        return Err(ApiError::Validation(
            "role, task, and project_id are required".to_string(),
        ));
    };

    let parent = state
        .store
        .get_agent(parent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent", parent_id))?;
    if parent.status == AgentStatus::Archived {
        return Err(ApiError::Conflict(format!(
            "Agent {} is archived and cannot spawn sub-agents",
            parent_id
        )));
    }
    if state.store.get_project(project_id).await?.is_none() {
        return Err(ApiError::not_found("Project", project_id));
    }

    let child = Agent {
        id: Uuid::new_v4(),
        name: non_blank(req.name.as_deref())
            .unwrap_or_else(|| format!("{} {}", parent.name, role)),
        role,
        entity_id: parent.entity_id,
        parent_agent_id: Some(parent.id),
        project_id: Some(project_id),
        task: Some(task),
        skills: Vec::new(),
        mcps: Vec::new(),
        status: AgentStatus::Active,
        monthly_cost_usd: 0.0,
        openclaw_instance_id: None,
        instance_url: None,
        api_key_hash: None,
        last_heartbeat: None,
        created_at: Utc::now(),
    };
    state.store.insert_agent(&child, None).await?;
    state.bus.publish(channel::FLEET_PROVISION, &child);

    tracing::info!(
        "Agent {} spawned sub-agent {} on project {}",
        parent.id,
        child.id,
        project_id
    );
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: links([
                ("status", Link::get(with_id(routes::FLEET_AGENT, child.id))),
                ("parent", Link::get(with_id(routes::FLEET_AGENT, parent.id))),
            ]),
            data: child,
        }),
    ))
}
