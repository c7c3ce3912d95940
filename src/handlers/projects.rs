use crate::error::{ApiError, ErrorResponse};
use crate::handlers::businesses::settings_object;
use crate::models::{
    links, non_blank, parse_body_id, parse_path_id, parse_uuid_param, Action, CreateProjectRequest,
    Link, Linked, ProjectDetailResponse, ProjectListResponse, ProjectQuery, StatusRequest,
};
use crate::routes::{self, with_id};
use crate::state::AppState;
use crate::store::{Project, ProjectStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

fn project_links(id: Uuid) -> crate::models::Links {
    links([
        ("self", Link::get(with_id(routes::PROJECT, id))),
        ("messages", Link::get(with_id(routes::PROJECT_MESSAGES, id))),
        ("spawn_agent", Link::post(routes::AGENT_SPAWN)),
    ])
}

fn project_actions() -> Vec<Action> {
    let action = |rel: &str, description: &str, link: Link| Action {
        rel: rel.to_string(),
        description: description.to_string(),
        link,
    };
    vec![
        action(
            "spawn_research_agent",
            "Spawn agent to research topic",
            Link::post(routes::AGENT_SPAWN),
        ),
        action(
            "spawn_analysis_agent",
            "Spawn agent to analyze data",
            Link::post(routes::AGENT_SPAWN),
        ),
        action(
            "message_collaborators",
            "Message other agents on project",
            Link::post(routes::COLLABORATION_MESSAGE),
        ),
    ]
}

fn parse_status(value: Option<&str>) -> Result<Option<ProjectStatus>, ApiError> {
    value
        .map(|s| s.parse::<ProjectStatus>().map_err(ApiError::Validation))
        .transpose()
}

/// GET /api/v1/projects handler - List projects
#[utoipa::path(
    get,
    path = routes::PROJECTS,
    params(ProjectQuery),
    responses(
        (status = 200, description = "Projects, newest first", body = ProjectListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn list_projects_handler(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<(StatusCode, Json<ProjectListResponse>), ApiError> {
    let business_id = parse_uuid_param("business_id", query.business_id.as_deref())?;
    let projects = state.store.list_projects(business_id).await?;

    Ok((
        StatusCode::OK,
        Json(ProjectListResponse {
            total: projects.len(),
            projects,
        }),
    ))
}

/// POST /api/v1/projects handler - Create a project under a business
#[utoipa::path(
    post,
    path = routes::PROJECTS,
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = Linked<Project>),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 404, description = "Business not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn create_project_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Linked<Project>>), ApiError> {
    let name = non_blank(req.name.as_deref());
    let business_id = parse_body_id(req.business_id.as_deref())?;
    let (Some(name), Some(business_id)) = (name, business_id) else {
        return Err(ApiError::Validation(
            "name and business_id are required".to_string(),
        ));
    };
    let status = parse_status(req.status.as_deref())?.unwrap_or(ProjectStatus::Active);
    let settings = settings_object(req.settings)?;

    if state.store.get_business(business_id).await?.is_none() {
        return Err(ApiError::not_found("Business", business_id));
    }

    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        business_id,
        name,
        description: non_blank(req.description.as_deref()),
        status,
        settings,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_project(&project).await?;

    tracing::info!("Created project {} in business {}", project.id, business_id);
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: project_links(project.id),
            data: project,
        }),
    ))
}

/// GET /api/v1/projects/{id} handler - A project with its next actions
#[utoipa::path(
    get,
    path = routes::PROJECT,
    params(
        ("id" = String, Path, description = "Project UUID")
    ),
    responses(
        (status = 200, description = "Project found", body = ProjectDetailResponse),
        (status = 400, description = "Invalid UUID format", body = ErrorResponse),
        (status = 404, description = "Project not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn get_project_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<ProjectDetailResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let project = state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project", id))?;

    Ok((
        StatusCode::OK,
        Json(ProjectDetailResponse {
            links: project_links(project.id),
            actions: project_actions(),
            project,
        }),
    ))
}

/// PATCH /api/v1/projects/{id}/status handler
#[utoipa::path(
    patch,
    path = routes::PROJECT_STATUS,
    params(
        ("id" = String, Path, description = "Project UUID")
    ),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status updated", body = Project),
        (status = 400, description = "Invalid status", body = ErrorResponse),
        (status = 404, description = "Project not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn update_project_status_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let status = parse_status(req.status.as_deref())?
        .ok_or_else(|| ApiError::Validation("status is required".to_string()))?;

    let mut project = state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project", id))?;

    project.status = status;
    project.updated_at = Utc::now();
    state.store.update_project(&project).await?;

    tracing::info!("Project {} is now {}", id, status);
    Ok((StatusCode::OK, Json(project)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{seed_business, seed_project, send};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_project_defaults_to_active() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/projects",
            Some(json!({"name": "Loyalty app", "business_id": business.id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "active");
        assert_eq!(body["settings"], json!({}));
        let id = body["id"].as_str().unwrap();
        assert_eq!(
            body["_links"]["messages"]["href"],
            format!("/api/v1/projects/{}/messages", id)
        );
    }

    #[tokio::test]
    async fn test_create_project_validation() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/projects",
            Some(json!({"name": "X", "business_id": business.id, "status": "paused"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("active, archived, draft"));

        let (status, _) = send(
            &state,
            "POST",
            "/api/v1/projects",
            Some(json!({"name": "X", "business_id": Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, "POST", "/api/v1/projects", Some(json!({"business_id": business.id}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_project_lists_actions() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let project = seed_project(&state, business.id).await;

        let (status, body) = send(&state, "GET", &format!("/api/v1/projects/{}", project.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Spring launch");

        let rels: Vec<&str> = body["_actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["rel"].as_str().unwrap())
            .collect();
        assert_eq!(
            rels,
            vec!["spawn_research_agent", "spawn_analysis_agent", "message_collaborators"]
        );
        assert_eq!(body["_actions"][2]["href"], "/api/v1/collaboration/message");
    }

    #[tokio::test]
    async fn test_update_project_status() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let project = seed_project(&state, business.id).await;
        let uri = format!("/api/v1/projects/{}/status", project.id);

        let (status, body) = send(&state, "PATCH", &uri, Some(json!({"status": "archived"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "archived");

        let stored = state.store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Archived);

        let (status, _) = send(&state, "PATCH", &uri, Some(json!({"status": "gone"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, "PATCH", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
