use crate::error::{ApiError, ErrorResponse};
use crate::models::{
    links, non_blank, parse_body_id, parse_path_id, parse_uuid_param, BusinessListResponse,
    BusinessQuery, CreateBusinessRequest, Link, Linked, ProjectListResponse,
};
use crate::routes::{self, with_id};
use crate::state::AppState;
use crate::store::Business;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn business_links(id: Uuid) -> crate::models::Links {
    links([
        ("self", Link::get(with_id(routes::BUSINESS, id))),
        ("projects", Link::get(with_id(routes::BUSINESS_PROJECTS, id))),
        ("create_project", Link::post(routes::PROJECTS)),
        ("provision_agent", Link::post(routes::AGENT_PROVISION)),
    ])
}

/// Settings default to `{}` and must otherwise be a JSON object
pub(crate) fn settings_object(settings: Option<JsonValue>) -> Result<JsonValue, ApiError> {
    match settings {
        None | Some(JsonValue::Null) => Ok(json!({})),
        Some(value @ JsonValue::Object(_)) => Ok(value),
        Some(_) => Err(ApiError::Validation(
            "settings must be a JSON object".to_string(),
        )),
    }
}

/// GET /api/v1/businesses handler - List businesses
#[utoipa::path(
    get,
    path = routes::BUSINESSES,
    params(BusinessQuery),
    responses(
        (status = 200, description = "Businesses, newest first", body = BusinessListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn list_businesses_handler(
    State(state): State<AppState>,
    Query(query): Query<BusinessQuery>,
) -> Result<(StatusCode, Json<BusinessListResponse>), ApiError> {
    let organization_id = parse_uuid_param("organization_id", query.organization_id.as_deref())?;
    let businesses = state.store.list_businesses(organization_id).await?;

    Ok((
        StatusCode::OK,
        Json(BusinessListResponse {
            total: businesses.len(),
            businesses,
        }),
    ))
}

/// POST /api/v1/businesses handler - Create a business under an organization
#[utoipa::path(
    post,
    path = routes::BUSINESSES,
    request_body = CreateBusinessRequest,
    responses(
        (status = 201, description = "Business created", body = Linked<Business>),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 404, description = "Organization not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn create_business_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateBusinessRequest>,
) -> Result<(StatusCode, Json<Linked<Business>>), ApiError> {
    let name = non_blank(req.name.as_deref());
    let organization_id = parse_body_id(req.organization_id.as_deref())?;
    let (Some(name), Some(organization_id)) = (name, organization_id) else {
        return Err(ApiError::Validation(
            "name and organization_id are required".to_string(),
        ));
    };
    let settings = settings_object(req.settings)?;

    if state.store.get_organization(organization_id).await?.is_none() {
        return Err(ApiError::not_found("Organization", organization_id));
    }

    let now = Utc::now();
    let business = Business {
        id: Uuid::new_v4(),
        organization_id,
        name,
        industry: non_blank(req.industry.as_deref()),
        description: non_blank(req.description.as_deref()),
        settings,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_business(&business).await?;

    tracing::info!(
        "Created business {} in organization {}",
        business.id,
        organization_id
    );
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: business_links(business.id),
            data: business,
        }),
    ))
}

/// GET /api/v1/businesses/{id} handler
#[utoipa::path(
    get,
    path = routes::BUSINESS,
    params(
        ("id" = String, Path, description = "Business UUID")
    ),
    responses(
        (status = 200, description = "Business found", body = Linked<Business>),
        (status = 400, description = "Invalid UUID format", body = ErrorResponse),
        (status = 404, description = "Business not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn get_business_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<Linked<Business>>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let business = state
        .store
        .get_business(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Business", id))?;

    Ok((
        StatusCode::OK,
        Json(Linked {
            links: business_links(business.id),
            data: business,
        }),
    ))
}

/// GET /api/v1/businesses/{id}/projects handler
#[utoipa::path(
    get,
    path = routes::BUSINESS_PROJECTS,
    params(
        ("id" = String, Path, description = "Business UUID")
    ),
    responses(
        (status = 200, description = "Projects of the business", body = ProjectListResponse),
        (status = 404, description = "Business not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn business_projects_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<ProjectListResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    if state.store.get_business(id).await?.is_none() {
        return Err(ApiError::not_found("Business", id));
    }

    let projects = state.store.list_projects(Some(id)).await?;
    Ok((
        StatusCode::OK,
        Json(ProjectListResponse {
            total: projects.len(),
            projects,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{seed_business, seed_organization, seed_project, send};

    #[test]
    fn test_settings_object() {
        assert_eq!(settings_object(None).unwrap(), json!({}));
        assert_eq!(settings_object(Some(json!({"tz": "UTC"}))).unwrap()["tz"], "UTC");
        assert!(settings_object(Some(json!([1, 2]))).is_err());
    }

    #[tokio::test]
    async fn test_create_business() {
        let state = AppState::for_tests();
        let org = seed_organization(&state).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/businesses",
            Some(json!({
                "name": "Corner Cafe",
                "organization_id": org.id,
                "industry": "hospitality",
                "settings": {"currency": "EUR"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["organization_id"], org.id.to_string());
        assert_eq!(body["settings"]["currency"], "EUR");
        assert_eq!(body["_links"]["create_project"]["href"], "/api/v1/projects");

        let id = body["id"].as_str().unwrap();
        let (status, body) = send(&state, "GET", &format!("/api/v1/businesses/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["industry"], "hospitality");
    }

    #[tokio::test]
    async fn test_create_business_validation() {
        let state = AppState::for_tests();

        let (status, _) = send(&state, "POST", "/api/v1/businesses", Some(json!({"name": "X"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            "POST",
            "/api/v1/businesses",
            Some(json!({"name": "X", "organization_id": Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let org = seed_organization(&state).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/businesses",
            Some(json!({"name": "X", "organization_id": org.id, "settings": "dark"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "settings must be a JSON object");
    }

    #[tokio::test]
    async fn test_filter_by_organization() {
        let state = AppState::for_tests();
        let first = seed_business(&state).await;
        seed_business(&state).await;

        let (_, body) = send(&state, "GET", "/api/v1/businesses", None).await;
        assert_eq!(body["total"], 2);

        let (_, body) = send(
            &state,
            "GET",
            &format!("/api/v1/businesses?organization_id={}", first.organization_id),
            None,
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["businesses"][0]["id"], first.id.to_string());

        let (status, _) = send(&state, "GET", "/api/v1/businesses?organization_id=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_business_projects() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        seed_project(&state, business.id).await;

        let (status, body) = send(
            &state,
            "GET",
            &format!("/api/v1/businesses/{}/projects", business.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, _) = send(
            &state,
            "GET",
            &format!("/api/v1/businesses/{}/projects", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
