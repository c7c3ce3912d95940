use crate::error::{ApiError, ErrorResponse};
use crate::models::{
    links, non_blank, parse_path_id, BusinessListResponse, CreateOrganizationRequest, Link,
    Linked, OrganizationListResponse,
};
use crate::routes::{self, with_id};
use crate::state::AppState;
use crate::store::Organization;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

fn organization_links(id: Uuid) -> crate::models::Links {
    links([
        ("self", Link::get(with_id(routes::ORGANIZATION, id))),
        ("businesses", Link::get(with_id(routes::ORGANIZATION_BUSINESSES, id))),
        ("create_business", Link::post(routes::BUSINESSES)),
        ("agents", Link::get(routes::AGENTS)),
    ])
}

/// GET /api/v1/organizations handler - List organizations, newest first
#[utoipa::path(
    get,
    path = routes::ORGANIZATIONS,
    responses(
        (status = 200, description = "All organizations", body = OrganizationListResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn list_organizations_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<OrganizationListResponse>), ApiError> {
    let organizations = state.store.list_organizations().await?;

    Ok((
        StatusCode::OK,
        Json(OrganizationListResponse {
            total: organizations.len(),
            organizations,
            links: links([("create", Link::post(routes::ORGANIZATIONS))]),
        }),
    ))
}

/// POST /api/v1/organizations handler - Create an organization
#[utoipa::path(
    post,
    path = routes::ORGANIZATIONS,
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = Linked<Organization>),
        (status = 400, description = "Missing name", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn create_organization_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Linked<Organization>>), ApiError> {
    let name = non_blank(req.name.as_deref())
        .ok_or_else(|| ApiError::Validation("name is required".to_string()))?;

    let now = Utc::now();
    let org = Organization {
        id: Uuid::new_v4(),
        name,
        owner_email: non_blank(req.owner_email.as_deref()),
        description: non_blank(req.description.as_deref()),
        created_at: now,
        updated_at: now,
    };
    state.store.insert_organization(&org).await?;

    tracing::info!("Created organization {} ({})", org.id, org.name);
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: organization_links(org.id),
            data: org,
        }),
    ))
}

/// GET /api/v1/organizations/{id} handler - Fetch one organization
#[utoipa::path(
    get,
    path = routes::ORGANIZATION,
    params(
        ("id" = String, Path, description = "Organization UUID")
    ),
    responses(
        (status = 200, description = "Organization found", body = Linked<Organization>),
        (status = 400, description = "Invalid UUID format", body = ErrorResponse),
        (status = 404, description = "Organization not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn get_organization_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<Linked<Organization>>), ApiError> {
    let id = parse_path_id(&id_str)?;
    let org = state
        .store
        .get_organization(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization", id))?;

    Ok((
        StatusCode::OK,
        Json(Linked {
            links: organization_links(org.id),
            data: org,
        }),
    ))
}

/// GET /api/v1/organizations/{id}/businesses handler
#[utoipa::path(
    get,
    path = routes::ORGANIZATION_BUSINESSES,
    params(
        ("id" = String, Path, description = "Organization UUID")
    ),
    responses(
        (status = 200, description = "Businesses of the organization", body = BusinessListResponse),
        (status = 404, description = "Organization not found", body = ErrorResponse)
    ),
    tag = "directory"
)]
pub async fn organization_businesses_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<BusinessListResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    if state.store.get_organization(id).await?.is_none() {
        return Err(ApiError::not_found("Organization", id));
    }

    let businesses = state.store.list_businesses(Some(id)).await?;
    Ok((
        StatusCode::OK,
        Json(BusinessListResponse {
            total: businesses.len(),
            businesses,
        }),
    ))
}
