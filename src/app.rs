use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::handlers::{
    agents, businesses, collaboration, dashboard, events, fleet, health, ledger, organizations,
    projects,
};
use crate::routes;
use crate::state::AppState;

/// Build the axum Router with all API routes and middleware
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(routes::ROOT, get(health::root_handler))
        .route(routes::HEALTH, get(health::health_handler))
        // Directory
        .route(
            routes::ORGANIZATIONS,
            get(organizations::list_organizations_handler)
                .post(organizations::create_organization_handler),
        )
        .route(routes::ORGANIZATION, get(organizations::get_organization_handler))
        .route(
            routes::ORGANIZATION_BUSINESSES,
            get(organizations::organization_businesses_handler),
        )
        .route(
            routes::BUSINESSES,
            get(businesses::list_businesses_handler).post(businesses::create_business_handler),
        )
        .route(routes::BUSINESS, get(businesses::get_business_handler))
        .route(routes::BUSINESS_PROJECTS, get(businesses::business_projects_handler))
        .route(
            routes::PROJECTS,
            get(projects::list_projects_handler).post(projects::create_project_handler),
        )
        .route(routes::PROJECT, get(projects::get_project_handler))
        .route(routes::PROJECT_STATUS, patch(projects::update_project_status_handler))
        .route(routes::PROJECT_MESSAGES, get(collaboration::project_messages_handler))
        // Agents
        .route(routes::AGENTS, get(agents::list_agents_handler))
        .route(routes::AGENT_PROVISION, post(agents::provision_handler))
        .route(
            routes::AGENT,
            patch(agents::update_agent_handler).delete(agents::archive_agent_handler),
        )
        .route(routes::AGENTS_V1, get(agents::list_agents_v1_handler))
        .route(routes::AGENT_REGISTER, post(agents::register_agent_handler))
        .route(routes::AGENT_SPAWN, post(agents::spawn_agent_handler))
        // Fleet
        .route(routes::FLEET, get(fleet::fleet_handler))
        .route(routes::FLEET_AGENT, get(fleet::fleet_agent_handler))
        .route(routes::FLEET_STATUS, patch(fleet::update_fleet_status_handler))
        .route(routes::FLEET_HEARTBEAT, post(fleet::heartbeat_handler))
        // Collaboration
        .route(routes::COLLABORATION, get(collaboration::collaboration_handler))
        .route(routes::COLLABORATION_MESSAGE, post(collaboration::send_message_handler))
        // Ledger
        .route(
            routes::LEDGER,
            get(ledger::list_entries_handler).post(ledger::record_entry_handler),
        )
        .route(routes::LEDGER_SUMMARY, get(ledger::summary_handler))
        .route(routes::LEDGER_ENTRY, get(ledger::get_entry_handler))
        .route(routes::LEDGER_VERIFY, get(ledger::verify_entry_handler))
        .route(routes::LEDGER_STATUS, patch(ledger::update_entry_status_handler))
        // Dashboard and live events
        .route(routes::DASHBOARD, get(dashboard::dashboard_handler))
        .route(routes::DASHBOARD_EVENTS, get(dashboard::events_log_handler))
        .route(routes::EVENTS, get(events::sse_handler))
        .with_state(state)
        .merge(SwaggerUi::new(routes::SWAGGER_UI).url(routes::OPENAPI_JSON, ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
