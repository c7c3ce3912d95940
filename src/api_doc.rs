use utoipa::OpenApi;

use crate::error::{ErrorResponse, HealthResponse, UnhealthyResponse};
use crate::handlers;
use crate::ledger::Verification;
use crate::models::{
    Action, AgentListResponse, ArchiveResponse, BusinessListResponse, CollaborationResponse,
    CreateBusinessRequest, CreateOrganizationRequest, CreateProjectRequest, DashboardResponse,
    EventListResponse, FleetAgentDetail, FleetDetailResponse, FleetResponse, HeartbeatResponse,
    Link, LedgerListResponse, MessageListResponse, OrganizationListResponse, ProjectDetailResponse,
    ProjectListResponse, ProvisionRequest, ProvisionResponse, RecordLedgerRequest,
    RegisterAgentRequest, RegisteredAgent, RootResponse, SendMessageRequest, SpawnRequest,
    StatusRequest, UpdateAgentRequest, VerifyResponse,
};
use crate::store::{
    Agent, AgentStatus, Business, DirectoryCounts, FleetAgent, FleetSummary, LedgerActionType,
    LedgerEntry, LedgerStatus, LedgerSummary, Message, Organization, Project, ProjectStatus,
    Severity, SystemEvent,
};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "genii-erp API",
        version = "0.1.0",
        description = "AI-native ERP: business directory, agent fleet, triple-entry ledger and live events"
    ),
    paths(
        handlers::health::health_handler,
        handlers::health::root_handler,
        handlers::organizations::list_organizations_handler,
        handlers::organizations::create_organization_handler,
        handlers::organizations::get_organization_handler,
        handlers::organizations::organization_businesses_handler,
        handlers::businesses::list_businesses_handler,
        handlers::businesses::create_business_handler,
        handlers::businesses::get_business_handler,
        handlers::businesses::business_projects_handler,
        handlers::projects::list_projects_handler,
        handlers::projects::create_project_handler,
        handlers::projects::get_project_handler,
        handlers::projects::update_project_status_handler,
        handlers::agents::provision_handler,
        handlers::agents::list_agents_handler,
        handlers::agents::list_agents_v1_handler,
        handlers::agents::register_agent_handler,
        handlers::agents::update_agent_handler,
        handlers::agents::archive_agent_handler,
        handlers::agents::spawn_agent_handler,
        handlers::fleet::fleet_handler,
        handlers::fleet::fleet_agent_handler,
        handlers::fleet::update_fleet_status_handler,
        handlers::fleet::heartbeat_handler,
        handlers::collaboration::collaboration_handler,
        handlers::collaboration::send_message_handler,
        handlers::collaboration::project_messages_handler,
        handlers::ledger::record_entry_handler,
        handlers::ledger::list_entries_handler,
        handlers::ledger::get_entry_handler,
        handlers::ledger::verify_entry_handler,
        handlers::ledger::update_entry_status_handler,
        handlers::ledger::summary_handler,
        handlers::dashboard::dashboard_handler,
        handlers::dashboard::events_log_handler,
        handlers::events::sse_handler
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            UnhealthyResponse,
            RootResponse,
            Link,
            Action,
            Organization,
            Business,
            Project,
            ProjectStatus,
            Agent,
            AgentStatus,
            FleetAgent,
            FleetSummary,
            LedgerEntry,
            LedgerActionType,
            LedgerStatus,
            LedgerSummary,
            Message,
            SystemEvent,
            Severity,
            DirectoryCounts,
            Verification,
            CreateOrganizationRequest,
            OrganizationListResponse,
            CreateBusinessRequest,
            BusinessListResponse,
            CreateProjectRequest,
            ProjectListResponse,
            ProjectDetailResponse,
            StatusRequest,
            ProvisionRequest,
            ProvisionResponse,
            AgentListResponse,
            UpdateAgentRequest,
            ArchiveResponse,
            SpawnRequest,
            RegisterAgentRequest,
            RegisteredAgent,
            FleetResponse,
            FleetAgentDetail,
            FleetDetailResponse,
            HeartbeatResponse,
            CollaborationResponse,
            SendMessageRequest,
            MessageListResponse,
            RecordLedgerRequest,
            LedgerListResponse,
            VerifyResponse,
            DashboardResponse,
            EventListResponse
        )
    ),
    tags(
        (name = "health", description = "Health check and discovery"),
        (name = "directory", description = "Organizations, businesses and projects"),
        (name = "agents", description = "Agent provisioning, registration and sub-agents"),
        (name = "fleet", description = "Fleet monitoring and control"),
        (name = "collaboration", description = "Agent to agent messaging"),
        (name = "ledger", description = "Triple-entry signed ledger"),
        (name = "dashboard", description = "Aggregated overview and audit log"),
        (name = "events", description = "Live server-sent events")
    )
)]
pub struct ApiDoc;
