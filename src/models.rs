use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::store::{
    Agent, Business, DirectoryCounts, FleetAgent, FleetSummary, LedgerEntry, LedgerSummary,
    Message, Organization, Project, SystemEvent,
};

/// A hypermedia link to a related resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Link {
    pub href: String,
    pub method: String,
}

impl Link {
    pub fn get(href: impl Into<String>) -> Self {
        Link {
            href: href.into(),
            method: "GET".to_string(),
        }
    }

    pub fn post(href: impl Into<String>) -> Self {
        Link {
            href: href.into(),
            method: "POST".to_string(),
        }
    }
}

pub type Links = BTreeMap<String, Link>;

pub fn links<const N: usize>(entries: [(&str, Link); N]) -> Links {
    entries
        .into_iter()
        .map(|(rel, link)| (rel.to_string(), link))
        .collect()
}

/// A record with its `_links`
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Linked<T> {
    #[serde(flatten)]
    pub data: T,
    #[serde(rename = "_links")]
    pub links: Links,
}

/// Something a client can do next with a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Action {
    pub rel: String,
    pub description: String,
    #[serde(flatten)]
    pub link: Link,
}

/// Response for GET /
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "_links")]
    pub links: Links,
}

// ---- directory ----

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateOrganizationRequest {
    pub name: Option<String>,
    pub owner_email: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct OrganizationListResponse {
    pub organizations: Vec<Organization>,
    pub total: usize,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateBusinessRequest {
    pub name: Option<String>,
    pub organization_id: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub settings: Option<JsonValue>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BusinessQuery {
    pub organization_id: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct BusinessListResponse {
    pub businesses: Vec<Business>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub business_id: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub settings: Option<JsonValue>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProjectQuery {
    pub business_id: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProjectListResponse {
    pub projects: Vec<Project>,
    pub total: usize,
}

/// A project with its links and suggested next actions
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    #[serde(rename = "_links")]
    pub links: Links,
    #[serde(rename = "_actions")]
    pub actions: Vec<Action>,
}

/// Body for status changes on projects, fleet agents and ledger entries
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StatusRequest {
    pub status: Option<String>,
}

// ---- agents ----

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ProvisionRequest {
    pub name: Option<String>,
    pub role: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub mcps: Vec<String>,
    #[serde(default)]
    pub monthly_cost_usd: f64,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProvisionResponse {
    pub agent: Agent,
    pub message: String,
    pub n8n_triggered: bool,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AgentQuery {
    pub entity_id: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct AgentListResponse {
    pub agents: Vec<Agent>,
    pub total: usize,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct UpdateAgentRequest {
    pub skills: Option<Vec<String>>,
    pub mcps: Option<Vec<String>>,
    pub monthly_cost_usd: Option<f64>,
    pub openclaw_instance_id: Option<String>,
}

impl UpdateAgentRequest {
    pub fn is_empty(&self) -> bool {
        self.skills.is_none()
            && self.mcps.is_none()
            && self.monthly_cost_usd.is_none()
            && self.openclaw_instance_id.is_none()
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterAgentRequest {
    pub entity_id: Option<String>,
    pub agent_type: Option<String>,
    pub instance_url: Option<String>,
    pub name: Option<String>,
    pub owner_email: Option<String>,
}

/// A freshly registered agent with the only copy of its API key
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct RegisteredAgent {
    #[serde(flatten)]
    pub agent: Agent,
    pub api_key: String,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct ArchiveResponse {
    pub archived: bool,
    pub agent: Agent,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SpawnRequest {
    pub role: Option<String>,
    pub task: Option<String>,
    pub project_id: Option<String>,
    pub name: Option<String>,
}

// ---- fleet ----

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FleetQuery {
    pub entity_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct FleetResponse {
    pub agents: Vec<FleetAgent>,
    pub summary: FleetSummary,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct FleetAgentDetail {
    #[serde(flatten)]
    pub agent: Agent,
    pub entity_name: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct FleetDetailResponse {
    pub agent: FleetAgentDetail,
    pub recent_actions: Vec<LedgerEntry>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct HeartbeatResponse {
    pub id: Uuid,
    pub status: crate::store::AgentStatus,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

// ---- collaboration ----

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct CollaborationResponse {
    pub message: String,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SendMessageRequest {
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub content: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
    pub total: usize,
}

// ---- ledger ----

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecordLedgerRequest {
    pub entity_id: Option<String>,
    pub agent_id: Option<String>,
    pub action_type: Option<String>,
    pub amount: Option<f64>,
    pub notes: Option<String>,
    pub ai_recommendation: Option<JsonValue>,
    pub actor_id: Option<String>,
    pub recipient_id: Option<String>,
    pub payload: Option<JsonValue>,
    pub status: Option<String>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LedgerQuery {
    pub entity_id: Option<String>,
    pub agent_id: Option<String>,
    pub action_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct LedgerListResponse {
    pub entries: Vec<LedgerEntry>,
    pub total_count: i64,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LedgerSummaryQuery {
    pub entity_id: Option<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct VerifyResponse {
    pub id: Uuid,
    pub valid: bool,
    pub actor_valid: bool,
    pub recipient_valid: bool,
    pub auditor_valid: bool,
}

// ---- dashboard ----

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub directory: DirectoryCounts,
    pub fleet: FleetSummary,
    pub ledger: LedgerSummary,
    pub recent_events: Vec<SystemEvent>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct EventListResponse {
    pub events: Vec<SystemEvent>,
    pub total: usize,
}

/// Parse an optional UUID query parameter
pub fn parse_uuid_param(name: &str, value: Option<&str>) -> Result<Option<Uuid>, crate::error::ApiError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            Uuid::parse_str(v).map_err(|_| {
                crate::error::ApiError::InvalidQueryParam(format!(
                    "{} must be a UUID, got '{}'",
                    name, v
                ))
            })
        })
        .transpose()
}

/// Parse an optional enum query parameter
pub fn parse_enum_param<T: std::str::FromStr<Err = String>>(
    value: Option<&str>,
) -> Result<Option<T>, crate::error::ApiError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(crate::error::ApiError::InvalidQueryParam))
        .transpose()
}

/// Parse a UUID taken from the request path
pub fn parse_path_id(id_str: &str) -> Result<Uuid, crate::error::ApiError> {
    Uuid::parse_str(id_str).map_err(|_| crate::error::ApiError::InvalidUuid(id_str.to_string()))
}

/// Parse an optional UUID field from a request body; blank counts as absent
pub fn parse_body_id(value: Option<&str>) -> Result<Option<Uuid>, crate::error::ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(parse_path_id)
        .transpose()
}

/// Trimmed, non-empty text or `None`
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AgentStatus;

    #[test]
    fn test_linked_flattens_record() {
        let linked = Linked {
            data: serde_json::json!({"id": "x", "name": "Acme"}),
            links: links([("self", Link::get("/api/v1/organizations/x"))]),
        };
        let value = serde_json::to_value(&linked).unwrap();
        assert_eq!(value["name"], "Acme");
        assert_eq!(value["_links"]["self"]["href"], "/api/v1/organizations/x");
        assert_eq!(value["_links"]["self"]["method"], "GET");
    }

    #[test]
    fn test_query_param_parsing() {
        assert_eq!(parse_uuid_param("entity_id", None).unwrap(), None);
        assert_eq!(parse_uuid_param("entity_id", Some("")).unwrap(), None);
        assert!(parse_uuid_param("entity_id", Some("nope")).is_err());

        let status: Option<AgentStatus> = parse_enum_param(Some("idle")).unwrap();
        assert_eq!(status, Some(AgentStatus::Idle));
        assert!(parse_enum_param::<AgentStatus>(Some("asleep")).is_err());
    }

    #[test]
    fn test_body_id_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(parse_body_id(Some(&id.to_string())).unwrap(), Some(id));
        assert_eq!(parse_body_id(Some(" ")).unwrap(), None);
        assert!(matches!(
            parse_body_id(Some("org_123")),
            Err(crate::error::ApiError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  hi ")), Some("hi".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_empty_agent_patch() {
        assert!(UpdateAgentRequest::default().is_empty());
        let patch = UpdateAgentRequest {
            monthly_cost_usd: Some(0.0),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
