// Route path constants - single source of truth for all API paths

pub const ROOT: &str = "/";
pub const HEALTH: &str = "/health";

pub const ORGANIZATIONS: &str = "/api/v1/organizations";
pub const ORGANIZATION: &str = "/api/v1/organizations/{id}";
pub const ORGANIZATION_BUSINESSES: &str = "/api/v1/organizations/{id}/businesses";
pub const BUSINESSES: &str = "/api/v1/businesses";
pub const BUSINESS: &str = "/api/v1/businesses/{id}";
pub const BUSINESS_PROJECTS: &str = "/api/v1/businesses/{id}/projects";
pub const PROJECTS: &str = "/api/v1/projects";
pub const PROJECT: &str = "/api/v1/projects/{id}";
pub const PROJECT_STATUS: &str = "/api/v1/projects/{id}/status";
pub const PROJECT_MESSAGES: &str = "/api/v1/projects/{id}/messages";

pub const AGENTS: &str = "/api/agents";
pub const AGENT_PROVISION: &str = "/api/agents/provision";
pub const AGENT: &str = "/api/agents/{id}";
pub const AGENTS_V1: &str = "/api/v1/agents";
pub const AGENT_REGISTER: &str = "/api/v1/agents/register";
pub const AGENT_SPAWN: &str = "/api/v1/agents/{id}/spawn";

pub const FLEET: &str = "/api/fleet";
pub const FLEET_AGENT: &str = "/api/fleet/{id}";
pub const FLEET_STATUS: &str = "/api/fleet/{id}/status";
pub const FLEET_HEARTBEAT: &str = "/api/fleet/{id}/heartbeat";

pub const COLLABORATION: &str = "/api/v1/collaboration";
pub const COLLABORATION_MESSAGE: &str = "/api/v1/collaboration/message";

pub const LEDGER: &str = "/api/ledger";
pub const LEDGER_SUMMARY: &str = "/api/ledger/summary";
pub const LEDGER_ENTRY: &str = "/api/ledger/{id}";
pub const LEDGER_VERIFY: &str = "/api/ledger/{id}/verify";
pub const LEDGER_STATUS: &str = "/api/ledger/{id}/status";

pub const DASHBOARD: &str = "/api/dashboard";
pub const DASHBOARD_EVENTS: &str = "/api/dashboard/events";
pub const EVENTS: &str = "/api/events";

pub const SWAGGER_UI: &str = "/swagger-ui";
pub const OPENAPI_JSON: &str = "/api-docs/openapi.json";

/// Fill the `{id}` placeholder of a route template
pub fn with_id(template: &str, id: impl std::fmt::Display) -> String {
    template.replace("{id}", &id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_id() {
        assert_eq!(with_id(AGENT_SPAWN, "abc"), "/api/v1/agents/abc/spawn");
        assert_eq!(with_id(LEDGER, "abc"), "/api/ledger");
    }
}
