pub mod agents;
pub mod businesses;
pub mod collaboration;
pub mod dashboard;
pub mod events;
pub mod fleet;
pub mod health;
pub mod ledger;
pub mod organizations;
pub mod projects;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::AppState;
    use crate::store::memory::MemoryStore;
    use crate::store::{Agent, AgentStatus, Business, Organization, Project, ProjectStatus};
    use axum::{body::Body, http::Request, http::StatusCode, Router};
    use chrono::Utc;
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    pub fn app(state: &AppState) -> Router {
        crate::app::build_router(state.clone())
    }

    /// State plus a handle on its store for failure injection
    pub fn memory_state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AppState::with_store(store.clone()), store)
    }

    /// Send a request through the full router and decode the JSON body
    pub async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };

        let response = app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn seed_organization(state: &AppState) -> Organization {
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: "Genii Holdings".to_string(),
            owner_email: Some("owner@example.com".to_string()),
            description: None,
            created_at: now,
            updated_at: now,
        };
        state.store.insert_organization(&org).await.unwrap();
        org
    }

    pub async fn seed_business(state: &AppState) -> Business {
        let org = seed_organization(state).await;
        let now = Utc::now();
        let business = Business {
            id: Uuid::new_v4(),
            organization_id: org.id,
            name: "Sunrise Bakery".to_string(),
            industry: Some("food".to_string()),
            description: None,
            settings: json!({}),
            created_at: now,
            updated_at: now,
        };
        state.store.insert_business(&business).await.unwrap();
        business
    }

    pub async fn seed_project(state: &AppState, business_id: Uuid) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            business_id,
            name: "Spring launch".to_string(),
            description: None,
            status: ProjectStatus::Active,
            settings: json!({}),
            created_at: now,
            updated_at: now,
        };
        state.store.insert_project(&project).await.unwrap();
        project
    }

    pub async fn seed_agent(state: &AppState, entity_id: Uuid, status: AgentStatus) -> Agent {
        let agent = Agent {
            id: Uuid::new_v4(),
            name: "Victoria".to_string(),
            role: "CFO".to_string(),
            entity_id,
            parent_agent_id: None,
            project_id: None,
            task: None,
            skills: vec!["budgeting".to_string()],
            mcps: vec![],
            status,
            monthly_cost_usd: 49.0,
            openclaw_instance_id: None,
            instance_url: None,
            api_key_hash: None,
            last_heartbeat: None,
            created_at: Utc::now(),
        };
        state.store.insert_agent(&agent, None).await.unwrap();
        agent
    }
}
