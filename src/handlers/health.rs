use crate::error::{HealthResponse, UnhealthyResponse};
use crate::models::{links, Link, RootResponse};
use crate::routes;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{SecondsFormat, Utc};

/// GET /health handler - Health check endpoint
///
/// Runs a round trip against the store. Returns 200 OK if the database is
/// reachable, 503 Service Unavailable otherwise.
#[utoipa::path(
    get,
    path = routes::HEALTH,
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = UnhealthyResponse)
    ),
    tag = "health"
)]
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthResponse>), (StatusCode, Json<UnhealthyResponse>)> {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            Ok((
                StatusCode::OK,
                Json(HealthResponse {
                    status: "healthy".to_string(),
                    timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                }),
            ))
        }
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(UnhealthyResponse {
                    status: "unhealthy".to_string(),
                    error: format!("Cannot connect to database: {}", e),
                }),
            ))
        }
    }
}

/// GET / handler - API discovery
#[utoipa::path(
    get,
    path = routes::ROOT,
    responses(
        (status = 200, description = "Service description with links to every collection", body = RootResponse)
    ),
    tag = "health"
)]
pub async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        name: "Genii ERP API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "AI-native ERP with a federated agent fleet and triple-entry ledger"
            .to_string(),
        links: links([
            ("health", Link::get(routes::HEALTH)),
            ("organizations", Link::get(routes::ORGANIZATIONS)),
            ("businesses", Link::get(routes::BUSINESSES)),
            ("projects", Link::get(routes::PROJECTS)),
            ("agents", Link::get(routes::AGENTS)),
            ("fleet", Link::get(routes::FLEET)),
            ("collaboration", Link::get(routes::COLLABORATION)),
            ("ledger", Link::get(routes::LEDGER)),
            ("dashboard", Link::get(routes::DASHBOARD)),
            ("events", Link::get(routes::EVENTS)),
            ("docs", Link::get(routes::SWAGGER_UI)),
        ]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory::MemoryStore, Store};
    use axum::{body::Body, http::Request, routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(store: Arc<dyn Store>) -> Router {
        let state = AppState::with_store(store);
        Router::new()
            .route(routes::HEALTH, get(health_handler))
            .route(routes::ROOT, get(root_handler))
            .with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint_healthy() {
        let (status, body) = get_json(app(Arc::new(MemoryStore::new())), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let response: HealthResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.status, "healthy");
        assert!(chrono::DateTime::parse_from_rfc3339(&response.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_health_endpoint_unhealthy() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let (status, body) = get_json(app(Arc::new(store)), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let response: UnhealthyResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.status, "unhealthy");
        assert!(response.error.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_root_links_every_collection() {
        let (status, body) = get_json(app(Arc::new(MemoryStore::new())), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Genii ERP API");
        assert_eq!(body["_links"]["fleet"]["href"], "/api/fleet");
        assert_eq!(body["_links"]["ledger"]["method"], "GET");
        assert_eq!(body["_links"]["organizations"]["href"], "/api/v1/organizations");
    }
}
