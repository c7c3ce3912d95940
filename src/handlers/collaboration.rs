use crate::error::{ApiError, ErrorResponse};
use crate::events::channel;
use crate::models::{
    links, non_blank, parse_body_id, parse_path_id, CollaborationResponse, Link, Linked,
    MessageListResponse, SendMessageRequest,
};
use crate::routes;
use crate::state::AppState;
use crate::store::Message;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

/// GET /api/v1/collaboration handler
#[utoipa::path(
    get,
    path = routes::COLLABORATION,
    responses(
        (status = 200, description = "Collaboration entry point", body = CollaborationResponse)
    ),
    tag = "collaboration"
)]
pub async fn collaboration_handler() -> Json<CollaborationResponse> {
    Json(CollaborationResponse {
        message: "Agents on a shared project exchange messages here".to_string(),
        links: links([("send_message", Link::post(routes::COLLABORATION_MESSAGE))]),
    })
}

/// POST /api/v1/collaboration/message handler - Agent to agent message
#[utoipa::path(
    post,
    path = routes::COLLABORATION_MESSAGE,
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = Linked<Message>),
        (status = 400, description = "Missing fields or blank content", body = ErrorResponse),
        (status = 404, description = "Project or agent not found", body = ErrorResponse)
    ),
    tag = "collaboration"
)]
pub async fn send_message_handler(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Linked<Message>>), ApiError> {
    let from_agent = parse_body_id(req.from_agent.as_deref())?;
    let to_agent = parse_body_id(req.to_agent.as_deref())?;
    let project_id = parse_body_id(req.project_id.as_deref())?;
    let (Some(from_agent), Some(to_agent), Some(project_id)) = (from_agent, to_agent, project_id)
    else {
        return Err(ApiError::Validation(
            "from_agent, to_agent, and project_id are required".to_string(),
        ));
    };
    let content = non_blank(req.content.as_deref())
        .ok_or_else(|| ApiError::Validation("content must not be empty".to_string()))?;

    if state.store.get_project(project_id).await?.is_none() {
        return Err(ApiError::not_found("Project", project_id));
    }
    for agent_id in [from_agent, to_agent] {
        if state.store.get_agent(agent_id).await?.is_none() {
            return Err(ApiError::not_found("Agent", agent_id));
        }
    }

    let message = Message {
        id: Uuid::new_v4(),
        project_id,
        from_agent,
        to_agent,
        content,
        sent_at: Utc::now(),
    };
    state.store.insert_message(&message).await?;
    state.bus.publish(channel::COLLABORATION_MESSAGE, &message);

    tracing::info!(
        "Message {} from {} to {} on project {}",
        message.id,
        from_agent,
        to_agent,
        project_id
    );
    Ok((
        StatusCode::CREATED,
        Json(Linked {
            links: links([("reply", Link::post(routes::COLLABORATION_MESSAGE))]),
            data: message,
        }),
    ))
}

/// GET /api/v1/projects/{id}/messages handler - Project thread, oldest first
#[utoipa::path(
    get,
    path = routes::PROJECT_MESSAGES,
    params(
        ("id" = String, Path, description = "Project UUID")
    ),
    responses(
        (status = 200, description = "Messages on the project", body = MessageListResponse),
        (status = 404, description = "Project not found", body = ErrorResponse)
    ),
    tag = "collaboration"
)]
pub async fn project_messages_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<MessageListResponse>), ApiError> {
    let id = parse_path_id(&id_str)?;
    if state.store.get_project(id).await?.is_none() {
        return Err(ApiError::not_found("Project", id));
    }

    let messages = state.store.list_messages(id).await?;
    Ok((
        StatusCode::OK,
        Json(MessageListResponse {
            total: messages.len(),
            messages,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{seed_agent, seed_business, seed_project, send};
    use crate::store::AgentStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_collaboration_links() {
        let state = AppState::for_tests();
        let (status, body) = send(&state, "GET", "/api/v1/collaboration", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["_links"]["send_message"]["href"],
            "/api/v1/collaboration/message"
        );
    }

    #[tokio::test]
    async fn test_message_thread() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let project = seed_project(&state, business.id).await;
        let a = seed_agent(&state, business.id, AgentStatus::Active).await;
        let b = seed_agent(&state, business.id, AgentStatus::Active).await;
        let mut rx = state.bus.subscribe();

        for (from, to, content) in [(a.id, b.id, "draft ready"), (b.id, a.id, "looks good")] {
            let (status, body) = send(
                &state,
                "POST",
                "/api/v1/collaboration/message",
                Some(json!({
                    "from_agent": from,
                    "to_agent": to,
                    "content": content,
                    "project_id": project.id
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["_links"]["reply"]["method"], "POST");
        }

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, channel::COLLABORATION_MESSAGE);
        assert_eq!(msg.payload["content"], "draft ready");

        let (status, body) = send(
            &state,
            "GET",
            &format!("/api/v1/projects/{}/messages", project.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["messages"][0]["content"], "draft ready");
        assert_eq!(body["messages"][1]["content"], "looks good");
    }

    #[tokio::test]
    async fn test_message_validation() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let project = seed_project(&state, business.id).await;
        let a = seed_agent(&state, business.id, AgentStatus::Active).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/collaboration/message",
            Some(json!({"from_agent": a.id, "to_agent": a.id, "content": "  ", "project_id": project.id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "content must not be empty");

        let stranger = Uuid::new_v4();
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/collaboration/message",
            Some(json!({"from_agent": a.id, "to_agent": stranger, "content": "hi", "project_id": project.id})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], format!("Agent not found: {}", stranger));

        let (status, _) = send(
            &state,
            "GET",
            &format!("/api/v1/projects/{}/messages", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
