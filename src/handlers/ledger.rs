use crate::error::{ApiError, ErrorResponse};
use crate::events::channel;
use crate::models::{
    non_blank, parse_body_id, parse_enum_param, parse_path_id, parse_uuid_param,
    LedgerListResponse, LedgerQuery, LedgerSummaryQuery, RecordLedgerRequest, StatusRequest,
    VerifyResponse,
};
use crate::routes;
use crate::state::AppState;
use crate::store::{
    guard, Edit, LedgerActionType, LedgerEntry, LedgerFilter, LedgerStatus, LedgerSummary,
    Severity, SystemEvent, WriteConflict,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// POST /api/ledger handler - Record a signed ledger entry
///
/// When no payload is supplied, the entry's own financial fields are signed.
#[utoipa::path(
    post,
    path = routes::LEDGER,
    request_body = RecordLedgerRequest,
    responses(
        (status = 201, description = "Entry recorded and signed", body = LedgerEntry),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 404, description = "Entity or agent not found", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn record_entry_handler(
    State(state): State<AppState>,
    Json(req): Json<RecordLedgerRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), ApiError> {
    let entity_id = parse_body_id(req.entity_id.as_deref())?;
    let actor_id = non_blank(req.actor_id.as_deref());
    let recipient_id = non_blank(req.recipient_id.as_deref());
    let (Some(entity_id), Some(action_type), Some(actor_id), Some(recipient_id)) =
        (entity_id, req.action_type.as_deref(), actor_id, recipient_id)
    else {
        return Err(ApiError::Validation(
            "entity_id, action_type, actor_id, and recipient_id are required".to_string(),
        ));
    };
    let action_type = action_type
        .parse::<LedgerActionType>()
        .map_err(ApiError::Validation)?;
    let agent_id = parse_body_id(req.agent_id.as_deref())?;

    let status = match req.status.as_deref() {
        None => LedgerStatus::Pending,
        Some(s) => match s.parse::<LedgerStatus>().map_err(ApiError::Validation)? {
            LedgerStatus::Void => {
                return Err(ApiError::Validation(
                    "status must be pending or posted when recording".to_string(),
                ));
            }
            other => other,
        },
    };

    if let Some(amount) = req.amount {
        if !amount.is_finite() {
            return Err(ApiError::Validation("amount must be a finite number".to_string()));
        }
    }
    if action_type.requires_amount() && req.amount.is_none_or(|a| a <= 0.0) {
        return Err(ApiError::Validation(format!(
            "amount must be greater than 0 for {} entries",
            action_type
        )));
    }

    if state.store.get_business(entity_id).await?.is_none() {
        return Err(ApiError::not_found("Business", entity_id));
    }
    if let Some(agent_id) = agent_id {
        if state.store.get_agent(agent_id).await?.is_none() {
            return Err(ApiError::not_found("Agent", agent_id));
        }
    }

    let payload = req.payload.unwrap_or_else(|| {
        json!({
            "action_type": action_type,
            "amount": req.amount,
            "entity_id": entity_id,
            "agent_id": agent_id,
        })
    });
    let sigs = state.signer.sign_entry(&payload, &actor_id, &recipient_id);

    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        entity_id,
        agent_id,
        action_type,
        amount: req.amount,
        status,
        notes: non_blank(req.notes.as_deref()),
        ai_recommendation: req.ai_recommendation,
        actor_id,
        recipient_id,
        payload,
        actor_sig: sigs.actor_sig,
        recipient_sig: sigs.recipient_sig,
        auditor_sig: sigs.auditor_sig,
        created_at: Utc::now(),
    };
    state.store.insert_ledger_entry(&entry).await?;
    state.bus.publish(channel::LEDGER_RECORDED, &entry);

    tracing::info!(
        "Recorded {} ledger entry {} for entity {} ({})",
        entry.action_type,
        entry.id,
        entity_id,
        entry.status
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/ledger handler - Filtered, paginated entries, newest first
#[utoipa::path(
    get,
    path = routes::LEDGER,
    params(LedgerQuery),
    responses(
        (status = 200, description = "Ledger entries", body = LedgerListResponse),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn list_entries_handler(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<(StatusCode, Json<LedgerListResponse>), ApiError> {
    let filter = LedgerFilter {
        entity_id: parse_uuid_param("entity_id", query.entity_id.as_deref())?,
        agent_id: parse_uuid_param("agent_id", query.agent_id.as_deref())?,
        action_type: parse_enum_param(query.action_type.as_deref())?,
        status: parse_enum_param(query.status.as_deref())?,
        limit: query.limit.map(|l| l as i64),
        offset: query.offset.unwrap_or(0) as i64,
    };

    let page = state.store.list_ledger_entries(&filter).await?;

    tracing::info!(
        "Listed {} ledger entries (total: {})",
        page.entries.len(),
        page.total_count
    );
    Ok((
        StatusCode::OK,
        Json(LedgerListResponse {
            entries: page.entries,
            total_count: page.total_count,
        }),
    ))
}

async fn load_entry(state: &AppState, id_str: &str) -> Result<LedgerEntry, ApiError> {
    let id = parse_path_id(id_str)?;
    state
        .store
        .get_ledger_entry(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Ledger entry", id))
}

/// GET /api/ledger/{id} handler
#[utoipa::path(
    get,
    path = routes::LEDGER_ENTRY,
    params(
        ("id" = String, Path, description = "Ledger entry UUID")
    ),
    responses(
        (status = 200, description = "Ledger entry", body = LedgerEntry),
        (status = 400, description = "Invalid UUID format", body = ErrorResponse),
        (status = 404, description = "Entry not found", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn get_entry_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<LedgerEntry>), ApiError> {
    let entry = load_entry(&state, &id_str).await?;
    Ok((StatusCode::OK, Json(entry)))
}

/// GET /api/ledger/{id}/verify handler - Recompute all three signatures
#[utoipa::path(
    get,
    path = routes::LEDGER_VERIFY,
    params(
        ("id" = String, Path, description = "Ledger entry UUID")
    ),
    responses(
        (status = 200, description = "Verification result", body = VerifyResponse),
        (status = 404, description = "Entry not found", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn verify_entry_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<VerifyResponse>), ApiError> {
    let entry = load_entry(&state, &id_str).await?;
    let verification = state.signer.verify(&entry);

    if !verification.is_valid() {
        tracing::warn!("Ledger entry {} failed verification: {:?}", entry.id, verification);
    }
    Ok((
        StatusCode::OK,
        Json(VerifyResponse {
            id: entry.id,
            valid: verification.is_valid(),
            actor_valid: verification.actor_valid,
            recipient_valid: verification.recipient_valid,
            auditor_valid: verification.auditor_valid,
        }),
    ))
}

/// PATCH /api/ledger/{id}/status handler - Post or void an entry
#[utoipa::path(
    patch,
    path = routes::LEDGER_STATUS,
    params(
        ("id" = String, Path, description = "Ledger entry UUID")
    ),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status updated", body = LedgerEntry),
        (status = 400, description = "Invalid status", body = ErrorResponse),
        (status = 404, description = "Entry not found", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn update_entry_status_handler(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), ApiError> {
    let next = req
        .status
        .as_deref()
        .ok_or_else(|| ApiError::Validation("status is required".to_string()))?
        .parse::<LedgerStatus>()
        .map_err(ApiError::Validation)?;
    let id = parse_path_id(&id_str)?;

    // The transition rule is checked against the stored row inside the write
    let transition = guard(move |current: &LedgerEntry| {
        let previous = current.status;
        if !previous.can_transition_to(next) {
            return Err(WriteConflict(format!(
                "Ledger entry {} cannot move from {} to {}",
                current.id, previous, next
            ))
            .into());
        }
        let event = (next == LedgerStatus::Void).then(|| {
            SystemEvent::new(
                "ledger_void",
                Some(current.entity_id),
                current.agent_id,
                json!({
                    "ledger_entry_id": current.id,
                    "previous_status": previous,
                    "amount": current.amount,
                }),
                Severity::Warning,
            )
        });
        let mut row = current.clone();
        row.status = next;
        Ok(Edit::Write { row, event })
    });
    let updated = state
        .store
        .modify_ledger_entry(id, transition)
        .await?
        .ok_or_else(|| ApiError::not_found("Ledger entry", id))?;

    let previous = updated.previous.status;
    let entry = updated.current;
    state.bus.publish(
        channel::LEDGER_STATUS,
        &json!({"id": entry.id, "status": next, "previous_status": previous}),
    );

    tracing::info!("Ledger entry {} {} -> {}", entry.id, previous, next);
    Ok((StatusCode::OK, Json(entry)))
}

/// GET /api/ledger/summary handler - Posted totals and pending count
#[utoipa::path(
    get,
    path = routes::LEDGER_SUMMARY,
    params(LedgerSummaryQuery),
    responses(
        (status = 200, description = "Ledger totals", body = LedgerSummary),
        (status = 400, description = "Invalid query parameter", body = ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn summary_handler(
    State(state): State<AppState>,
    Query(query): Query<LedgerSummaryQuery>,
) -> Result<(StatusCode, Json<LedgerSummary>), ApiError> {
    let entity_id = parse_uuid_param("entity_id", query.entity_id.as_deref())?;
    let summary = state.store.ledger_summary(entity_id).await?;
    Ok((StatusCode::OK, Json(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{memory_state, seed_agent, seed_business, send};
    use crate::store::AgentStatus;
    use serde_json::Value as JsonValue;

    async fn record(state: &AppState, body: JsonValue) -> (StatusCode, JsonValue) {
        send(state, "POST", "/api/ledger", Some(body)).await
    }

    fn expense(entity_id: Uuid, amount: f64) -> JsonValue {
        json!({
            "entity_id": entity_id,
            "action_type": "expense",
            "amount": amount,
            "actor_id": "MKT_PA_001",
            "recipient_id": "META_ADS_API",
            "payload": {"campaign": "spring", "budget": amount}
        })
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let mut rx = state.bus.subscribe();

        let (status, body) = record(&state, expense(business.id, 250.0)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["actor_sig"].as_str().unwrap().len(), 64);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, channel::LEDGER_RECORDED);

        let id = body["id"].as_str().unwrap();
        let (status, body) = send(&state, "GET", &format!("/api/ledger/{}/verify", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["auditor_valid"], true);
    }

    #[tokio::test]
    async fn test_tampered_entry_fails_verification() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let (_, body) = record(&state, expense(business.id, 250.0)).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

        // Rewrite the stored payload behind the ledger's back
        let mut entry = state.store.get_ledger_entry(id).await.unwrap().unwrap();
        entry.payload = json!({"campaign": "spring", "budget": 9999});
        let tampered = LedgerEntry { id: Uuid::new_v4(), ..entry };
        state.store.insert_ledger_entry(&tampered).await.unwrap();

        let (_, body) = send(&state, "GET", &format!("/api/ledger/{}/verify", tampered.id), None).await;
        assert_eq!(body["valid"], false);
        assert_eq!(body["actor_valid"], false);
        assert_eq!(body["recipient_valid"], false);
    }

    #[tokio::test]
    async fn test_record_validation() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;

        let (status, body) = record(&state, expense(business.id, 0.0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "amount must be greater than 0 for expense entries");

        let mut no_actor = expense(business.id, 10.0);
        no_actor["actor_id"] = json!("   ");
        let (status, _) = record(&state, no_actor).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut bad_type = expense(business.id, 10.0);
        bad_type["action_type"] = json!("bribe");
        let (status, body) = record(&state, bad_type).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("expense, revenue, transfer"));

        let mut void = expense(business.id, 10.0);
        void["status"] = json!("void");
        let (status, _) = record(&state, void).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = record(&state, expense(Uuid::new_v4(), 10.0)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut unknown_agent = expense(business.id, 10.0);
        unknown_agent["agent_id"] = json!(Uuid::new_v4());
        let (status, body) = record(&state, unknown_agent).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().starts_with("Agent not found"));

        // Adjustments carry no amount
        let (status, body) = record(
            &state,
            json!({
                "entity_id": business.id,
                "action_type": "adjustment",
                "actor_id": "FIN_AC_001",
                "recipient_id": "BOOKS"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["payload"]["action_type"], "adjustment");
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let (_, body) = record(&state, expense(business.id, 40.0)).await;
        let uri = format!("/api/ledger/{}/status", body["id"].as_str().unwrap());

        let (status, body) = send(&state, "PATCH", &uri, Some(json!({"status": "posted"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "posted");
        assert!(state.store.list_system_events(10).await.unwrap().is_empty());

        let (status, _) = send(&state, "PATCH", &uri, Some(json!({"status": "pending"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&state, "PATCH", &uri, Some(json!({"status": "void"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "void");

        let events = state.store.list_system_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ledger_void");
        assert_eq!(events[0].severity, Severity::Warning);

        let (status, _) = send(&state, "PATCH", &uri, Some(json!({"status": "posted"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let agent = seed_agent(&state, business.id, AgentStatus::Active).await;

        for amount in [10.0, 20.0, 30.0] {
            let mut body = expense(business.id, amount);
            body["agent_id"] = json!(agent.id);
            record(&state, body).await;
        }
        let mut revenue = expense(business.id, 500.0);
        revenue["action_type"] = json!("revenue");
        revenue["status"] = json!("posted");
        record(&state, revenue).await;

        let (_, body) = send(&state, "GET", "/api/ledger?action_type=expense&limit=2", None).await;
        assert_eq!(body["total_count"], 3);
        assert_eq!(body["entries"].as_array().unwrap().len(), 2);
        assert_eq!(body["entries"][0]["amount"], 30.0);

        let (_, body) = send(&state, "GET", "/api/ledger?action_type=expense&limit=2&offset=2", None).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
        assert_eq!(body["entries"][0]["amount"], 10.0);

        let (_, body) = send(&state, "GET", &format!("/api/ledger?agent_id={}", agent.id), None).await;
        assert_eq!(body["total_count"], 3);

        let (_, body) = send(&state, "GET", "/api/ledger?status=posted", None).await;
        assert_eq!(body["total_count"], 1);

        let (status, _) = send(&state, "GET", "/api/ledger?status=settled", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summary() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let other = seed_business(&state).await;

        let (_, body) = record(&state, expense(business.id, 40.0)).await;
        let uri = format!("/api/ledger/{}/status", body["id"].as_str().unwrap());
        send(&state, "PATCH", &uri, Some(json!({"status": "posted"}))).await;

        let mut revenue = expense(business.id, 100.0);
        revenue["action_type"] = json!("revenue");
        revenue["status"] = json!("posted");
        record(&state, revenue).await;
        record(&state, expense(business.id, 7.0)).await;
        record(&state, expense(other.id, 1000.0)).await;

        let (status, body) = send(
            &state,
            "GET",
            &format!("/api/ledger/summary?entity_id={}", business.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["posted_expense"], 40.0);
        assert_eq!(body["posted_revenue"], 100.0);
        assert_eq!(body["net"], 60.0);
        assert_eq!(body["pending_count"], 1);
        assert_eq!(body["entry_count"], 3);

        let (_, body) = send(&state, "GET", "/api/ledger/summary", None).await;
        assert_eq!(body["entry_count"], 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_void_is_never_overwritten() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;

        for _ in 0..100 {
            let (_, body) = record(&state, expense(business.id, 12.0)).await;
            let id = body["id"].as_str().unwrap().to_string();
            let uri = format!("/api/ledger/{}/status", id);

            let void = tokio::spawn({
                let state = state.clone();
                let uri = uri.clone();
                async move { send(&state, "PATCH", &uri, Some(json!({"status": "void"}))).await }
            });
            let post = tokio::spawn({
                let state = state.clone();
                let uri = uri.clone();
                async move { send(&state, "PATCH", &uri, Some(json!({"status": "posted"}))).await }
            });
            let (void_status, _) = void.await.unwrap();
            let (post_status, _) = post.await.unwrap();

            assert_eq!(void_status, StatusCode::OK);
            let stored = state
                .store
                .get_ledger_entry(id.parse().unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.status, LedgerStatus::Void);
            // posted can only win if it committed before the void
            assert!(post_status == StatusCode::OK || post_status == StatusCode::CONFLICT);
        }
    }

    #[tokio::test]
    async fn test_record_accepts_long_party_ids() {
        let state = AppState::for_tests();
        let business = seed_business(&state).await;
        let mut body = expense(business.id, 5.0);
        body["actor_id"] = json!("A".repeat(101));
        body["recipient_id"] = json!("R".repeat(300));

        let (status, body) = record(&state, body).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap();
        let (_, body) = send(&state, "GET", &format!("/api/ledger/{}/verify", id), None).await;
        assert_eq!(body["valid"], true);
    }

    #[tokio::test]
    async fn test_failed_record_publishes_nothing() {
        let (state, store) = memory_state();
        let business = seed_business(&state).await;
        let mut rx = state.bus.subscribe();
        store.set_fail_writes(true);

        let (status, _) = record(&state, expense(business.id, 25.0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rx.try_recv().is_err());

        store.set_fail_writes(false);
        let page = state.store.list_ledger_entries(&LedgerFilter::default()).await.unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_failed_status_change_publishes_nothing() {
        let (state, store) = memory_state();
        let business = seed_business(&state).await;
        let (_, body) = record(&state, expense(business.id, 25.0)).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let mut rx = state.bus.subscribe();
        store.set_fail_writes(true);

        let (status, _) = send(
            &state,
            "PATCH",
            &format!("/api/ledger/{}/status", id),
            Some(json!({"status": "void"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rx.try_recv().is_err());

        store.set_fail_writes(false);
        let entry = state.store.get_ledger_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Pending);
        assert!(state.store.list_system_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_change_on_missing_entry() {
        let state = AppState::for_tests();
        let (status, _) = send(
            &state,
            "PATCH",
            &format!("/api/ledger/{}/status", Uuid::new_v4()),
            Some(json!({"status": "posted"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_missing_entry() {
        let state = AppState::for_tests();
        let (status, body) = send(&state, "GET", &format!("/api/ledger/{}", Uuid::nil()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().starts_with("Ledger entry not found"));
    }
}
