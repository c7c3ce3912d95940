use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gcloud_gax::grpc::{Code, Status};
use gcloud_gax::retry::TryAs;
use gcloud_googleapis::spanner::admin::database::v1::{
    CreateDatabaseRequest, GetDatabaseDdlRequest, GetDatabaseRequest, UpdateDatabaseDdlRequest,
};
use gcloud_googleapis::spanner::admin::instance::v1::{
    CreateInstanceRequest, GetInstanceRequest, Instance,
};
use gcloud_googleapis::spanner::v1::Mutation;
use gcloud_spanner::admin::client::Client as AdminClient;
use gcloud_spanner::admin::AdminClientConfig;
use gcloud_spanner::client::{Client, ClientConfig, Error as SpannerError};
use gcloud_spanner::mutation::{insert, update};
use gcloud_spanner::row::Row;
use gcloud_spanner::session::SessionError;
use gcloud_spanner::statement::{Statement, ToKind};
use gcloud_spanner::transaction_rw::CommitResult;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    Agent, AgentFilter, Business, DirectoryCounts, Edit, FleetAgent, FleetSummary, Guard,
    LedgerEntry, LedgerFilter, LedgerPage, LedgerSummary, Message, Organization, Project, Store,
    SystemEvent, Updated,
};
use crate::config::SpannerSettings;

type MutationFn = fn(&str, &[&str], &[&dyn ToKind]) -> Mutation;

/// Tables and indexes the service needs, in creation order
const SCHEMA: &[(&str, &str)] = &[
    (
        "organizations",
        r#"CREATE TABLE organizations (
    id STRING(36) NOT NULL,
    name STRING(MAX) NOT NULL,
    owner_email STRING(MAX),
    description STRING(MAX),
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "businesses",
        r#"CREATE TABLE businesses (
    id STRING(36) NOT NULL,
    organization_id STRING(36) NOT NULL,
    name STRING(MAX) NOT NULL,
    industry STRING(MAX),
    description STRING(MAX),
    settings JSON NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "projects",
        r#"CREATE TABLE projects (
    id STRING(36) NOT NULL,
    business_id STRING(36) NOT NULL,
    name STRING(MAX) NOT NULL,
    description STRING(MAX),
    status STRING(16) NOT NULL,
    settings JSON NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "agents",
        r#"CREATE TABLE agents (
    id STRING(36) NOT NULL,
    name STRING(MAX) NOT NULL,
    role STRING(MAX) NOT NULL,
    entity_id STRING(36) NOT NULL,
    parent_agent_id STRING(36),
    project_id STRING(36),
    task STRING(MAX),
    skills JSON NOT NULL,
    mcps JSON NOT NULL,
    status STRING(16) NOT NULL,
    monthly_cost_usd FLOAT64 NOT NULL,
    openclaw_instance_id STRING(MAX),
    instance_url STRING(MAX),
    api_key_hash STRING(64),
    last_heartbeat TIMESTAMP,
    created_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "ledger_entries",
        r#"CREATE TABLE ledger_entries (
    id STRING(36) NOT NULL,
    entity_id STRING(36) NOT NULL,
    agent_id STRING(36),
    action_type STRING(16) NOT NULL,
    amount FLOAT64,
    status STRING(16) NOT NULL,
    notes STRING(MAX),
    ai_recommendation JSON,
    actor_id STRING(MAX) NOT NULL,
    recipient_id STRING(MAX) NOT NULL,
    payload STRING(MAX) NOT NULL,
    actor_sig STRING(64) NOT NULL,
    recipient_sig STRING(64) NOT NULL,
    auditor_sig STRING(64) NOT NULL,
    created_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "ledger_entries_by_agent",
        "CREATE INDEX ledger_entries_by_agent ON ledger_entries(agent_id)",
    ),
    (
        "messages",
        r#"CREATE TABLE messages (
    id STRING(36) NOT NULL,
    project_id STRING(36) NOT NULL,
    from_agent STRING(36) NOT NULL,
    to_agent STRING(36) NOT NULL,
    content STRING(MAX) NOT NULL,
    sent_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
    (
        "system_events",
        r#"CREATE TABLE system_events (
    id STRING(36) NOT NULL,
    event_type STRING(64) NOT NULL,
    entity_id STRING(36),
    agent_id STRING(36),
    payload JSON NOT NULL,
    severity STRING(16) NOT NULL,
    created_at TIMESTAMP NOT NULL,
) PRIMARY KEY (id)"#,
    ),
];

const ORGANIZATION_COLUMNS: &[&str] =
    &["id", "name", "owner_email", "description", "created_at", "updated_at"];
const BUSINESS_COLUMNS: &[&str] = &[
    "id", "organization_id", "name", "industry", "description", "settings", "created_at", "updated_at",
];
const PROJECT_COLUMNS: &[&str] = &[
    "id", "business_id", "name", "description", "status", "settings", "created_at", "updated_at",
];
const AGENT_COLUMNS: &[&str] = &[
    "id", "name", "role", "entity_id", "parent_agent_id", "project_id", "task", "skills", "mcps",
    "status", "monthly_cost_usd", "openclaw_instance_id", "instance_url", "api_key_hash",
    "last_heartbeat", "created_at",
];
const LEDGER_COLUMNS: &[&str] = &[
    "id", "entity_id", "agent_id", "action_type", "amount", "status", "notes", "ai_recommendation",
    "actor_id", "recipient_id", "payload", "actor_sig", "recipient_sig", "auditor_sig", "created_at",
];
const MESSAGE_COLUMNS: &[&str] = &["id", "project_id", "from_agent", "to_agent", "content", "sent_at"];
const EVENT_COLUMNS: &[&str] =
    &["id", "event_type", "entity_id", "agent_id", "payload", "severity", "created_at"];

fn select_list(alias: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Timestamps are written as RFC 3339 strings, which Spanner accepts for
/// TIMESTAMP columns in mutations
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Failed to parse timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid UUID stored in database: '{}'", value))
}

fn parse_json(value: &str) -> Result<JsonValue> {
    serde_json::from_str(value).context("Failed to deserialize JSON data")
}

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(anyhow::Error::msg)
}

fn opt_uuid(row: &Row, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.column_by_name(column)?;
    value.as_deref().map(parse_uuid).transpose()
}

fn decode_organization(row: &Row) -> Result<Organization> {
    Ok(Organization {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        name: row.column_by_name("name")?,
        owner_email: row.column_by_name("owner_email")?,
        description: row.column_by_name("description")?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
        updated_at: parse_ts(&row.column_by_name::<String>("updated_at")?)?,
    })
}

fn decode_business(row: &Row) -> Result<Business> {
    Ok(Business {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        organization_id: parse_uuid(&row.column_by_name::<String>("organization_id")?)?,
        name: row.column_by_name("name")?,
        industry: row.column_by_name("industry")?,
        description: row.column_by_name("description")?,
        settings: parse_json(&row.column_by_name::<String>("settings")?)?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
        updated_at: parse_ts(&row.column_by_name::<String>("updated_at")?)?,
    })
}

fn decode_project(row: &Row) -> Result<Project> {
    Ok(Project {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        business_id: parse_uuid(&row.column_by_name::<String>("business_id")?)?,
        name: row.column_by_name("name")?,
        description: row.column_by_name("description")?,
        status: parse_enum(&row.column_by_name::<String>("status")?)?,
        settings: parse_json(&row.column_by_name::<String>("settings")?)?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
        updated_at: parse_ts(&row.column_by_name::<String>("updated_at")?)?,
    })
}

fn decode_agent(row: &Row) -> Result<Agent> {
    let last_heartbeat: Option<String> = row.column_by_name("last_heartbeat")?;
    Ok(Agent {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        name: row.column_by_name("name")?,
        role: row.column_by_name("role")?,
        entity_id: parse_uuid(&row.column_by_name::<String>("entity_id")?)?,
        parent_agent_id: opt_uuid(row, "parent_agent_id")?,
        project_id: opt_uuid(row, "project_id")?,
        task: row.column_by_name("task")?,
        skills: serde_json::from_str(&row.column_by_name::<String>("skills")?)
            .context("Failed to deserialize agent skills")?,
        mcps: serde_json::from_str(&row.column_by_name::<String>("mcps")?)
            .context("Failed to deserialize agent mcps")?,
        status: parse_enum(&row.column_by_name::<String>("status")?)?,
        monthly_cost_usd: row.column_by_name("monthly_cost_usd")?,
        openclaw_instance_id: row.column_by_name("openclaw_instance_id")?,
        instance_url: row.column_by_name("instance_url")?,
        api_key_hash: row.column_by_name("api_key_hash")?,
        last_heartbeat: last_heartbeat.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
    })
}

fn decode_fleet_agent(row: &Row) -> Result<FleetAgent> {
    Ok(FleetAgent {
        agent: decode_agent(row)?,
        entity_name: row.column_by_name("entity_name")?,
        total_actions: row.column_by_name("total_actions")?,
        actions_24h: row.column_by_name("actions_24h")?,
        total_spend: row.column_by_name("total_spend")?,
    })
}

fn decode_ledger_entry(row: &Row) -> Result<LedgerEntry> {
    let ai_recommendation: Option<String> = row.column_by_name("ai_recommendation")?;
    Ok(LedgerEntry {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        entity_id: parse_uuid(&row.column_by_name::<String>("entity_id")?)?,
        agent_id: opt_uuid(row, "agent_id")?,
        action_type: parse_enum(&row.column_by_name::<String>("action_type")?)?,
        amount: row.column_by_name("amount")?,
        status: parse_enum(&row.column_by_name::<String>("status")?)?,
        notes: row.column_by_name("notes")?,
        ai_recommendation: ai_recommendation.as_deref().map(parse_json).transpose()?,
        actor_id: row.column_by_name("actor_id")?,
        recipient_id: row.column_by_name("recipient_id")?,
        payload: parse_json(&row.column_by_name::<String>("payload")?)?,
        actor_sig: row.column_by_name("actor_sig")?,
        recipient_sig: row.column_by_name("recipient_sig")?,
        auditor_sig: row.column_by_name("auditor_sig")?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
    })
}

fn decode_message(row: &Row) -> Result<Message> {
    Ok(Message {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        project_id: parse_uuid(&row.column_by_name::<String>("project_id")?)?,
        from_agent: parse_uuid(&row.column_by_name::<String>("from_agent")?)?,
        to_agent: parse_uuid(&row.column_by_name::<String>("to_agent")?)?,
        content: row.column_by_name("content")?,
        sent_at: parse_ts(&row.column_by_name::<String>("sent_at")?)?,
    })
}

fn decode_event(row: &Row) -> Result<SystemEvent> {
    Ok(SystemEvent {
        id: parse_uuid(&row.column_by_name::<String>("id")?)?,
        event_type: row.column_by_name("event_type")?,
        entity_id: opt_uuid(row, "entity_id")?,
        agent_id: opt_uuid(row, "agent_id")?,
        payload: parse_json(&row.column_by_name::<String>("payload")?)?,
        severity: parse_enum(&row.column_by_name::<String>("severity")?)?,
        created_at: parse_ts(&row.column_by_name::<String>("created_at")?)?,
    })
}

fn organization_mutation(op: MutationFn, org: &Organization) -> Mutation {
    let id = org.id.to_string();
    let created_at = ts(&org.created_at);
    let updated_at = ts(&org.updated_at);
    op(
        "organizations",
        ORGANIZATION_COLUMNS,
        &[&id, &org.name, &org.owner_email, &org.description, &created_at, &updated_at],
    )
}

fn business_mutation(op: MutationFn, business: &Business) -> Result<Mutation> {
    let id = business.id.to_string();
    let organization_id = business.organization_id.to_string();
    let settings = serde_json::to_string(&business.settings).context("Failed to serialize settings")?;
    let created_at = ts(&business.created_at);
    let updated_at = ts(&business.updated_at);
    Ok(op(
        "businesses",
        BUSINESS_COLUMNS,
        &[
            &id,
            &organization_id,
            &business.name,
            &business.industry,
            &business.description,
            &settings,
            &created_at,
            &updated_at,
        ],
    ))
}

fn project_mutation(op: MutationFn, project: &Project) -> Result<Mutation> {
    let id = project.id.to_string();
    let business_id = project.business_id.to_string();
    let status = project.status.as_str().to_string();
    let settings = serde_json::to_string(&project.settings).context("Failed to serialize settings")?;
    let created_at = ts(&project.created_at);
    let updated_at = ts(&project.updated_at);
    Ok(op(
        "projects",
        PROJECT_COLUMNS,
        &[
            &id,
            &business_id,
            &project.name,
            &project.description,
            &status,
            &settings,
            &created_at,
            &updated_at,
        ],
    ))
}

fn agent_mutation(op: MutationFn, agent: &Agent) -> Result<Mutation> {
    let id = agent.id.to_string();
    let entity_id = agent.entity_id.to_string();
    let parent_agent_id = agent.parent_agent_id.map(|id| id.to_string());
    let project_id = agent.project_id.map(|id| id.to_string());
    let skills = serde_json::to_string(&agent.skills).context("Failed to serialize skills")?;
    let mcps = serde_json::to_string(&agent.mcps).context("Failed to serialize mcps")?;
    let status = agent.status.as_str().to_string();
    let last_heartbeat = agent.last_heartbeat.as_ref().map(ts);
    let created_at = ts(&agent.created_at);
    Ok(op(
        "agents",
        AGENT_COLUMNS,
        &[
            &id,
            &agent.name,
            &agent.role,
            &entity_id,
            &parent_agent_id,
            &project_id,
            &agent.task,
            &skills,
            &mcps,
            &status,
            &agent.monthly_cost_usd,
            &agent.openclaw_instance_id,
            &agent.instance_url,
            &agent.api_key_hash,
            &last_heartbeat,
            &created_at,
        ],
    ))
}

fn ledger_insert(entry: &LedgerEntry) -> Result<Mutation> {
    let id = entry.id.to_string();
    let entity_id = entry.entity_id.to_string();
    let agent_id = entry.agent_id.map(|id| id.to_string());
    let action_type = entry.action_type.as_str().to_string();
    let status = entry.status.as_str().to_string();
    let ai_recommendation = entry
        .ai_recommendation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize ai_recommendation")?;
    let payload = serde_json::to_string(&entry.payload).context("Failed to serialize payload")?;
    let created_at = ts(&entry.created_at);
    Ok(insert(
        "ledger_entries",
        LEDGER_COLUMNS,
        &[
            &id,
            &entity_id,
            &agent_id,
            &action_type,
            &entry.amount,
            &status,
            &entry.notes,
            &ai_recommendation,
            &entry.actor_id,
            &entry.recipient_id,
            &payload,
            &entry.actor_sig,
            &entry.recipient_sig,
            &entry.auditor_sig,
            &created_at,
        ],
    ))
}

fn ledger_status_update(entry: &LedgerEntry) -> Result<Mutation> {
    let id = entry.id.to_string();
    let status = entry.status.as_str().to_string();
    Ok(update("ledger_entries", &["id", "status"], &[&id, &status]))
}

fn event_insert(event: &SystemEvent) -> Result<Mutation> {
    let id = event.id.to_string();
    let entity_id = event.entity_id.map(|id| id.to_string());
    let agent_id = event.agent_id.map(|id| id.to_string());
    let payload = serde_json::to_string(&event.payload).context("Failed to serialize event payload")?;
    let severity = event.severity.as_str().to_string();
    let created_at = ts(&event.created_at);
    Ok(insert(
        "system_events",
        EVENT_COLUMNS,
        &[&id, &event.event_type, &entity_id, &agent_id, &payload, &severity, &created_at],
    ))
}

/// Appends `LIMIT`/`OFFSET`; in Spanner SQL, LIMIT must come before OFFSET
fn push_pagination(sql: &mut String, limit: Option<i64>, offset: i64) {
    if let Some(limit_val) = limit {
        sql.push_str(&format!(" LIMIT {}", limit_val.max(0)));
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    } else if offset > 0 {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", i64::MAX, offset));
    }
}

/// Error raised inside a read-write transaction. gRPC statuses stay visible
/// to the client so aborted commits are retried.
#[derive(Debug, thiserror::Error)]
enum TxError {
    #[error(transparent)]
    Spanner(#[from] SpannerError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TryAs<Status> for TxError {
    fn try_as(&self) -> Option<&Status> {
        match self {
            TxError::Spanner(SpannerError::GRPC(status)) => Some(status),
            _ => None,
        }
    }
}

impl From<Status> for TxError {
    fn from(status: Status) -> Self {
        TxError::Spanner(SpannerError::GRPC(status))
    }
}

impl From<SessionError> for TxError {
    fn from(err: SessionError) -> Self {
        TxError::Spanner(SpannerError::InvalidSession(err))
    }
}

impl TxError {
    /// Guard errors are returned untouched so callers can downcast them
    fn into_anyhow(self, what: &str) -> anyhow::Error {
        match self {
            TxError::Other(err) => err,
            TxError::Spanner(err) => {
                anyhow::Error::new(err).context(format!("Failed to {} in Spanner", what))
            }
        }
    }
}

/// Shareable Spanner-backed store for use across async handlers
#[derive(Clone)]
pub struct SpannerStore {
    inner: Arc<Client>,
}

impl SpannerStore {
    /// Create a new Spanner client from configuration
    ///
    /// The gcloud-spanner library automatically detects the
    /// SPANNER_EMULATOR_HOST environment variable and connects to the
    /// emulator when set, or production Spanner otherwise.
    ///
    /// Missing instance, database, tables and indexes are created first.
    pub async fn from_settings(settings: &SpannerSettings) -> Result<Self> {
        auto_provision(settings).await?;

        let database_path = settings.database_path();

        match &settings.emulator_host {
            Some(host) => tracing::info!("Connecting to Spanner emulator at: {}", host),
            None => tracing::info!("Connecting to production Spanner"),
        }

        let client = Client::new(&database_path, ClientConfig::default())
            .await
            .context("Failed to create Spanner client")?;

        tracing::info!(
            "Successfully connected to Spanner database: {}",
            database_path
        );

        Ok(Self {
            inner: Arc::new(client),
        })
    }

    async fn apply(&self, mutations: Vec<Mutation>, what: &str) -> Result<()> {
        self.inner
            .apply(mutations)
            .await
            .with_context(|| format!("Failed to {} in Spanner", what))?;
        Ok(())
    }

    /// Read one row, hand it to `guard` and buffer the resulting writes in a
    /// single read-write transaction. Spanner reruns the closure when the
    /// commit aborts, so the guard always judges the row that gets replaced.
    async fn modify<T>(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
        id: Uuid,
        decode: fn(&Row) -> Result<T>,
        write: fn(&T) -> Result<Mutation>,
        guard: Guard<T>,
    ) -> Result<Option<Updated<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let sql = format!(
            "SELECT {} FROM {} t WHERE t.id = @id",
            select_list("t", columns),
            table
        );
        let key = id.to_string();

        let result: std::result::Result<(CommitResult, Option<Updated<T>>), TxError> = self
            .inner
            .read_write_transaction(move |tx| {
                let sql = sql.clone();
                let key = key.clone();
                let guard = guard.clone();
                Box::pin(async move {
                    let previous = {
                        let mut statement = Statement::new(sql);
                        statement.add_param("id", &key);
                        let mut rows = tx.query(statement).await?;
                        match rows.next().await? {
                            Some(row) => decode(&row)?,
                            None => return Ok(None),
                        }
                    };
                    let (updated, event) = guard(&previous)?.resolve(previous);
                    if updated.changed {
                        let mut mutations = vec![write(&updated.current)?];
                        if let Some(event) = &event {
                            mutations.push(event_insert(event)?);
                        }
                        tx.buffer_write(mutations);
                    }
                    Ok(Some(updated))
                })
            })
            .await;

        let (_, updated) = result.map_err(|err| err.into_anyhow(&format!("modify {}", table)))?;
        Ok(updated)
    }

    async fn query<T>(&self, statement: Statement, decode: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let mut tx = self
            .inner
            .single()
            .await
            .context("Failed to create read transaction")?;

        let mut result_set = tx
            .query(statement)
            .await
            .context("Failed to query data from Spanner")?;

        let mut rows = Vec::new();
        while let Some(row) = result_set.next().await? {
            rows.push(decode(&row)?);
        }
        Ok(rows)
    }

    async fn query_one<T>(&self, statement: Statement, decode: fn(&Row) -> Result<T>) -> Result<Option<T>> {
        Ok(self.query(statement, decode).await?.into_iter().next())
    }

    async fn get_by_id<T>(
        &self,
        table: &str,
        columns: &[&str],
        id: Uuid,
        decode: fn(&Row) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut statement = Statement::new(format!(
            "SELECT {} FROM {} t WHERE t.id = @id",
            select_list("t", columns),
            table
        ));
        statement.add_param("id", &id.to_string());
        self.query_one(statement, decode).await
    }
}

fn count_row(row: &Row) -> Result<i64> {
    Ok(row.column_by_name("count")?)
}

#[async_trait]
impl Store for SpannerStore {
    /// Lightweight `SELECT 1` round trip
    async fn health_check(&self) -> Result<()> {
        let statement = Statement::new("SELECT 1 AS count");
        match self.query_one(statement, count_row).await? {
            Some(_) => {
                tracing::debug!("Health check query succeeded");
                Ok(())
            }
            None => Err(anyhow::anyhow!("Health check query returned no results")),
        }
    }

    async fn insert_organization(&self, org: &Organization) -> Result<()> {
        self.apply(vec![organization_mutation(insert, org)], "insert organization")
            .await?;
        tracing::debug!("Inserted organization {}", org.id);
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        self.get_by_id("organizations", ORGANIZATION_COLUMNS, id, decode_organization)
            .await
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let statement = Statement::new(format!(
            "SELECT {} FROM organizations o ORDER BY o.created_at DESC",
            select_list("o", ORGANIZATION_COLUMNS)
        ));
        self.query(statement, decode_organization).await
    }

    async fn insert_business(&self, business: &Business) -> Result<()> {
        self.apply(vec![business_mutation(insert, business)?], "insert business")
            .await?;
        tracing::debug!("Inserted business {}", business.id);
        Ok(())
    }

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>> {
        self.get_by_id("businesses", BUSINESS_COLUMNS, id, decode_business)
            .await
    }

    async fn list_businesses(&self, organization_id: Option<Uuid>) -> Result<Vec<Business>> {
        let mut sql = format!("SELECT {} FROM businesses b", select_list("b", BUSINESS_COLUMNS));
        if organization_id.is_some() {
            sql.push_str(" WHERE b.organization_id = @organization_id");
        }
        sql.push_str(" ORDER BY b.created_at DESC");

        let mut statement = Statement::new(sql);
        if let Some(id) = organization_id {
            statement.add_param("organization_id", &id.to_string());
        }
        self.query(statement, decode_business).await
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        self.apply(vec![project_mutation(insert, project)?], "insert project")
            .await?;
        tracing::debug!("Inserted project {}", project.id);
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        self.get_by_id("projects", PROJECT_COLUMNS, id, decode_project)
            .await
    }

    async fn list_projects(&self, business_id: Option<Uuid>) -> Result<Vec<Project>> {
        let mut sql = format!("SELECT {} FROM projects p", select_list("p", PROJECT_COLUMNS));
        if business_id.is_some() {
            sql.push_str(" WHERE p.business_id = @business_id");
        }
        sql.push_str(" ORDER BY p.created_at DESC");

        let mut statement = Statement::new(sql);
        if let Some(id) = business_id {
            statement.add_param("business_id", &id.to_string());
        }
        self.query(statement, decode_project).await
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        self.apply(vec![project_mutation(update, project)?], "update project")
            .await
    }

    async fn directory_counts(&self) -> Result<DirectoryCounts> {
        let statement = Statement::new(
            "SELECT (SELECT COUNT(*) FROM organizations) AS organizations, \
             (SELECT COUNT(*) FROM businesses) AS businesses, \
             (SELECT COUNT(*) FROM projects) AS projects",
        );
        let counts = self
            .query_one(statement, |row| {
                Ok(DirectoryCounts {
                    organizations: row.column_by_name("organizations")?,
                    businesses: row.column_by_name("businesses")?,
                    projects: row.column_by_name("projects")?,
                })
            })
            .await?;
        Ok(counts.unwrap_or_default())
    }

    async fn provision_agent(
        &self,
        agent: &Agent,
        event: &SystemEvent,
        entry: &LedgerEntry,
    ) -> Result<()> {
        // One apply == one commit: the three rows land together or not at all
        let mutations = vec![
            agent_mutation(insert, agent)?,
            event_insert(event)?,
            ledger_insert(entry)?,
        ];
        self.apply(mutations, "provision agent").await?;
        tracing::debug!("Provisioned agent {} with ledger entry {}", agent.id, entry.id);
        Ok(())
    }

    async fn insert_agent(&self, agent: &Agent, event: Option<&SystemEvent>) -> Result<()> {
        let mut mutations = vec![agent_mutation(insert, agent)?];
        if let Some(event) = event {
            mutations.push(event_insert(event)?);
        }
        self.apply(mutations, "insert agent").await
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        self.get_by_id("agents", AGENT_COLUMNS, id, decode_agent).await
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut sql = format!("SELECT {} FROM agents a WHERE 1=1", select_list("a", AGENT_COLUMNS));
        let statement = agent_filter_statement(&mut sql, filter);
        self.query(statement, decode_agent).await
    }

    async fn modify_agent(&self, id: Uuid, guard: Guard<Agent>) -> Result<Option<Updated<Agent>>> {
        let updated = self
            .modify("agents", AGENT_COLUMNS, id, decode_agent, |agent| agent_mutation(update, agent), guard)
            .await?;
        if updated.as_ref().is_some_and(|u| u.changed) {
            tracing::debug!("Updated agent {}", id);
        }
        Ok(updated)
    }

    async fn fleet_agents(&self, filter: &AgentFilter) -> Result<Vec<FleetAgent>> {
        let mut sql = format!(
            "SELECT {}, b.name AS entity_name, \
             IFNULL(s.total_actions, 0) AS total_actions, \
             IFNULL(s.actions_24h, 0) AS actions_24h, \
             s.total_spend AS total_spend \
             FROM agents a \
             LEFT JOIN businesses b ON b.id = a.entity_id \
             LEFT JOIN ( \
               SELECT agent_id, COUNT(*) AS total_actions, \
                 COUNTIF(created_at > TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL 24 HOUR)) AS actions_24h, \
                 SUM(IF(action_type = 'expense' AND status = 'posted', amount, NULL)) AS total_spend \
               FROM ledger_entries WHERE agent_id IS NOT NULL GROUP BY agent_id \
             ) s ON s.agent_id = a.id \
             WHERE 1=1",
            select_list("a", AGENT_COLUMNS)
        );
        let statement = agent_filter_statement(&mut sql, filter);
        self.query(statement, decode_fleet_agent).await
    }

    async fn fleet_summary(&self) -> Result<FleetSummary> {
        let statement = Statement::new(
            "SELECT COUNT(*) AS total, \
             COUNTIF(status = 'active') AS active, \
             COUNTIF(status = 'idle') AS idle, \
             COUNTIF(status = 'suspended') AS suspended, \
             COUNTIF(status = 'provisioning') AS provisioning, \
             COUNTIF(status = 'archived') AS archived, \
             IFNULL(SUM(monthly_cost_usd), 0.0) AS total_monthly_cost \
             FROM agents",
        );
        let summary = self
            .query_one(statement, |row| {
                Ok(FleetSummary {
                    total: row.column_by_name("total")?,
                    active: row.column_by_name("active")?,
                    idle: row.column_by_name("idle")?,
                    suspended: row.column_by_name("suspended")?,
                    provisioning: row.column_by_name("provisioning")?,
                    archived: row.column_by_name("archived")?,
                    total_monthly_cost: row.column_by_name("total_monthly_cost")?,
                })
            })
            .await?;
        Ok(summary.unwrap_or_default())
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.apply(vec![ledger_insert(entry)?], "insert ledger entry")
            .await?;
        tracing::debug!("Recorded ledger entry {}", entry.id);
        Ok(())
    }

    async fn get_ledger_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        self.get_by_id("ledger_entries", LEDGER_COLUMNS, id, decode_ledger_entry)
            .await
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> Result<LedgerPage> {
        let mut where_clause = String::from(" WHERE 1=1");
        if filter.entity_id.is_some() {
            where_clause.push_str(" AND l.entity_id = @entity_id");
        }
        if filter.agent_id.is_some() {
            where_clause.push_str(" AND l.agent_id = @agent_id");
        }
        if filter.action_type.is_some() {
            where_clause.push_str(" AND l.action_type = @action_type");
        }
        if filter.status.is_some() {
            where_clause.push_str(" AND l.status = @status");
        }

        let bind = |statement: &mut Statement| {
            if let Some(id) = filter.entity_id {
                statement.add_param("entity_id", &id.to_string());
            }
            if let Some(id) = filter.agent_id {
                statement.add_param("agent_id", &id.to_string());
            }
            if let Some(action_type) = filter.action_type {
                statement.add_param("action_type", &action_type.as_str().to_string());
            }
            if let Some(status) = filter.status {
                statement.add_param("status", &status.as_str().to_string());
            }
        };

        let mut count_stmt =
            Statement::new(format!("SELECT COUNT(*) AS count FROM ledger_entries l{}", where_clause));
        bind(&mut count_stmt);
        let total_count = self.query_one(count_stmt, count_row).await?.unwrap_or(0);

        let mut data_query = format!(
            "SELECT {} FROM ledger_entries l{} ORDER BY l.created_at DESC",
            select_list("l", LEDGER_COLUMNS),
            where_clause
        );
        push_pagination(&mut data_query, filter.limit, filter.offset);
        let mut data_stmt = Statement::new(data_query);
        bind(&mut data_stmt);
        let entries = self.query(data_stmt, decode_ledger_entry).await?;

        tracing::debug!(
            "Listed {} ledger entries (total: {}, filter: {:?})",
            entries.len(),
            total_count,
            filter
        );

        Ok(LedgerPage {
            entries,
            total_count,
        })
    }

    async fn modify_ledger_entry(
        &self,
        id: Uuid,
        requested: Guard<LedgerEntry>,
    ) -> Result<Option<Updated<LedgerEntry>>> {
        // Only the status column is written, so report the row as stored
        let status_only = super::guard(move |current: &LedgerEntry| {
            Ok(match requested(current)? {
                Edit::Write { row, event } => {
                    let mut stored = current.clone();
                    stored.status = row.status;
                    Edit::Write { row: stored, event }
                }
                Edit::Keep => Edit::Keep,
            })
        });
        self.modify(
            "ledger_entries",
            LEDGER_COLUMNS,
            id,
            decode_ledger_entry,
            ledger_status_update,
            status_only,
        )
        .await
    }

    async fn ledger_summary(&self, entity_id: Option<Uuid>) -> Result<LedgerSummary> {
        let mut sql = String::from(
            "SELECT COUNT(*) AS entry_count, \
             COUNTIF(status = 'pending') AS pending_count, \
             IFNULL(SUM(IF(status = 'posted' AND action_type = 'expense', amount, NULL)), 0.0) AS posted_expense, \
             IFNULL(SUM(IF(status = 'posted' AND action_type = 'revenue', amount, NULL)), 0.0) AS posted_revenue \
             FROM ledger_entries",
        );
        if entity_id.is_some() {
            sql.push_str(" WHERE entity_id = @entity_id");
        }
        let mut statement = Statement::new(sql);
        if let Some(id) = entity_id {
            statement.add_param("entity_id", &id.to_string());
        }

        let summary = self
            .query_one(statement, |row| {
                let posted_expense: f64 = row.column_by_name("posted_expense")?;
                let posted_revenue: f64 = row.column_by_name("posted_revenue")?;
                Ok(LedgerSummary {
                    posted_expense,
                    posted_revenue,
                    net: posted_revenue - posted_expense,
                    pending_count: row.column_by_name("pending_count")?,
                    entry_count: row.column_by_name("entry_count")?,
                })
            })
            .await?;
        Ok(summary.unwrap_or_default())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        let id = message.id.to_string();
        let project_id = message.project_id.to_string();
        let from_agent = message.from_agent.to_string();
        let to_agent = message.to_agent.to_string();
        let sent_at = ts(&message.sent_at);
        let mutation = insert(
            "messages",
            MESSAGE_COLUMNS,
            &[&id, &project_id, &from_agent, &to_agent, &message.content, &sent_at],
        );
        self.apply(vec![mutation], "insert message").await
    }

    async fn list_messages(&self, project_id: Uuid) -> Result<Vec<Message>> {
        let mut statement = Statement::new(format!(
            "SELECT {} FROM messages m WHERE m.project_id = @project_id ORDER BY m.sent_at ASC",
            select_list("m", MESSAGE_COLUMNS)
        ));
        statement.add_param("project_id", &project_id.to_string());
        self.query(statement, decode_message).await
    }

    async fn list_system_events(&self, limit: i64) -> Result<Vec<SystemEvent>> {
        let statement = Statement::new(format!(
            "SELECT {} FROM system_events e ORDER BY e.created_at DESC LIMIT {}",
            select_list("e", EVENT_COLUMNS),
            limit.max(0)
        ));
        self.query(statement, decode_event).await
    }
}

/// Appends the agent filter and ordering to `sql` and binds its parameters
fn agent_filter_statement(sql: &mut String, filter: &AgentFilter) -> Statement {
    if filter.entity_id.is_some() {
        sql.push_str(" AND a.entity_id = @entity_id");
    }
    if filter.status.is_some() {
        sql.push_str(" AND a.status = @status");
    }
    sql.push_str(" ORDER BY a.created_at DESC");

    let mut statement = Statement::new(sql.as_str());
    if let Some(id) = filter.entity_id {
        statement.add_param("entity_id", &id.to_string());
    }
    if let Some(status) = filter.status {
        statement.add_param("status", &status.as_str().to_string());
    }
    statement
}

/// Name of the table or index a DDL statement creates
fn ddl_object_name(statement: &str) -> Option<&str> {
    let rest = statement
        .trim_start()
        .strip_prefix("CREATE TABLE ")
        .or_else(|| statement.trim_start().strip_prefix("CREATE INDEX "))
        .or_else(|| statement.trim_start().strip_prefix("CREATE UNIQUE INDEX "))?;
    let name = rest
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()?;
    Some(name.trim_matches('`'))
}

/// Automatically provision Spanner instance, database, tables and indexes
///
/// Checks whether the configured resources exist and creates them if needed,
/// which enables zero-setup local development with the emulator.
async fn auto_provision(settings: &SpannerSettings) -> Result<()> {
    tracing::info!("Starting auto-provisioning checks...");

    let admin_client = AdminClient::new(AdminClientConfig::default())
        .await
        .context("Failed to create Spanner admin client")?;

    let project_path = format!("projects/{}", settings.project);
    let instance_path = format!("{}/instances/{}", project_path, settings.instance);
    let database_path = format!("{}/databases/{}", instance_path, settings.database);

    ensure_instance_exists(&admin_client, settings, &project_path, &instance_path).await?;
    ensure_database_exists(&admin_client, &instance_path, &database_path).await?;
    ensure_schema(&admin_client, &database_path).await?;

    tracing::info!("Auto-provisioning complete");
    Ok(())
}

/// Ensure the Spanner instance exists, creating it if necessary
async fn ensure_instance_exists(
    admin_client: &AdminClient,
    settings: &SpannerSettings,
    project_path: &str,
    instance_path: &str,
) -> Result<()> {
    let get_request = GetInstanceRequest {
        name: instance_path.to_string(),
        field_mask: None,
    };

    match admin_client.instance().get_instance(get_request, None).await {
        Ok(_) => {
            tracing::info!("Instance already exists: {}", instance_path);
            Ok(())
        }
        Err(status) if status.code() == Code::NotFound => {
            tracing::info!("Instance not found, creating: {}", instance_path);

            let instance_config = if settings.emulator_host.is_some() {
                format!("{}/instanceConfigs/emulator-config", project_path)
            } else {
                format!("{}/instanceConfigs/regional-us-central1", project_path)
            };

            let create_request = CreateInstanceRequest {
                parent: project_path.to_string(),
                instance_id: settings.instance.clone(),
                instance: Some(Instance {
                    name: instance_path.to_string(),
                    config: instance_config,
                    display_name: format!("{} instance", settings.instance),
                    node_count: 1,
                    ..Default::default()
                }),
            };

            let mut operation = admin_client
                .instance()
                .create_instance(create_request, None)
                .await
                .context("Failed to start instance creation")?;

            operation
                .wait(None)
                .await
                .context("Failed to create instance")?;

            tracing::info!("Instance created successfully: {}", instance_path);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(
            "Failed to check instance existence: {}",
            e.message()
        )),
    }
}

/// Ensure the Spanner database exists, creating it if necessary
async fn ensure_database_exists(
    admin_client: &AdminClient,
    instance_path: &str,
    database_path: &str,
) -> Result<()> {
    let get_request = GetDatabaseRequest {
        name: database_path.to_string(),
    };

    match admin_client
        .database()
        .get_database(get_request, None)
        .await
    {
        Ok(_) => {
            tracing::info!("Database already exists: {}", database_path);
            Ok(())
        }
        Err(status) if status.code() == Code::NotFound => {
            tracing::info!("Database not found, creating: {}", database_path);

            let database_id = database_path
                .split('/')
                .next_back()
                .context("Invalid database path")?;

            let create_request = CreateDatabaseRequest {
                parent: instance_path.to_string(),
                create_statement: format!("CREATE DATABASE `{}`", database_id),
                extra_statements: vec![],
                encryption_config: None,
                database_dialect: 1, // Google Standard SQL
                proto_descriptors: vec![],
            };

            let mut operation = admin_client
                .database()
                .create_database(create_request, None)
                .await
                .context("Failed to start database creation")?;

            operation
                .wait(None)
                .await
                .context("Failed to create database")?;

            tracing::info!("Database created successfully: {}", database_path);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(
            "Failed to check database existence: {}",
            e.message()
        )),
    }
}

/// Statements from [`SCHEMA`] whose object is not yet defined
fn missing_schema(existing: &[String]) -> Vec<(&'static str, &'static str)> {
    let defined: Vec<&str> = existing.iter().filter_map(|s| ddl_object_name(s)).collect();
    SCHEMA
        .iter()
        .filter(|(name, _)| !defined.contains(name))
        .copied()
        .collect()
}

/// Create every missing table and index in a single DDL batch
async fn ensure_schema(admin_client: &AdminClient, database_path: &str) -> Result<()> {
    let get_ddl_request = GetDatabaseDdlRequest {
        database: database_path.to_string(),
    };

    let ddl_response = admin_client
        .database()
        .get_database_ddl(get_ddl_request, None)
        .await
        .context("Failed to get database DDL")?;

    let missing = missing_schema(&ddl_response.into_inner().statements);
    if missing.is_empty() {
        tracing::info!("Schema is up to date");
        return Ok(());
    }

    let names: Vec<&str> = missing.iter().map(|(name, _)| *name).collect();
    tracing::info!("Creating schema objects: {}", names.join(", "));

    let update_request = UpdateDatabaseDdlRequest {
        database: database_path.to_string(),
        statements: missing.iter().map(|(_, ddl)| ddl.to_string()).collect(),
        operation_id: String::new(),
        proto_descriptors: vec![],
        throughput_mode: false,
    };

    let mut operation = admin_client
        .database()
        .update_database_ddl(update_request, None)
        .await
        .context("Failed to start schema update")?;

    operation
        .wait(None)
        .await
        .context("Failed to apply schema update")?;

    tracing::info!("Schema objects created successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lock_env;
    use crate::ledger::LedgerSigner;
    use crate::store::{guard, AgentStatus, LedgerActionType, LedgerStatus, Severity, WriteConflict};
    use serde_json::json;
    use std::sync::MutexGuard;

    /// Points the client at the emulator while holding the shared env lock.
    /// The variable is removed again on drop, including on early return.
    struct EmulatorEnv {
        _lock: MutexGuard<'static, ()>,
    }

    impl Drop for EmulatorEnv {
        fn drop(&mut self) {
            unsafe {
                std::env::remove_var("SPANNER_EMULATOR_HOST");
            }
        }
    }

    fn emulator_settings(instance: &str, database: &str) -> (EmulatorEnv, SpannerSettings) {
        let lock = lock_env();
        unsafe {
            std::env::set_var("SPANNER_EMULATOR_HOST", "localhost:9010");
        }
        let settings = SpannerSettings {
            emulator_host: Some("localhost:9010".to_string()),
            project: "test-project".to_string(),
            instance: instance.to_string(),
            database: database.to_string(),
        };
        (EmulatorEnv { _lock: lock }, settings)
    }

    fn ledger_ddl() -> &'static str {
        SCHEMA
            .iter()
            .find(|(name, _)| *name == "ledger_entries")
            .map(|(_, ddl)| *ddl)
            .unwrap()
    }

    #[test]
    fn test_store_is_clonable_and_send_sync() {
        fn assert_clone<T: Clone>() {}
        fn assert_send_sync<T: Send + Sync>() {}
        assert_clone::<SpannerStore>();
        assert_send_sync::<SpannerStore>();
    }

    #[test]
    fn test_ddl_object_name() {
        assert_eq!(ddl_object_name("CREATE TABLE agents (\n id STRING(36)"), Some("agents"));
        assert_eq!(ddl_object_name("CREATE TABLE `agents` ("), Some("agents"));
        assert_eq!(
            ddl_object_name("CREATE INDEX ledger_entries_by_agent ON ledger_entries(agent_id)"),
            Some("ledger_entries_by_agent")
        );
        assert_eq!(ddl_object_name("ALTER TABLE agents ADD COLUMN x INT64"), None);
    }

    #[test]
    fn test_missing_schema_skips_existing_objects() {
        let existing = vec![
            "CREATE TABLE organizations (\n  id STRING(36) NOT NULL,\n) PRIMARY KEY(id)".to_string(),
            "CREATE TABLE agents (\n  id STRING(36) NOT NULL,\n) PRIMARY KEY(id)".to_string(),
        ];
        let missing: Vec<&str> = missing_schema(&existing).iter().map(|(n, _)| *n).collect();
        assert!(!missing.contains(&"organizations"));
        assert!(!missing.contains(&"agents"));
        assert!(missing.contains(&"ledger_entries"));
        assert!(missing.contains(&"ledger_entries_by_agent"));
        assert_eq!(missing.len(), SCHEMA.len() - 2);
    }

    #[test]
    fn test_schema_names_match_statements() {
        for (name, ddl) in SCHEMA {
            assert_eq!(ddl_object_name(ddl), Some(*name));
        }
    }

    #[test]
    fn test_ledger_party_ids_are_unbounded() {
        let ddl = ledger_ddl();
        assert!(ddl.contains("actor_id STRING(MAX) NOT NULL"));
        assert!(ddl.contains("recipient_id STRING(MAX) NOT NULL"));
    }

    #[test]
    fn test_signed_payload_is_stored_as_text() {
        // A JSON column may renormalize numbers such as 80.0 and break signatures
        assert!(ledger_ddl().contains("payload STRING(MAX) NOT NULL"));
    }

    #[test]
    fn test_tx_error_keeps_guard_errors_downcastable() {
        let err = TxError::from(anyhow::Error::from(WriteConflict("terminal".to_string())));
        assert!(err.try_as().is_none());
        let err = err.into_anyhow("modify ledger_entries");
        assert_eq!(err.downcast_ref::<WriteConflict>().unwrap().0, "terminal");

        let aborted = TxError::from(Status::new(Code::Aborted, "retry"));
        assert_eq!(aborted.try_as().map(|s| s.code()), Some(Code::Aborted));
    }

    #[test]
    fn test_push_pagination() {
        let mut sql = String::from("SELECT 1");
        push_pagination(&mut sql, Some(10), 5);
        assert_eq!(sql, "SELECT 1 LIMIT 10 OFFSET 5");

        let mut sql = String::from("SELECT 1");
        push_pagination(&mut sql, None, 0);
        assert_eq!(sql, "SELECT 1");

        let mut sql = String::from("SELECT 1");
        push_pagination(&mut sql, None, 3);
        assert_eq!(sql, format!("SELECT 1 LIMIT {} OFFSET 3", i64::MAX));
    }

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let now = Utc::now();
        let parsed = parse_ts(&ts(&now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[tokio::test]
    async fn test_provision_and_fleet_with_emulator() {
        let (_env, settings) = emulator_settings("fleet-test-instance", "fleet-test-db");

        let store = match SpannerStore::from_settings(&settings).await {
            Ok(store) => store,
            Err(e) => {
                println!("Fleet test skipped (emulator may not be running): {}", e);
                return;
            }
        };

        let now = Utc::now();
        let business = Business {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Emulator Co".to_string(),
            industry: None,
            description: None,
            settings: json!({}),
            created_at: now,
            updated_at: now,
        };
        store.insert_business(&business).await.unwrap();

        let agent = Agent {
            id: Uuid::new_v4(),
            name: "Victoria".to_string(),
            role: "CFO".to_string(),
            entity_id: business.id,
            parent_agent_id: None,
            project_id: None,
            task: None,
            skills: vec!["budgeting".to_string()],
            mcps: vec![],
            status: AgentStatus::Provisioning,
            monthly_cost_usd: 80.0,
            openclaw_instance_id: None,
            instance_url: Some("https://claw.example.com/v".to_string()),
            api_key_hash: Some("d".repeat(64)),
            last_heartbeat: None,
            created_at: now,
        };
        let event = SystemEvent::new("provision", Some(business.id), Some(agent.id), json!({}), Severity::Info);
        let signer = LedgerSigner::new("emulator-secret", "FIN_AC_001");
        let payload = json!({
            "action": "provision",
            "agent_id": agent.id,
            "name": "Victoria",
            "monthly_cost_usd": 80.0,
        });
        let sigs = signer.sign_entry(&payload, "GENII_PROVISIONER", &agent.id.to_string());
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            entity_id: business.id,
            agent_id: Some(agent.id),
            action_type: LedgerActionType::Provision,
            amount: None,
            status: LedgerStatus::Posted,
            notes: Some("provisioned".to_string()),
            ai_recommendation: Some(json!({"action": "agent_provisioned"})),
            actor_id: "GENII_PROVISIONER".to_string(),
            recipient_id: agent.id.to_string(),
            payload,
            actor_sig: sigs.actor_sig,
            recipient_sig: sigs.recipient_sig,
            auditor_sig: sigs.auditor_sig,
            created_at: now,
        };
        store.provision_agent(&agent, &event, &entry).await.unwrap();

        let fetched = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.skills, agent.skills);
        assert_eq!(fetched.status, AgentStatus::Provisioning);
        assert_eq!(fetched.instance_url, agent.instance_url);
        assert_eq!(fetched.api_key_hash, agent.api_key_hash);

        let stored_entry = store.get_ledger_entry(entry.id).await.unwrap().unwrap();
        assert!(signer.verify(&stored_entry).is_valid());

        let filter = AgentFilter {
            entity_id: Some(business.id),
            status: None,
        };
        let fleet = store.fleet_agents(&filter).await.unwrap();
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet[0].entity_name.as_deref(), Some("Emulator Co"));
        assert_eq!(fleet[0].total_actions, 1);
        assert_eq!(fleet[0].total_spend, None);

        let page = store
            .list_ledger_entries(&LedgerFilter::for_agent(agent.id, 10))
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.entries[0].ai_recommendation, entry.ai_recommendation);

        // Void is terminal: the guard sees the committed row and refuses
        let void = guard(|current: &LedgerEntry| {
            let mut row = current.clone();
            row.status = LedgerStatus::Void;
            Ok(Edit::Write { row, event: None })
        });
        let updated = store.modify_ledger_entry(entry.id, void).await.unwrap().unwrap();
        assert!(updated.changed);
        assert_eq!(updated.current.status, LedgerStatus::Void);

        let repost = guard(|current: &LedgerEntry| {
            if current.status == LedgerStatus::Void {
                return Err(WriteConflict("void is terminal".to_string()).into());
            }
            Ok(Edit::Keep)
        });
        let err = store.modify_ledger_entry(entry.id, repost).await.unwrap_err();
        assert!(err.downcast_ref::<WriteConflict>().is_some());

        let missing = store
            .modify_agent(Uuid::new_v4(), guard(|_: &Agent| Ok(Edit::Keep)))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_auto_provisioning_idempotent() {
        let (_env, settings) = emulator_settings("idempotent-test-instance", "idempotent-test-db");

        let result1 = SpannerStore::from_settings(&settings).await;
        if result1.is_ok() {
            let result2 = SpannerStore::from_settings(&settings).await;
            assert!(result2.is_ok(), "Second auto-provisioning call should succeed");
        }
    }
}
