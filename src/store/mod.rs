//! Persistence layer.
//!
//! [`Store`] is the seam between the HTTP handlers and the database. The
//! production implementation talks to Cloud Spanner ([`spanner::SpannerStore`]);
//! [`memory::MemoryStore`] keeps everything in process and backs local runs and
//! the handler tests. Both must answer every query identically.

pub mod memory;
pub mod spanner;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Number of ledger entries returned as an agent's recent actions
pub const RECENT_ACTIONS_LIMIT: i64 = 10;

/// Defines a lowercase string enum with `as_str`, `FromStr`, `Display` and a
/// human readable list of accepted values.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Comma separated list of accepted values, for error messages
            pub fn accepted() -> String {
                Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "{} must be one of: {}, got '{}'",
                        stringify!($name),
                        Self::accepted(),
                        other
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a project
    ProjectStatus {
        Active => "active",
        Archived => "archived",
        Draft => "draft",
    }
);

string_enum!(
    /// Lifecycle of an agent in the fleet
    AgentStatus {
        Provisioning => "provisioning",
        Active => "active",
        Idle => "idle",
        Suspended => "suspended",
        Archived => "archived",
    }
);

string_enum!(
    /// Kind of action a ledger entry records
    LedgerActionType {
        Expense => "expense",
        Revenue => "revenue",
        Transfer => "transfer",
        Provision => "provision",
        Adjustment => "adjustment",
    }
);

string_enum!(
    /// Posting state of a ledger entry
    LedgerStatus {
        Pending => "pending",
        Posted => "posted",
        Void => "void",
    }
);

string_enum!(
    Severity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
);

impl AgentStatus {
    /// Statuses an operator may set directly through the fleet API
    pub const SETTABLE: &'static [AgentStatus] = &[
        AgentStatus::Active,
        AgentStatus::Idle,
        AgentStatus::Suspended,
        AgentStatus::Archived,
    ];
}

impl LedgerActionType {
    /// Whether entries of this type move money and therefore need an amount
    pub fn requires_amount(self) -> bool {
        matches!(
            self,
            LedgerActionType::Expense | LedgerActionType::Revenue | LedgerActionType::Transfer
        )
    }
}

impl LedgerStatus {
    /// Allowed transitions: pending -> posted, pending -> void, posted -> void
    pub fn can_transition_to(self, next: LedgerStatus) -> bool {
        matches!(
            (self, next),
            (LedgerStatus::Pending, LedgerStatus::Posted)
                | (LedgerStatus::Pending, LedgerStatus::Void)
                | (LedgerStatus::Posted, LedgerStatus::Void)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_email: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A business belongs to an organization. Agents and ledger entries refer to
/// it as their `entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Business {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub settings: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub settings: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub entity_id: Uuid,
    pub parent_agent_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub task: Option<String>,
    pub skills: Vec<String>,
    pub mcps: Vec<String>,
    pub status: AgentStatus,
    pub monthly_cost_usd: f64,
    pub openclaw_instance_id: Option<String>,
    /// Base URL of a self-registered agent's runtime
    pub instance_url: Option<String>,
    /// SHA-256 of the API key issued at registration
    #[serde(skip)]
    pub api_key_hash: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An agent joined with its entity name and ledger activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FleetAgent {
    #[serde(flatten)]
    pub agent: Agent,
    pub entity_name: Option<String>,
    pub total_actions: i64,
    pub actions_24h: i64,
    /// Sum of posted expense amounts; null when the agent has none
    pub total_spend: Option<f64>,
}

/// Fleet-wide counts by status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FleetSummary {
    pub total: i64,
    pub active: i64,
    pub idle: i64,
    pub suspended: i64,
    pub provisioning: i64,
    pub archived: i64,
    pub total_monthly_cost: f64,
}

impl FleetSummary {
    /// Fold one agent into the summary
    pub fn add(&mut self, status: AgentStatus, monthly_cost_usd: f64) {
        self.total += 1;
        self.total_monthly_cost += monthly_cost_usd;
        match status {
            AgentStatus::Active => self.active += 1,
            AgentStatus::Idle => self.idle += 1,
            AgentStatus::Suspended => self.suspended += 1,
            AgentStatus::Provisioning => self.provisioning += 1,
            AgentStatus::Archived => self.archived += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub entity_id: Option<Uuid>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.entity_id.is_none_or(|id| agent.entity_id == id)
            && self.status.is_none_or(|status| agent.status == status)
    }
}

/// A triple-entry ledger record, signed by actor, recipient and auditor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub action_type: LedgerActionType,
    pub amount: Option<f64>,
    pub status: LedgerStatus,
    pub notes: Option<String>,
    pub ai_recommendation: Option<JsonValue>,
    pub actor_id: String,
    pub recipient_id: String,
    pub payload: JsonValue,
    pub actor_sig: String,
    pub recipient_sig: String,
    pub auditor_sig: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub entity_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub action_type: Option<LedgerActionType>,
    pub status: Option<LedgerStatus>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl LedgerFilter {
    pub fn for_agent(agent_id: Uuid, limit: i64) -> Self {
        LedgerFilter {
            agent_id: Some(agent_id),
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.entity_id.is_none_or(|id| entry.entity_id == id)
            && self.agent_id.is_none_or(|id| entry.agent_id == Some(id))
            && self.action_type.is_none_or(|t| entry.action_type == t)
            && self.status.is_none_or(|s| entry.status == s)
    }
}

/// Result of a ledger query with pagination info
#[derive(Debug, Clone)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LedgerSummary {
    pub posted_expense: f64,
    pub posted_revenue: f64,
    pub net: f64,
    pub pending_count: i64,
    pub entry_count: i64,
}

impl LedgerSummary {
    pub fn add(&mut self, entry: &LedgerEntry) {
        self.entry_count += 1;
        match entry.status {
            LedgerStatus::Pending => self.pending_count += 1,
            LedgerStatus::Posted => {
                let amount = entry.amount.unwrap_or(0.0);
                match entry.action_type {
                    LedgerActionType::Expense => self.posted_expense += amount,
                    LedgerActionType::Revenue => self.posted_revenue += amount,
                    _ => {}
                }
            }
            LedgerStatus::Void => {}
        }
        self.net = self.posted_revenue - self.posted_expense;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    pub from_agent: Uuid,
    pub to_agent: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Audit log record written alongside state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SystemEvent {
    pub id: Uuid,
    pub event_type: String,
    pub entity_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub payload: JsonValue,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

impl SystemEvent {
    pub fn new(
        event_type: &str,
        entity_id: Option<Uuid>,
        agent_id: Option<Uuid>,
        payload: JsonValue,
        severity: Severity,
    ) -> Self {
        SystemEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            entity_id,
            agent_id,
            payload,
            severity,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DirectoryCounts {
    pub organizations: i64,
    pub businesses: i64,
    pub projects: i64,
}

/// A state rule failed against the stored row. Handlers answer 409.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct WriteConflict(pub String);

/// Decision returned by a [`Guard`] after looking at the current row
#[derive(Debug, Clone)]
pub enum Edit<T> {
    /// Leave the row as it is
    Keep,
    /// Replace the row, optionally recording an audit event in the same commit
    Write { row: T, event: Option<SystemEvent> },
}

/// Outcome of a guarded read-modify-write
#[derive(Debug, Clone)]
pub struct Updated<T> {
    pub previous: T,
    pub current: T,
    pub changed: bool,
}

/// Checks and edits a row inside the store's transaction. Returning a
/// [`WriteConflict`] aborts without writing anything.
pub type Guard<T> = Arc<dyn Fn(&T) -> Result<Edit<T>> + Send + Sync>;

pub fn guard<T, F>(f: F) -> Guard<T>
where
    F: Fn(&T) -> Result<Edit<T>> + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<T: Clone> Edit<T> {
    /// Apply the edit to the row it was computed from
    pub fn resolve(self, previous: T) -> (Updated<T>, Option<SystemEvent>) {
        match self {
            Edit::Keep => (
                Updated {
                    current: previous.clone(),
                    previous,
                    changed: false,
                },
                None,
            ),
            Edit::Write { row, event } => (
                Updated {
                    previous,
                    current: row,
                    changed: true,
                },
                event,
            ),
        }
    }
}

/// Storage operations used by the HTTP layer
///
/// Methods that take more than one record must persist them atomically: either
/// every row is written or none is.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round trip to the backing database
    async fn health_check(&self) -> Result<()>;

    async fn insert_organization(&self, org: &Organization) -> Result<()>;
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>>;
    /// Newest first
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    async fn insert_business(&self, business: &Business) -> Result<()>;
    async fn get_business(&self, id: Uuid) -> Result<Option<Business>>;
    async fn list_businesses(&self, organization_id: Option<Uuid>) -> Result<Vec<Business>>;

    async fn insert_project(&self, project: &Project) -> Result<()>;
    async fn get_project(&self, id: Uuid) -> Result<Option<Project>>;
    async fn list_projects(&self, business_id: Option<Uuid>) -> Result<Vec<Project>>;
    async fn update_project(&self, project: &Project) -> Result<()>;

    async fn directory_counts(&self) -> Result<DirectoryCounts>;

    /// Write a new agent together with its provisioning event and ledger entry
    async fn provision_agent(
        &self,
        agent: &Agent,
        event: &SystemEvent,
        entry: &LedgerEntry,
    ) -> Result<()>;
    /// Write a new agent, optionally recording an audit event in the same commit
    async fn insert_agent(&self, agent: &Agent, event: Option<&SystemEvent>) -> Result<()>;
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>>;
    /// Newest first
    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;
    /// Read the current agent, let `guard` decide, then write atomically.
    /// `None` when the agent does not exist.
    async fn modify_agent(&self, id: Uuid, guard: Guard<Agent>) -> Result<Option<Updated<Agent>>>;
    /// Agents joined with entity names and ledger activity, newest first
    async fn fleet_agents(&self, filter: &AgentFilter) -> Result<Vec<FleetAgent>>;
    /// Counts across the whole fleet, ignoring filters
    async fn fleet_summary(&self) -> Result<FleetSummary>;

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()>;
    async fn get_ledger_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>>;
    /// Newest first, paginated
    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> Result<LedgerPage>;
    /// Guarded status change. Only the status column is written back.
    async fn modify_ledger_entry(
        &self,
        id: Uuid,
        guard: Guard<LedgerEntry>,
    ) -> Result<Option<Updated<LedgerEntry>>>;
    async fn ledger_summary(&self, entity_id: Option<Uuid>) -> Result<LedgerSummary>;

    async fn insert_message(&self, message: &Message) -> Result<()>;
    /// Oldest first
    async fn list_messages(&self, project_id: Uuid) -> Result<Vec<Message>>;

    /// Newest first
    async fn list_system_events(&self, limit: i64) -> Result<Vec<SystemEvent>>;
}
