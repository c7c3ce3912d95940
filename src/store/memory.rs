use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Agent, AgentFilter, Business, DirectoryCounts, FleetAgent, FleetSummary, Guard,
    LedgerActionType, LedgerEntry, LedgerFilter, LedgerPage, LedgerStatus, LedgerSummary, Message,
    Organization, Project, Store, SystemEvent, Updated,
};

#[derive(Default)]
struct Tables {
    organizations: Vec<Organization>,
    businesses: Vec<Business>,
    projects: Vec<Project>,
    agents: Vec<Agent>,
    ledger_entries: Vec<LedgerEntry>,
    messages: Vec<Message>,
    system_events: Vec<SystemEvent>,
}

/// Rows in insertion order; newest first means reversed, then stably sorted
/// by timestamp so ties keep the most recent insert on top.
fn newest_first<T: Clone, K: Ord>(rows: &[T], key: impl Fn(&T) -> K) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().rev().cloned().collect();
    out.sort_by(|a, b| key(b).cmp(&key(a)));
    out
}

/// Process-local store used for development and tests
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make health checks fail, as if the database had gone away
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject every write before it touches a table
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected: in-memory store is read-only");
        }
        Ok(())
    }
}

fn fleet_agent(tables: &Tables, agent: &Agent) -> FleetAgent {
    let cutoff = Utc::now() - Duration::hours(24);
    let mut total_actions = 0;
    let mut actions_24h = 0;
    let mut total_spend: Option<f64> = None;

    for entry in tables
        .ledger_entries
        .iter()
        .filter(|e| e.agent_id == Some(agent.id))
    {
        total_actions += 1;
        if entry.created_at > cutoff {
            actions_24h += 1;
        }
        if entry.action_type == LedgerActionType::Expense && entry.status == LedgerStatus::Posted {
            if let Some(amount) = entry.amount {
                *total_spend.get_or_insert(0.0) += amount;
            }
        }
    }

    FleetAgent {
        agent: agent.clone(),
        entity_name: tables
            .businesses
            .iter()
            .find(|b| b.id == agent.entity_id)
            .map(|b| b.name.clone()),
        total_actions,
        actions_24h,
        total_spend,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("connection refused: in-memory store is offline");
        }
        let _tables = self.tables.read().await;
        Ok(())
    }

    async fn insert_organization(&self, org: &Organization) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.organizations.iter().any(|o| o.id == org.id) {
            bail!("Organization {} already exists", org.id);
        }
        tables.organizations.push(org.clone());
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let tables = self.tables.read().await;
        Ok(tables.organizations.iter().find(|o| o.id == id).cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.organizations, |o| o.created_at))
    }

    async fn insert_business(&self, business: &Business) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.businesses.iter().any(|b| b.id == business.id) {
            bail!("Business {} already exists", business.id);
        }
        tables.businesses.push(business.clone());
        Ok(())
    }

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>> {
        let tables = self.tables.read().await;
        Ok(tables.businesses.iter().find(|b| b.id == id).cloned())
    }

    async fn list_businesses(&self, organization_id: Option<Uuid>) -> Result<Vec<Business>> {
        let tables = self.tables.read().await;
        let rows: Vec<Business> = tables
            .businesses
            .iter()
            .filter(|b| organization_id.is_none_or(|id| b.organization_id == id))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |b| b.created_at))
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.projects.iter().any(|p| p.id == project.id) {
            bail!("Project {} already exists", project.id);
        }
        tables.projects.push(project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let tables = self.tables.read().await;
        Ok(tables.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn list_projects(&self, business_id: Option<Uuid>) -> Result<Vec<Project>> {
        let tables = self.tables.read().await;
        let rows: Vec<Project> = tables
            .projects
            .iter()
            .filter(|p| business_id.is_none_or(|id| p.business_id == id))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |p| p.created_at))
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        match tables.projects.iter_mut().find(|p| p.id == project.id) {
            Some(row) => {
                *row = project.clone();
                Ok(())
            }
            None => bail!("Project {} does not exist", project.id),
        }
    }

    async fn directory_counts(&self) -> Result<DirectoryCounts> {
        let tables = self.tables.read().await;
        Ok(DirectoryCounts {
            organizations: tables.organizations.len() as i64,
            businesses: tables.businesses.len() as i64,
            projects: tables.projects.len() as i64,
        })
    }

    async fn provision_agent(
        &self,
        agent: &Agent,
        event: &SystemEvent,
        entry: &LedgerEntry,
    ) -> Result<()> {
        // Single write guard: all three rows land together
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.agents.iter().any(|a| a.id == agent.id) {
            bail!("Agent {} already exists", agent.id);
        }
        tables.agents.push(agent.clone());
        tables.system_events.push(event.clone());
        tables.ledger_entries.push(entry.clone());
        Ok(())
    }

    async fn insert_agent(&self, agent: &Agent, event: Option<&SystemEvent>) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.agents.iter().any(|a| a.id == agent.id) {
            bail!("Agent {} already exists", agent.id);
        }
        tables.agents.push(agent.clone());
        if let Some(event) = event {
            tables.system_events.push(event.clone());
        }
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let tables = self.tables.read().await;
        Ok(tables.agents.iter().find(|a| a.id == id).cloned())
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let tables = self.tables.read().await;
        let rows: Vec<Agent> = tables
            .agents
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |a| a.created_at))
    }

    async fn modify_agent(&self, id: Uuid, guard: Guard<Agent>) -> Result<Option<Updated<Agent>>> {
        self.check_writable()?;
        // The guard sees the row under the write lock, so no other writer can
        // slip in between the check and the write.
        let mut tables = self.tables.write().await;
        let Some(index) = tables.agents.iter().position(|a| a.id == id) else {
            return Ok(None);
        };
        let previous = tables.agents[index].clone();
        let (updated, event) = guard(&previous)?.resolve(previous);
        if updated.changed {
            tables.agents[index] = updated.current.clone();
            if let Some(event) = event {
                tables.system_events.push(event);
            }
        }
        Ok(Some(updated))
    }

    async fn fleet_agents(&self, filter: &AgentFilter) -> Result<Vec<FleetAgent>> {
        let tables = self.tables.read().await;
        let rows: Vec<Agent> = tables
            .agents
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |a| a.created_at)
            .iter()
            .map(|agent| fleet_agent(&tables, agent))
            .collect())
    }

    async fn fleet_summary(&self) -> Result<FleetSummary> {
        let tables = self.tables.read().await;
        let mut summary = FleetSummary::default();
        for agent in &tables.agents {
            summary.add(agent.status, agent.monthly_cost_usd);
        }
        Ok(summary)
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.ledger_entries.iter().any(|e| e.id == entry.id) {
            bail!("Ledger entry {} already exists", entry.id);
        }
        tables.ledger_entries.push(entry.clone());
        Ok(())
    }

    async fn get_ledger_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.ledger_entries.iter().find(|e| e.id == id).cloned())
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> Result<LedgerPage> {
        let tables = self.tables.read().await;
        let rows: Vec<LedgerEntry> = tables
            .ledger_entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let total_count = rows.len() as i64;

        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        let entries = newest_first(&rows, |e| e.created_at)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();

        Ok(LedgerPage {
            entries,
            total_count,
        })
    }

    async fn modify_ledger_entry(
        &self,
        id: Uuid,
        guard: Guard<LedgerEntry>,
    ) -> Result<Option<Updated<LedgerEntry>>> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let Some(index) = tables.ledger_entries.iter().position(|e| e.id == id) else {
            return Ok(None);
        };
        let previous = tables.ledger_entries[index].clone();
        let (mut updated, event) = guard(&previous)?.resolve(previous);
        if updated.changed {
            let row = &mut tables.ledger_entries[index];
            row.status = updated.current.status;
            updated.current = row.clone();
            if let Some(event) = event {
                tables.system_events.push(event);
            }
        }
        Ok(Some(updated))
    }

    async fn ledger_summary(&self, entity_id: Option<Uuid>) -> Result<LedgerSummary> {
        let tables = self.tables.read().await;
        let mut summary = LedgerSummary::default();
        for entry in tables
            .ledger_entries
            .iter()
            .filter(|e| entity_id.is_none_or(|id| e.entity_id == id))
        {
            summary.add(entry);
        }
        Ok(summary)
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, project_id: Uuid) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.sent_at);
        Ok(rows)
    }

    async fn list_system_events(&self, limit: i64) -> Result<Vec<SystemEvent>> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.system_events, |e| e.created_at)
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }
}
