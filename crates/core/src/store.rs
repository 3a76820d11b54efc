//! In-memory tenant-partitioned repository
//!
//! Owns the action log, tasks, anomalies, and per-agent trust aggregates.
//! A single `RwLock` over the whole state makes every operation globally
//! linearizable; in particular the aggregate co-updates (action append +
//! count, anomaly insert + anomalyCount, task outcome + task counters)
//! happen inside one critical section, so no reader can observe one
//! without the other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::action::{ActionFilter, ActionRecord};
use crate::anomaly::AnomalyRecord;
use crate::task::{Task, TaskPatch, TaskStatus};
use crate::trust::AgentTrustAggregate;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct StoreState {
    /// projectId -> append-only action log, in ingestion order.
    actions: HashMap<String, Vec<ActionRecord>>,
    /// Global task map; projectId is a field, not an index.
    tasks: HashMap<Uuid, Task>,
    /// (projectId, agentId) -> aggregate, lazily created on first action.
    aggregates: HashMap<(String, String), AgentTrustAggregate>,
    /// projectId -> anomalies, in detection order.
    anomalies: HashMap<String, Vec<AnomalyRecord>>,
}

/// Everything the audit export returns for one project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub actions: Vec<ActionRecord>,
    pub tasks: Vec<Task>,
    pub anomalies: Vec<AnomalyRecord>,
}

#[derive(Debug, Default)]
pub struct Store {
    state: RwLock<StoreState>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of actions and update the trust aggregate of every
    /// agent appearing in it. All-or-nothing: the append and the aggregate
    /// updates are observed together.
    pub async fn add_actions(&self, project_id: &str, records: Vec<ActionRecord>) {
        if records.is_empty() {
            return;
        }
        let now = Utc::now();

        let mut tallies: HashMap<String, (u64, u64)> = HashMap::new();
        for record in &records {
            let tally = tallies.entry(record.agent_id.clone()).or_default();
            tally.0 += 1;
            if record.is_transaction() {
                tally.1 += 1;
            }
        }

        let mut state = self.state.write().await;
        state
            .actions
            .entry(project_id.to_string())
            .or_default()
            .extend(records);
        for (agent_id, (actions, transactions)) in tallies {
            let aggregate = state
                .aggregates
                .entry((project_id.to_string(), agent_id))
                .or_insert_with(|| AgentTrustAggregate::new(now));
            aggregate.action_count += actions;
            aggregate.transaction_count += transactions;
            aggregate.last_updated = now;
        }
    }

    /// Filtered snapshot of a project's action log.
    pub async fn get_actions(&self, project_id: &str, filter: &ActionFilter) -> Vec<ActionRecord> {
        let state = self.state.read().await;
        state
            .actions
            .get(project_id)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|action| filter.matches(action))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of actions recorded for an agent at or after `cutoff`.
    pub async fn count_actions_since(
        &self,
        project_id: &str,
        agent_id: &str,
        cutoff: DateTime<Utc>,
    ) -> u64 {
        let state = self.state.read().await;
        state
            .actions
            .get(project_id)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|action| action.agent_id == agent_id && action.timestamp >= cutoff)
                    .count() as u64
            })
            .unwrap_or(0)
    }

    pub async fn add_task(&self, task: Task) {
        let mut state = self.state.write().await;
        state.tasks.insert(task.id, task);
    }

    /// Read a task, lazily transitioning it to `expired` when its expiry
    /// instant has passed. Tasks belonging to other projects are invisible.
    pub async fn get_task(&self, project_id: &str, task_id: Uuid) -> Option<Task> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&task_id)?;
        if task.project_id != project_id {
            return None;
        }
        expire_if_due(task, now);
        Some(task.clone())
    }

    /// Apply a partial update; returns the new state, or `None` if the task
    /// does not exist in this project.
    pub async fn update_task(
        &self,
        project_id: &str,
        task_id: Uuid,
        patch: TaskPatch,
    ) -> Option<Task> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&task_id)?;
        if task.project_id != project_id {
            return None;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(correlation_id) = patch.correlation_id {
            task.correlation_id = correlation_id;
        }
        if let Some(metadata) = patch.metadata {
            task.metadata = metadata;
        }
        task.updated_at = now;
        Some(task.clone())
    }

    /// All tasks in a project, optionally filtered by status, newest first.
    /// Expiration is applied before the status filter.
    pub async fn get_tasks(&self, project_id: &str, status: Option<TaskStatus>) -> Vec<Task> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values_mut()
            .filter(|task| task.project_id == project_id)
            .map(|task| {
                expire_if_due(task, now);
                task.clone()
            })
            .filter(|task| status.is_none_or(|wanted| task.status == wanted))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Confirm a pending task with the supplied evidence.
    ///
    /// The status change and the agent's `confirmedTasks` debit are atomic.
    pub async fn confirm_task(
        &self,
        project_id: &str,
        task_id: Uuid,
        evidence: Map<String, Value>,
    ) -> Result<Task> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let StoreState {
            tasks, aggregates, ..
        } = &mut *state;

        let task = tasks
            .get_mut(&task_id)
            .filter(|task| task.project_id == project_id)
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        expire_if_due(task, now);
        ensure_pending(task)?;
        task.validate_evidence(&evidence)?;

        task.status = TaskStatus::Confirmed;
        task.provided_evidence = Some(evidence);
        task.confirmed_at = Some(now);
        task.updated_at = now;

        if let Some(aggregate) =
            aggregates.get_mut(&(project_id.to_string(), task.agent_id.clone()))
        {
            aggregate.confirmed_tasks += 1;
            aggregate.last_updated = now;
        }

        Ok(task.clone())
    }

    /// Fail a pending task. The status change and the agent's `failedTasks`
    /// debit are atomic.
    pub async fn fail_task(
        &self,
        project_id: &str,
        task_id: Uuid,
        reason: Option<String>,
    ) -> Result<Task> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let StoreState {
            tasks, aggregates, ..
        } = &mut *state;

        let task = tasks
            .get_mut(&task_id)
            .filter(|task| task.project_id == project_id)
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        expire_if_due(task, now);
        ensure_pending(task)?;

        task.status = TaskStatus::Failed;
        task.updated_at = now;
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            if !task.metadata.is_object() {
                task.metadata = Value::Object(Map::new());
            }
            if let Some(fields) = task.metadata.as_object_mut() {
                fields.insert("failureReason".to_string(), Value::String(reason));
            }
        }

        if let Some(aggregate) =
            aggregates.get_mut(&(project_id.to_string(), task.agent_id.clone()))
        {
            aggregate.failed_tasks += 1;
            aggregate.last_updated = now;
        }

        Ok(task.clone())
    }

    /// The aggregate for an agent, or `None`. Never allocates one.
    pub async fn get_trust_aggregate(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Option<AgentTrustAggregate> {
        let state = self.state.read().await;
        state
            .aggregates
            .get(&(project_id.to_string(), agent_id.to_string()))
            .cloned()
    }

    /// Record an anomaly. If the agent already has a trust aggregate its
    /// `anomalyCount` is debited in the same critical section; no aggregate
    /// is created otherwise.
    pub async fn add_anomaly(&self, project_id: &str, anomaly: AnomalyRecord) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let agent_id = anomaly.agent_id.clone();
        state
            .anomalies
            .entry(project_id.to_string())
            .or_default()
            .push(anomaly);
        if let Some(aggregate) = state
            .aggregates
            .get_mut(&(project_id.to_string(), agent_id))
        {
            aggregate.anomaly_count += 1;
            aggregate.last_updated = now;
        }
    }

    /// Assemble the audit export: actions, tasks, and anomalies matching
    /// the filter. Tasks are matched on `createdAt`, anomalies on
    /// `detectedAt`; the type filter applies to actions only.
    pub async fn export_data(&self, project_id: &str, filter: &ActionFilter) -> ExportData {
        let state = self.state.read().await;

        let actions = state
            .actions
            .get(project_id)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|action| filter.matches(action))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| {
                task.project_id == project_id
                    && filter
                        .agent_id
                        .as_ref()
                        .is_none_or(|agent| &task.agent_id == agent)
                    && filter.matches_range(task.created_at)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let anomalies = state
            .anomalies
            .get(project_id)
            .map(|anomalies| {
                anomalies
                    .iter()
                    .filter(|anomaly| {
                        filter
                            .agent_id
                            .as_ref()
                            .is_none_or(|agent| &anomaly.agent_id == agent)
                            && filter.matches_range(anomaly.detected_at)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        ExportData {
            actions,
            tasks,
            anomalies,
        }
    }
}

fn expire_if_due(task: &mut Task, now: DateTime<Utc>) {
    if task.is_past_expiry(now) {
        task.status = TaskStatus::Expired;
        task.updated_at = now;
    }
}

fn ensure_pending(task: &Task) -> Result<()> {
    match task.status {
        TaskStatus::Pending => Ok(()),
        TaskStatus::Confirmed => Err(Error::Conflict("Task already confirmed".to_string())),
        TaskStatus::Failed => Err(Error::Conflict("Task already failed".to_string())),
        TaskStatus::Expired => Err(Error::Expired),
    }
}
