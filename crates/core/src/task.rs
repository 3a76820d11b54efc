//! Confirmation task model
//!
//! A task is a unit of work requiring human or agent confirmation. Each task
//! carries a required-evidence contract: confirmation succeeds only when the
//! supplied evidence covers every required key with a non-null value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

/// Default task lifetime: 24 hours.
pub const DEFAULT_EXPIRES_IN_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub project_id: String,
    pub agent_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    pub status: TaskStatus,
    pub required_evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_evidence: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A task as submitted by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub required_evidence: Option<Vec<String>>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub expires_in_ms: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Task {
    /// Validate a submission and create a pending task bound to a project.
    pub fn create(project_id: &str, input: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let description = input
            .description
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("description is required".to_string()))?;
        let agent_id = input
            .agent_id
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("agentId is required".to_string()))?;
        let required_evidence = input
            .required_evidence
            .filter(|keys| !keys.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput("requiredEvidence must be a non-empty list".to_string())
            })?;

        let expires_in_ms = match input.expires_in_ms {
            Some(ms) if ms <= 0 => {
                return Err(Error::InvalidInput(
                    "expiresInMs must be positive".to_string(),
                ))
            }
            Some(ms) => ms,
            None => DEFAULT_EXPIRES_IN_MS,
        };

        Ok(Task {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            agent_id,
            description,
            correlation_id: input.correlation_id.unwrap_or_default(),
            status: TaskStatus::Pending,
            required_evidence,
            provided_evidence: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            expires_at: now + Duration::milliseconds(expires_in_ms),
            metadata: input.metadata.unwrap_or(Value::Null),
        })
    }

    /// Whether a still-pending task has passed its expiry instant.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && now >= self.expires_at
    }

    /// Check the supplied evidence against the task's contract.
    ///
    /// A required key that is absent or maps to null counts as missing.
    /// Extra keys are permitted.
    pub fn validate_evidence(&self, evidence: &Map<String, Value>) -> Result<()> {
        let missing: Vec<String> = self
            .required_evidence
            .iter()
            .filter(|key| matches!(evidence.get(key.as_str()), None | Some(Value::Null)))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingEvidence(missing))
        }
    }
}

/// Partial update applied through `Store::update_task`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}
