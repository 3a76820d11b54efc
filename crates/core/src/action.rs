//! Action log model
//!
//! Actions are immutable, append-only log entries recorded by agents. A
//! `transaction`-typed action is the distinguished value-movement variant.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// The distinguished action type for value movements.
pub const TRANSACTION_TYPE: &str = "transaction";

/// An immutable agent action log entry.
///
/// Transaction-typed records additionally carry `txHash`, `chain`, `amount`,
/// `token`, `from`, and `to` among their free-form fields; amounts stay
/// decimal strings and are parsed at use sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionRecord {
    pub fn is_transaction(&self) -> bool {
        self.action_type == TRANSACTION_TYPE
    }
}

/// An action as submitted by a client. `id`, `type`, and `agentId` are
/// required; the server fills `timestamp` when absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewAction {
    /// Validate the submission and bind it to a project.
    pub fn into_record(mut self, project_id: &str, now: DateTime<Utc>) -> Result<ActionRecord> {
        // A client-sent projectId would collide with the bound field on
        // serialization; the header-resolved project always wins.
        self.extra.remove("projectId");
        let id = non_empty(self.id)
            .ok_or_else(|| Error::InvalidInput("Each action requires an id".to_string()))?;
        let action_type = non_empty(self.action_type)
            .ok_or_else(|| Error::InvalidInput("Each action requires a type".to_string()))?;
        let agent_id = non_empty(self.agent_id)
            .ok_or_else(|| Error::InvalidInput("Each action requires an agentId".to_string()))?;

        Ok(ActionRecord {
            id,
            timestamp: self.timestamp.unwrap_or(now),
            project_id: project_id.to_string(),
            agent_id,
            correlation_id: self.correlation_id.unwrap_or_default(),
            action_type,
            description: self.description.unwrap_or_default(),
            metadata: self.metadata.unwrap_or(Value::Null),
            extra: self.extra,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Filter applied to action reads and exports. Date bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub agent_id: Option<String>,
    pub action_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl ActionFilter {
    pub fn matches(&self, action: &ActionRecord) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &action.agent_id != agent_id {
                return false;
            }
        }
        if let Some(action_type) = &self.action_type {
            if &action.action_type != action_type {
                return false;
            }
        }
        self.matches_range(action.timestamp)
    }

    /// Apply only the date bounds, for entities keyed on other timestamps.
    pub fn matches_range(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Parse a client-supplied timestamp: RFC3339, or a bare date taken as
/// midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = raw.parse::<NaiveDate>().ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::from_naive_utc_and_offset(midnight, Utc))
}
