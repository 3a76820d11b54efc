//! Per-agent trust aggregates and the trust scorer
//!
//! The store maintains one aggregate per `(projectId, agentId)` pair,
//! lazily created on the agent's first action and updated atomically with
//! the writes it summarises. The scorer derives a bounded 0-100 score from
//! the aggregate on demand and never mutates state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically non-decreasing counters for one agent within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTrustAggregate {
    pub action_count: u64,
    pub transaction_count: u64,
    pub anomaly_count: u64,
    pub confirmed_tasks: u64,
    pub failed_tasks: u64,
    pub last_updated: DateTime<Utc>,
}

impl AgentTrustAggregate {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            action_count: 0,
            transaction_count: 0,
            anomaly_count: 0,
            confirmed_tasks: 0,
            failed_tasks: 0,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Verified,
    High,
    Medium,
    Low,
    Untrusted,
}

impl TrustLevel {
    fn from_score(score: i64) -> Self {
        match score {
            s if s >= 90 => Self::Verified,
            s if s >= 70 => Self::High,
            s if s >= 50 => Self::Medium,
            s if s >= 30 => Self::Low,
            _ => Self::Untrusted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustFactor {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    pub agent_id: String,
    pub score: i64,
    pub level: TrustLevel,
    pub factors: Vec<TrustFactor>,
    pub computed_at: DateTime<Utc>,
}

/// Derive the trust score for an agent from its aggregate, if any.
///
/// An agent with no recorded activity scores a neutral 50 / medium.
pub fn compute_trust_score(
    agent_id: &str,
    aggregate: Option<&AgentTrustAggregate>,
    now: DateTime<Utc>,
) -> TrustScore {
    let Some(aggregate) = aggregate else {
        return TrustScore {
            agent_id: agent_id.to_string(),
            score: 50,
            level: TrustLevel::Medium,
            factors: vec![TrustFactor {
                name: "history_depth".to_string(),
                score: 10.0,
                weight: 0.2,
                description: "No recorded activity".to_string(),
            }],
            computed_at: now,
        };
    };

    let history_score = (aggregate.action_count as f64 * 2.0).min(100.0);
    let anomaly_penalty = aggregate.anomaly_count as f64 * 10.0;
    let task_bonus = if aggregate.confirmed_tasks > 0 {
        let total = (aggregate.confirmed_tasks + aggregate.failed_tasks) as f64;
        (aggregate.confirmed_tasks as f64 / total) * 30.0
    } else {
        0.0
    };

    let score = (history_score - anomaly_penalty + task_bonus)
        .round()
        .clamp(0.0, 100.0) as i64;

    TrustScore {
        agent_id: agent_id.to_string(),
        score,
        level: TrustLevel::from_score(score),
        factors: vec![
            TrustFactor {
                name: "history_depth".to_string(),
                score: history_score,
                weight: 0.3,
                description: format!("{} recorded actions", aggregate.action_count),
            },
            TrustFactor {
                name: "anomaly_penalty".to_string(),
                score: anomaly_penalty,
                weight: 0.3,
                description: format!("{} anomalies detected", aggregate.anomaly_count),
            },
            TrustFactor {
                name: "task_reliability".to_string(),
                score: task_bonus,
                weight: 0.4,
                description: if aggregate.confirmed_tasks > 0 {
                    format!(
                        "{} of {} tasks confirmed",
                        aggregate.confirmed_tasks,
                        aggregate.confirmed_tasks + aggregate.failed_tasks
                    )
                } else {
                    "No confirmed tasks".to_string()
                },
            },
        ],
        computed_at: now,
    }
}
