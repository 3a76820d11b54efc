//! Anomaly records and rule evaluation
//!
//! The evaluator screens a candidate transaction against two rules and
//! produces at most one anomaly per rule per invocation. Callers persist
//! the produced records through the store, which also debits the agent's
//! trust aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Amount above which a transaction is flagged as unusually large.
pub const UNUSUAL_AMOUNT_THRESHOLD: f64 = 10_000.0;
/// Actions per trailing hour above which agent activity is a spike.
pub const FREQUENCY_SPIKE_THRESHOLD: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyType {
    UnusualAmount,
    FrequencySpike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub description: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_id: String,
    pub project_id: String,
    pub detected_at: DateTime<Utc>,
    pub data: Value,
    pub reviewed: bool,
}

/// A candidate transaction under screening: the parsed corner of an
/// otherwise free-form request body.
#[derive(Debug, Clone)]
pub struct TransactionCandidate {
    pub agent_id: String,
    pub amount: Option<f64>,
    pub tx_hash: Option<String>,
    /// The full request body, preserved in `unusualAmount` anomaly data.
    pub raw: Value,
}

impl TransactionCandidate {
    /// Pull the screening-relevant fields out of a request body.
    /// `agentId` is required; everything else is optional context.
    pub fn from_body(body: &Value) -> Option<Self> {
        let agent_id = body.get("agentId")?.as_str()?.trim();
        if agent_id.is_empty() {
            return None;
        }
        Some(Self {
            agent_id: agent_id.to_string(),
            amount: body.get("amount").and_then(parse_amount),
            tx_hash: body
                .get("txHash")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw: body.clone(),
        })
    }
}

/// Amounts arrive as JSON numbers or as decimal strings.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Evaluate both rules over a candidate plus its recent-history count.
///
/// `recent_count` is the number of actions recorded for this agent in the
/// trailing hour, as counted by the store.
pub fn evaluate_transaction(
    project_id: &str,
    candidate: &TransactionCandidate,
    recent_count: u64,
    now: DateTime<Utc>,
) -> Vec<AnomalyRecord> {
    let mut anomalies = Vec::new();
    let action_id = candidate.tx_hash.clone().unwrap_or_default();

    if let Some(amount) = candidate.amount {
        if amount > UNUSUAL_AMOUNT_THRESHOLD {
            let severity = if amount > 50_000.0 {
                AnomalySeverity::Critical
            } else if amount > 25_000.0 {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            };
            anomalies.push(AnomalyRecord {
                id: Uuid::new_v4(),
                anomaly_type: AnomalyType::UnusualAmount,
                severity,
                description: format!(
                    "Transaction amount {} exceeds the unusual-amount threshold of {}",
                    amount, UNUSUAL_AMOUNT_THRESHOLD
                ),
                agent_id: candidate.agent_id.clone(),
                action_id: action_id.clone(),
                project_id: project_id.to_string(),
                detected_at: now,
                data: candidate.raw.clone(),
                reviewed: false,
            });
        }
    }

    if recent_count > FREQUENCY_SPIKE_THRESHOLD {
        let severity = if recent_count > 100 {
            AnomalySeverity::Critical
        } else if recent_count > 60 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };
        anomalies.push(AnomalyRecord {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::FrequencySpike,
            severity,
            description: format!(
                "{} actions in the last hour exceeds the threshold of {}",
                recent_count, FREQUENCY_SPIKE_THRESHOLD
            ),
            agent_id: candidate.agent_id.clone(),
            action_id,
            project_id: project_id.to_string(),
            detected_at: now,
            data: json!({
                "count": recent_count,
                "threshold": FREQUENCY_SPIKE_THRESHOLD,
            }),
            reviewed: false,
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(amount: Value) -> TransactionCandidate {
        TransactionCandidate::from_body(&json!({
            "agentId": "g1",
            "amount": amount,
            "txHash": "0xabc",
        }))
        .unwrap()
    }

    #[test]
    fn amount_at_threshold_does_not_trigger() {
        let anomalies = evaluate_transaction("p1", &candidate(json!(10_000.00)), 0, Utc::now());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn unusual_amount_severity_tiers() {
        for (amount, severity) in [
            (10_001.0, AnomalySeverity::Medium),
            (25_001.0, AnomalySeverity::High),
            (50_001.0, AnomalySeverity::Critical),
        ] {
            let anomalies = evaluate_transaction("p1", &candidate(json!(amount)), 0, Utc::now());
            assert_eq!(anomalies.len(), 1, "amount {}", amount);
            assert_eq!(anomalies[0].anomaly_type, AnomalyType::UnusualAmount);
            assert_eq!(anomalies[0].severity, severity, "amount {}", amount);
        }
    }

    #[test]
    fn string_amounts_are_parsed() {
        let anomalies = evaluate_transaction("p1", &candidate(json!("60000")), 0, Utc::now());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Critical);
        assert_eq!(anomalies[0].action_id, "0xabc");
    }

    #[test]
    fn unusual_amount_data_is_the_full_body() {
        let anomalies = evaluate_transaction("p1", &candidate(json!(12_000)), 0, Utc::now());
        assert_eq!(anomalies[0].data["txHash"], json!("0xabc"));
        assert_eq!(anomalies[0].data["agentId"], json!("g1"));
    }

    #[test]
    fn thirty_actions_do_not_spike_but_thirty_one_do() {
        let quiet = evaluate_transaction("p1", &candidate(json!(1)), 30, Utc::now());
        assert!(quiet.is_empty());

        let spiking = evaluate_transaction("p1", &candidate(json!(1)), 31, Utc::now());
        assert_eq!(spiking.len(), 1);
        assert_eq!(spiking[0].anomaly_type, AnomalyType::FrequencySpike);
        assert_eq!(spiking[0].severity, AnomalySeverity::Medium);
        assert_eq!(spiking[0].data, json!({"count": 31, "threshold": 30}));
    }

    #[test]
    fn frequency_spike_severity_tiers() {
        for (count, severity) in [
            (31, AnomalySeverity::Medium),
            (61, AnomalySeverity::High),
            (101, AnomalySeverity::Critical),
        ] {
            let anomalies = evaluate_transaction("p1", &candidate(json!(1)), count, Utc::now());
            assert_eq!(anomalies[0].severity, severity, "count {}", count);
        }
    }

    #[test]
    fn both_rules_can_fire_together() {
        let anomalies = evaluate_transaction("p1", &candidate(json!(99_999)), 120, Utc::now());
        assert_eq!(anomalies.len(), 2);
    }

    #[test]
    fn candidate_requires_agent_id() {
        assert!(TransactionCandidate::from_body(&json!({"amount": 5})).is_none());
        assert!(TransactionCandidate::from_body(&json!({"agentId": "  "})).is_none());
    }
}
