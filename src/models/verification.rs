// src/models/verification.rs
//! Verification outcomes, the persisted audit record, and the shapes
//! delivered to callers and live verifier sessions.

use crate::models::condition::{AttributeKind, Condition, ConditionSet, Operator};
use crate::models::subject::AccountId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-condition verdict plus its audit token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub verified: bool,
    pub proof: String,
}

/// Outcomes keyed by attribute kind. Only declared kinds have an entry.
pub type Outcomes = BTreeMap<AttributeKind, EvaluationOutcome>;

/// Logical AND over all outcomes; vacuously true when nothing was declared.
pub fn aggregate(outcomes: &Outcomes) -> bool {
    outcomes.values().all(|outcome| outcome.verified)
}

/// What a verification call returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub success: bool,
    pub results: Outcomes,
    pub user_address: AccountId,
    pub verifier_id: AccountId,
    pub timestamp: String,
}

/// Display/audit entry derived from one evaluated condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofEntry {
    pub id: Uuid,
    pub verification_type: AttributeKind,
    pub condition: String,
    pub value: Value,
    pub operator: Operator,
    pub verified: bool,
    pub proof: String,
}

/// One completed verification, created once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub id: Uuid,
    pub user_address: AccountId,
    pub verifier_id: AccountId,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub conditions: ConditionSet,
    pub outcomes: Outcomes,
    pub proofs: Vec<ProofEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<String>,
}

impl VerificationRecord {
    /// Builds the record for a finished evaluation, assigning a fresh id.
    pub fn new(
        subject: AccountId,
        verifier: AccountId,
        timestamp: DateTime<Utc>,
        conditions: ConditionSet,
        outcomes: Outcomes,
        requested_at: Option<String>,
    ) -> Self {
        let proofs = conditions
            .iter()
            .filter_map(|condition| {
                outcomes
                    .get(&condition.kind())
                    .map(|outcome| proof_entry(condition, outcome))
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            user_address: subject,
            verifier_id: verifier,
            timestamp,
            success: aggregate(&outcomes),
            conditions,
            outcomes,
            proofs,
            requested_at,
        }
    }

    /// The caller-facing view of this record.
    pub fn to_result(&self) -> VerificationResult {
        VerificationResult {
            success: self.success,
            results: self.outcomes.clone(),
            user_address: self.user_address,
            verifier_id: self.verifier_id,
            timestamp: format_timestamp(&self.timestamp),
        }
    }

    /// Payload of the `new-verification` event.
    pub fn notification(&self) -> NotificationPayload {
        NotificationPayload {
            id: self.id,
            user_address: self.user_address,
            timestamp: format_timestamp(&self.timestamp),
            success: self.success,
            proofs: self
                .proofs
                .iter()
                .map(|entry| NotifiedProof {
                    id: entry.id,
                    verification_type: entry.verification_type,
                    condition: entry.condition.clone(),
                    verified: entry.verified,
                })
                .collect(),
        }
    }
}

fn proof_entry(condition: &Condition, outcome: &EvaluationOutcome) -> ProofEntry {
    let spec = condition.spec();
    ProofEntry {
        id: Uuid::new_v4(),
        verification_type: condition.kind(),
        condition: condition.describe(),
        value: spec.value,
        operator: spec.operator,
        verified: outcome.verified,
        proof: outcome.proof.clone(),
    }
}

/// RFC 3339 with millisecond precision, e.g. `2024-06-15T10:00:00.000Z`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Event body pushed to `verifier-{verifierId}` live sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: Uuid,
    pub user_address: AccountId,
    pub timestamp: String,
    pub success: bool,
    pub proofs: Vec<NotifiedProof>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedProof {
    pub id: Uuid,
    pub verification_type: AttributeKind,
    pub condition: String,
    pub verified: bool,
}
