// src/models/condition.rs
//! Verifier-declared conditions and request validation.
//!
//! A verifier asks for facts about a subject as a set of typed conditions,
//! one per attribute kind. The raw request arrives as loosely-typed JSON;
//! this module turns it into a validated [`VerificationRequest`] or a
//! [`ValidationError`] naming the offending field, without touching the
//! ledger.

use crate::models::subject::AccountId;
use crate::utils::serialization::json_number;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Comparison operator declared with a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equals,
}

impl Operator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "greaterThan" => Some(Operator::GreaterThan),
            "lessThan" => Some(Operator::LessThan),
            "equals" => Some(Operator::Equals),
            _ => None,
        }
    }

    /// Numeric comparison `a <op> b`.
    pub fn compare(&self, a: f64, b: f64) -> bool {
        match self {
            Operator::GreaterThan => a > b,
            Operator::LessThan => a < b,
            Operator::Equals => a == b,
        }
    }
}

/// Attribute a condition is declared on. Ordering follows the wire
/// declaration order and drives the order of results and audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Age,
    Income,
    City,
    Education,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 4] = [
        AttributeKind::Age,
        AttributeKind::Income,
        AttributeKind::City,
        AttributeKind::Education,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Age => "age",
            AttributeKind::Income => "income",
            AttributeKind::City => "city",
            AttributeKind::Education => "education",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validated requirement.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Age { operator: Operator, value: f64 },
    Income { operator: Operator, value: f64 },
    /// Containment check against the subject's address.
    City { value: String },
    Education { value: String },
}

impl Condition {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Condition::Age { .. } => AttributeKind::Age,
            Condition::Income { .. } => AttributeKind::Income,
            Condition::City { .. } => AttributeKind::City,
            Condition::Education { .. } => AttributeKind::Education,
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Condition::Age { operator, .. } | Condition::Income { operator, .. } => *operator,
            Condition::City { .. } | Condition::Education { .. } => Operator::Equals,
        }
    }

    /// The wire form `{value, operator}` of this condition.
    pub fn spec(&self) -> ConditionSpec {
        let value = match self {
            Condition::Age { value, .. } | Condition::Income { value, .. } => json_number(*value),
            Condition::City { value } | Condition::Education { value } => Value::String(value.clone()),
        };
        ConditionSpec {
            value,
            operator: self.operator(),
        }
    }

    /// Human-readable one-liner used in audit entries and notifications.
    pub fn describe(&self) -> String {
        match self {
            Condition::Age { operator, value } => {
                format!("age {} {}", describe_operator(*operator), json_number(*value))
            }
            Condition::Income { operator, value } => {
                format!("income {} {}", describe_operator(*operator), json_number(*value))
            }
            Condition::City { value } => format!("city contains \"{}\"", value),
            Condition::Education { value } => format!("education equals \"{}\"", value),
        }
    }
}

fn describe_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::GreaterThan => "greater than",
        Operator::LessThan => "less than",
        Operator::Equals => "equals",
    }
}

/// Wire form of a condition, as embedded in proofs and stored for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub value: Value,
    pub operator: Operator,
}

/// Declared conditions, at most one per attribute kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    conditions: BTreeMap<AttributeKind, Condition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a condition, replacing any earlier one of the same kind.
    pub fn insert(&mut self, condition: Condition) {
        self.conditions.insert(condition.kind(), condition);
    }

    pub fn get(&self, kind: AttributeKind) -> Option<&Condition> {
        self.conditions.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Only income evaluation reads certificates.
    pub fn needs_certificates(&self) -> bool {
        self.conditions.contains_key(&AttributeKind::Income)
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut set = ConditionSet::new();
        for condition in iter {
            set.insert(condition);
        }
        set
    }
}

impl Serialize for ConditionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.conditions.iter().map(|(kind, condition)| (kind, condition.spec())))
    }
}

/// Request validation failure. Never involves a ledger call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid {label} format")]
    InvalidIdentifier {
        field: &'static str,
        label: &'static str,
        value: String,
    },

    #[error("Invalid {kind} condition: {reason}")]
    InvalidCondition { kind: AttributeKind, reason: String },

    #[error("Invalid request body: {0}")]
    MalformedBody(String),
}

impl ValidationError {
    /// Wire field the error is attached to, e.g. `userAddress` or
    /// `conditions.income`.
    pub fn field(&self) -> String {
        match self {
            ValidationError::InvalidIdentifier { field, .. } => field.to_string(),
            ValidationError::InvalidCondition { kind, .. } => format!("conditions.{}", kind),
            ValidationError::MalformedBody(_) => "body".to_string(),
        }
    }

    /// Field-keyed messages for the error envelope's `validation` object.
    pub fn field_errors(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([(self.field(), vec![self.to_string()])])
    }
}

/// Parses a wire account identifier, reporting failures against `field`.
pub fn parse_account(
    field: &'static str,
    label: &'static str,
    raw: Option<&str>,
) -> Result<AccountId, ValidationError> {
    let raw = raw.unwrap_or_default();
    raw.parse().map_err(|_| ValidationError::InvalidIdentifier {
        field,
        label,
        value: raw.to_string(),
    })
}

/// `POST /verify` body as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVerificationRequest {
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub verifier_id: Option<String>,
    #[serde(default)]
    pub conditions: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A validated verification request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub subject: AccountId,
    pub verifier: AccountId,
    pub conditions: ConditionSet,
    /// Caller-side request time, kept for audit only.
    pub requested_at: Option<String>,
}

impl TryFrom<RawVerificationRequest> for VerificationRequest {
    type Error = ValidationError;

    fn try_from(raw: RawVerificationRequest) -> Result<Self, Self::Error> {
        let subject = parse_account("userAddress", "user address", raw.user_address.as_deref())?;
        let verifier = parse_account("verifierId", "verifier ID", raw.verifier_id.as_deref())?;

        let mut conditions = ConditionSet::new();
        if let Some(declared) = raw.conditions {
            for (key, body) in declared {
                let Some(kind) = AttributeKind::ALL.into_iter().find(|k| k.as_str() == key) else {
                    log::debug!("Ignoring condition on unsupported attribute `{}`", key);
                    continue;
                };
                if body.is_null() {
                    continue;
                }
                conditions.insert(parse_condition(kind, &body)?);
            }
        }

        Ok(Self {
            subject,
            verifier,
            conditions,
            requested_at: raw.timestamp,
        })
    }
}

fn parse_condition(kind: AttributeKind, body: &Value) -> Result<Condition, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidCondition {
        kind,
        reason: reason.to_string(),
    };

    let object = body.as_object().ok_or_else(|| invalid("expected an object with `value` and `operator`"))?;
    let operator = match object.get("operator") {
        Some(Value::String(raw)) => Some(Operator::parse(raw).ok_or_else(|| invalid("unknown operator"))?),
        None | Some(Value::Null) => None,
        Some(_) => return Err(invalid("operator must be a string")),
    };
    let value = object.get("value").ok_or_else(|| invalid("missing value"))?;

    match kind {
        AttributeKind::Age | AttributeKind::Income => {
            let operator = operator.ok_or_else(|| invalid("missing operator"))?;
            let value = parse_numeric(value).ok_or_else(|| invalid("value must be a number"))?;
            Ok(if kind == AttributeKind::Age {
                Condition::Age { operator, value }
            } else {
                Condition::Income { operator, value }
            })
        }
        AttributeKind::City | AttributeKind::Education => {
            // Text attributes match by containment; `equals` is implied when omitted.
            if operator.unwrap_or(Operator::Equals) != Operator::Equals {
                return Err(invalid("only the `equals` operator is supported"));
            }
            let value = value.as_str().ok_or_else(|| invalid("value must be a string"))?.to_string();
            Ok(if kind == AttributeKind::City {
                Condition::City { value }
            } else {
                Condition::Education { value }
            })
        }
    }
}

/// Accepts JSON numbers and numeric strings; rejects non-finite values.
fn parse_numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
