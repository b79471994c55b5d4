// src/services/evaluator.rs
//! Condition evaluation.
//!
//! Pure functions from resolved subject data and one declared condition to a
//! verdict plus the value the verdict was based on. Nothing here fails: a
//! certificate whose metadata cannot be read is skipped as a modeled outcome,
//! and a subject without a usable date of birth fails the age check.

use crate::models::condition::Condition;
use crate::models::subject::{CertificateRecord, SubjectRecord};
use crate::utils::serialization::json_number;
use chrono::{Datelike, NaiveDate};
use serde_json::Value;

/// Verdict for one condition and the subject-side value it compared.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verified: bool,
    pub value: Value,
}

/// What reading one certificate's metadata produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataAmount {
    Amount(f64),
    Skipped(String),
}

/// Resolved data a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct SubjectData<'a> {
    pub subject: &'a SubjectRecord,
    pub certificates: &'a [CertificateRecord],
}

/// Whole years between `dob` and `today`, one less if this year's birthday
/// has not been reached yet.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Reads the `amount` field of a certificate's JSON metadata.
///
/// Numbers and numeric strings count; both are truncated to whole units.
pub fn certificate_amount(certificate: &CertificateRecord) -> MetadataAmount {
    let metadata: Value = match serde_json::from_str(&certificate.metadata_hash) {
        Ok(metadata) => metadata,
        Err(e) => return MetadataAmount::Skipped(format!("metadata is not JSON: {}", e)),
    };
    let amount = match metadata.get("amount") {
        Some(Value::Number(n)) => n.as_f64().map(f64::trunc),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(f64::trunc),
        Some(_) => None,
        None => return MetadataAmount::Skipped("metadata has no amount".into()),
    };
    match amount.filter(|a| a.is_finite()) {
        Some(amount) => MetadataAmount::Amount(amount),
        None => MetadataAmount::Skipped("amount is not a number".into()),
    }
}

/// Highest readable amount across all certificates, 0 when none is readable.
pub fn highest_income(certificates: &[CertificateRecord]) -> f64 {
    certificates
        .iter()
        .filter_map(|certificate| match certificate_amount(certificate) {
            MetadataAmount::Amount(amount) => Some(amount),
            MetadataAmount::Skipped(reason) => {
                log::debug!(
                    "Skipping certificate {} for income: {}",
                    certificate.certificate_id,
                    reason
                );
                None
            }
        })
        .fold(0.0, f64::max)
}

/// Evaluates a single condition.
///
/// # Arguments
/// * `condition` - The declared condition
/// * `data` - Resolved subject record and certificates
/// * `today` - Calendar date age is derived against
pub fn evaluate(condition: &Condition, data: SubjectData<'_>, today: NaiveDate) -> Evaluation {
    match condition {
        Condition::Age { operator, value } => match data.subject.date_of_birth() {
            Some(dob) => {
                let age = age_on(dob, today);
                Evaluation {
                    verified: operator.compare(f64::from(age), *value),
                    value: Value::from(age),
                }
            }
            None => Evaluation {
                verified: false,
                value: Value::Null,
            },
        },
        Condition::Income { operator, value } => {
            let income = highest_income(data.certificates);
            Evaluation {
                verified: operator.compare(income, *value),
                value: json_number(income),
            }
        }
        Condition::City { value } => {
            let address = &data.subject.physical_address;
            Evaluation {
                verified: address.to_lowercase().contains(&value.to_lowercase()),
                value: Value::String(address.clone()),
            }
        }
        // No education source is wired to the ledger yet.
        Condition::Education { .. } => Evaluation {
            verified: false,
            value: Value::Null,
        },
    }
}
