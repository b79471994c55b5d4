// src/proof/proof_encoder.rs
//! # Proof Tokens
//!
//! Every evaluated condition carries a proof token: a base64-wrapped JSON
//! document recording the compared value, the declared condition, the
//! verdict, a random nonce and the encoding time.
//!
//! The token is an audit/display artifact. It is reversible by anyone who
//! knows the encoding and is not bound to the evaluated value by any
//! commitment, so it must not be treated as a credential or a
//! zero-knowledge proof. The nonce and timestamp make two tokens for the
//! same inputs differ.

use crate::models::condition::ConditionSpec;
use crate::utils::serialization::{decode_base64_json, encode_base64_json, DecodeError};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded contents of a proof token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofPayload {
    /// The subject-side value that was compared (e.g. the derived age).
    pub value: Value,
    pub condition: ConditionSpec,
    pub result: bool,
    pub nonce: u32,
    /// RFC 3339 encoding time.
    pub timestamp: String,
}

/// Encodes a proof token for one evaluated condition.
///
/// # Arguments
/// * `value` - Value the condition was evaluated against, `Value::Null` when
///   no subject data exists for the attribute
/// * `condition` - Wire form of the declared condition
/// * `result` - Verdict of the evaluation
///
/// # Returns
/// Base64 text of the JSON payload
///
/// # Errors
/// Only if JSON serialization fails, which the payload's shape rules out in
/// practice.
pub fn generate_proof(
    value: Value,
    condition: ConditionSpec,
    result: bool,
) -> Result<String, serde_json::Error> {
    let payload = ProofPayload {
        value,
        condition,
        result,
        nonce: rand::thread_rng().gen(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    encode_base64_json(&payload)
}

/// Recovers the payload from a proof token.
pub fn decode_proof(proof: &str) -> Result<ProofPayload, DecodeError> {
    decode_base64_json(proof)
}
