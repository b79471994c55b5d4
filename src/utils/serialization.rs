// src/utils/serialization.rs
//! Serialization utilities for the verification service.
//!
//! Provides serialization and deserialization functions for:
//! - JSON data structures
//! - Base64-wrapped JSON documents (proof tokens)
//! - Number normalization for echoed condition values

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure while decoding a base64-wrapped JSON document.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("JSON decoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a value to a JSON string.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Returns
/// - `Ok(String)` with JSON representation on success
/// - `Err(serde_json::Error)` if serialization fails
pub fn serialize<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(data)
}

/// Serializes a value to JSON and wraps it in standard base64.
pub fn encode_base64_json<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serialize(data).map(base64::encode)
}

/// Reverses [`encode_base64_json`].
pub fn decode_base64_json<T: DeserializeOwned>(data: &str) -> Result<T, DecodeError> {
    let bytes = base64::decode(data.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Renders a numeric value as a JSON number, using the integer form when
/// the value is integral so `18` is echoed back as `18` rather than `18.0`.
pub fn json_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
