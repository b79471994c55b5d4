// src/models/subject.rs
//! Subject identity data as read from the identity ledger.
//!
//! These are transient read copies: the ledger owns the truth, and a
//! verification call resolves a fresh snapshot every time.

use chrono::NaiveDate;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix every account identifier must carry on the wire.
pub const ACCOUNT_PREFIX: &str = "0x";

/// Raised when a string is not a well-formed `0x`-prefixed 20-byte account.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid account identifier `{0}`")]
pub struct InvalidAccountId(pub String);

/// A ledger account (subject or verifier), e.g. `0x2b63…4ddc`.
///
/// Always rendered in lowercase so the same account maps to the same
/// history key and notification channel regardless of input checksum casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(Address);

impl AccountId {
    pub fn address(&self) -> Address {
        self.0
    }
}

impl FromStr for AccountId {
    type Err = InvalidAccountId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // H160 parsing alone would also accept the bare hex form.
        if !trimmed.starts_with(ACCOUNT_PREFIX) {
            return Err(InvalidAccountId(s.to_string()));
        }
        Address::from_str(trimmed)
            .map(AccountId)
            .map_err(|_| InvalidAccountId(s.to_string()))
    }
}

impl TryFrom<String> for AccountId {
    type Error = InvalidAccountId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.to_string()
    }
}

impl From<Address> for AccountId {
    fn from(address: Address) -> Self {
        AccountId(address)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Registry role of an account, stored on-chain as a `uint8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    None,
    User,
    Authority,
    Verifier,
    Admin,
}

impl From<u8> for Role {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Role::User,
            2 => Role::Authority,
            3 => Role::Verifier,
            4 => Role::Admin,
            _ => Role::None,
        }
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> Self {
        match role {
            Role::None => 0,
            Role::User => 1,
            Role::Authority => 2,
            Role::Verifier => 3,
            Role::Admin => 4,
        }
    }
}

/// Snapshot of a subject's registered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    pub name: String,
    /// Date of birth exactly as registered (an HTML date, `YYYY-MM-DD`).
    pub dob: String,
    pub gender: String,
    pub physical_address: String,
    pub mobile_number: String,
    pub role: Role,
    /// Whether an authority approved the subject's own registration.
    pub is_verified: bool,
}

impl SubjectRecord {
    /// Parsed calendar date of birth, `None` if the registered value is
    /// empty or not a valid date.
    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        let raw = self.dob.trim();
        // Some clients submit a full ISO timestamp instead of the bare date.
        let date_part = raw.split('T').next().unwrap_or(raw);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }

    /// The registry answers unknown accounts with a zeroed record rather
    /// than reverting.
    pub fn is_unregistered(&self) -> bool {
        self.role == Role::None && self.name.is_empty() && self.dob.is_empty()
    }
}

/// Kind of credential a certificate attests to, stored on-chain as a `uint8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateType {
    Income,
    Address,
    Identity,
    Education,
    Employment,
    Other,
}

impl From<u8> for CertificateType {
    fn from(raw: u8) -> Self {
        match raw {
            0 => CertificateType::Income,
            1 => CertificateType::Address,
            2 => CertificateType::Identity,
            3 => CertificateType::Education,
            4 => CertificateType::Employment,
            _ => CertificateType::Other,
        }
    }
}

impl From<CertificateType> for u8 {
    fn from(kind: CertificateType) -> Self {
        match kind {
            CertificateType::Income => 0,
            CertificateType::Address => 1,
            CertificateType::Identity => 2,
            CertificateType::Education => 3,
            CertificateType::Employment => 4,
            CertificateType::Other => 5,
        }
    }
}

/// One credential issued to a subject by an authority.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRecord {
    pub subject_id: AccountId,
    pub issuer_id: AccountId,
    /// Unique per (subject, issuer) pair.
    pub certificate_id: String,
    pub issuance_date: String,
    /// Content reference for the off-ledger certificate document.
    pub content_hash: String,
    /// Free text or JSON-encoded metadata, e.g. `{"amount": "40000"}`.
    pub metadata_hash: String,
    pub certificate_type: CertificateType,
    pub is_verified: bool,
    /// Block timestamp (unix seconds) at which the certificate was recorded.
    pub issued_at: u64,
}
