// src/services/identity_resolver.rs
//! Identity Ledger port and the resolver that reads through it.
//!
//! The ledger is an external, read-only source of truth for subject
//! attributes and certificates. The resolver bounds every read with a
//! timeout so a hung ledger cannot hang a verification request.

use crate::models::subject::{AccountId, CertificateRecord, SubjectRecord};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an [`IdentityLedger`] implementation.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport or node failure (connection refused, RPC error, revert).
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger answered with data that could not be decoded.
    #[error("unexpected ledger response: {0}")]
    Decode(String),
}

/// Read port onto the identity ledger.
#[async_trait]
pub trait IdentityLedger: Send + Sync {
    /// Subject attributes, `Ok(None)` when the ledger has no such subject.
    async fn get_subject(&self, subject: AccountId) -> Result<Option<SubjectRecord>, LedgerError>;

    /// All certificates recorded for the subject, possibly none.
    async fn get_certificates(&self, subject: AccountId) -> Result<Vec<CertificateRecord>, LedgerError>;
}

/// Resolution failure, as seen by the orchestrator and HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("User not found")]
    SubjectNotFound(AccountId),

    #[error("Request timeout")]
    LedgerTimeout(Duration),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Reads subject data from the ledger with a bounded wait.
#[derive(Clone)]
pub struct IdentityResolver {
    ledger: Arc<dyn IdentityLedger>,
    timeout: Duration,
}

impl IdentityResolver {
    pub fn new(ledger: Arc<dyn IdentityLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Fetches the subject's attribute record.
    ///
    /// # Errors
    /// - `SubjectNotFound` if the ledger confirms the subject is absent
    /// - `LedgerTimeout` if the ledger does not answer within the bound
    /// - `Ledger` for any other ledger failure
    pub async fn resolve_subject(&self, subject: AccountId) -> Result<SubjectRecord, ResolveError> {
        self.bounded(self.ledger.get_subject(subject))
            .await?
            .ok_or(ResolveError::SubjectNotFound(subject))
    }

    /// Fetches the subject's certificates; an empty list is a valid answer.
    pub async fn resolve_certificates(&self, subject: AccountId) -> Result<Vec<CertificateRecord>, ResolveError> {
        self.bounded(self.ledger.get_certificates(subject)).await
    }

    async fn bounded<T, F>(&self, read: F) -> Result<T, ResolveError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.timeout, read).await {
            Ok(result) => result.map_err(ResolveError::from),
            Err(_) => {
                log::warn!("Ledger read exceeded {:?}", self.timeout);
                Err(ResolveError::LedgerTimeout(self.timeout))
            }
        }
    }
}
