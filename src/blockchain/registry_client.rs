// src/blockchain/registry_client.rs
//! User registry client implementation.
//!
//! Read-only access to the on-chain `UserRegistry` contract, which holds each
//! subject's registered attributes and the certificates issuing authorities
//! have recorded for them. Implements [`IdentityLedger`] so the verifier can
//! resolve subjects without knowing about RPC or ABI details.

use crate::models::subject::{AccountId, CertificateRecord, SubjectRecord};
use crate::services::identity_resolver::{IdentityLedger, LedgerError};
use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers_contract::{BaseContract, Contract, ContractError};
use ethers_core::{
    abi::{Abi, Detokenize, Tokenize},
    types::{Address, U256},
};
use std::sync::Arc;
use thiserror::Error;

/// Row returned by `getUserData(address)`.
type SubjectRow = (String, String, String, String, String, u8, bool);

/// Element of the array returned by `getUserCertificates(address)`.
type CertificateRow = (Address, Address, String, String, String, String, u8, bool, U256);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid RPC endpoint {url}: {reason}")]
    InvalidRpcUrl { url: String, reason: String },

    #[error("failed to load registry ABI: {0}")]
    Abi(#[from] ethers_core::abi::Error),
}

/// Registry client bound to one deployed `UserRegistry` contract.
///
/// This client provides:
/// - Subject attribute reads (`getUserData`)
/// - Certificate reads (`getUserCertificates`)
/// - Decoding of registry rows into domain records
#[derive(Clone)]
pub struct RegistryClient {
    /// Registry contract bound to an HTTP JSON-RPC provider
    contract: Contract<Provider<Http>>,
}

impl RegistryClient {
    /// Creates a new registry client.
    ///
    /// # Arguments
    /// * `rpc_url` - JSON-RPC endpoint URL
    /// * `registry_address` - Address of the deployed UserRegistry contract
    ///
    /// # Errors
    /// Returns error if the RPC URL cannot be parsed or the bundled ABI fails to load
    pub fn new(rpc_url: &str, registry_address: Address) -> Result<Self, RegistryError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| RegistryError::InvalidRpcUrl {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;
        let abi = Abi::load(&include_bytes!("abi/UserRegistry.json")[..])?;
        let contract = Contract::new(registry_address, BaseContract::from(abi), Arc::new(provider));
        Ok(Self { contract })
    }

    /// Address of the registry this client reads from.
    pub fn registry_address(&self) -> Address {
        self.contract.address()
    }

    /// Queries the registry (read-only operation).
    ///
    /// # Arguments
    /// * `method` - Contract function name
    /// * `params` - Function arguments
    ///
    /// # Returns
    /// Decoded return value, or `Decode` if the registry answered with data
    /// that does not match the ABI and `Unavailable` for any RPC failure
    async fn query_contract<R: Detokenize + Send + Sync>(
        &self,
        method: &str,
        params: impl Tokenize,
    ) -> Result<R, LedgerError> {
        log::debug!("Calling {} on registry {:?}", method, self.registry_address());
        self.contract
            .method::<_, R>(method, params)
            .map_err(|e| LedgerError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(|e| match e {
                ContractError::DetokenizationError(e) => LedgerError::Decode(e.to_string()),
                ContractError::AbiError(e) => LedgerError::Decode(e.to_string()),
                other => LedgerError::Unavailable(other.to_string()),
            })
    }
}

/// Converts a `getUserData` row; a zeroed row means the address never registered.
fn subject_from_row(row: SubjectRow) -> Option<SubjectRecord> {
    let (name, dob, gender, physical_address, mobile_number, role, is_verified) = row;
    let record = SubjectRecord {
        name,
        dob,
        gender,
        physical_address,
        mobile_number,
        role: role.into(),
        is_verified,
    };
    (!record.is_unregistered()).then_some(record)
}

fn certificate_from_row(row: CertificateRow) -> CertificateRecord {
    let (subject, issuer, certificate_id, issuance_date, content_hash, metadata_hash, certificate_type, is_verified, timestamp) = row;
    CertificateRecord {
        subject_id: subject.into(),
        issuer_id: issuer.into(),
        certificate_id,
        issuance_date,
        content_hash,
        metadata_hash,
        certificate_type: certificate_type.into(),
        is_verified,
        // Block timestamps fit in u64; anything larger is saturated.
        issued_at: if timestamp > U256::from(u64::MAX) { u64::MAX } else { timestamp.as_u64() },
    }
}

#[async_trait]
impl IdentityLedger for RegistryClient {
    async fn get_subject(&self, subject: AccountId) -> Result<Option<SubjectRecord>, LedgerError> {
        let row: SubjectRow = self.query_contract("getUserData", subject.address()).await?;
        Ok(subject_from_row(row))
    }

    async fn get_certificates(&self, subject: AccountId) -> Result<Vec<CertificateRecord>, LedgerError> {
        let rows: Vec<CertificateRow> = self.query_contract("getUserCertificates", subject.address()).await?;
        log::debug!("Registry returned {} certificate(s) for {}", rows.len(), subject);
        Ok(rows.into_iter().map(certificate_from_row).collect())
    }
}
