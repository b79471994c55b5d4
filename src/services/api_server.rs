// src/services/api_server.rs
//! API Server for the verification service
//!
//! This module provides the HTTP interface verifiers and their live sessions
//! talk to. The API is built using Axum and includes endpoints for:
//! - Condition-based verification of a subject (`POST /verify`)
//! - A verifier's verification history (`GET /verify/history`)
//! - Subject attribute and certificate lookups against the identity ledger
//! - WebSocket subscriptions to live notification channels (`GET /ws/:channel`)

use crate::models::condition::{parse_account, RawVerificationRequest, ValidationError};
use crate::models::subject::{CertificateRecord, SubjectRecord};
use crate::services::envelope::{success, ApiError};
use crate::services::notifier::BroadcastHub;
use crate::services::verifier::Verifier;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

/// Query string of `GET /verify/history`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    verifier_id: Option<String>,
    limit: Option<usize>,
}

/// Response for subject attribute lookup
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDataResponse {
    name: String,
    dob: String,
    gender: String,
    physical_address: String,
    mobile_number: String,
    role: u8,
    is_verified: bool,
}

impl From<SubjectRecord> for UserDataResponse {
    fn from(record: SubjectRecord) -> Self {
        Self {
            name: record.name,
            dob: record.dob,
            gender: record.gender,
            physical_address: record.physical_address,
            mobile_number: record.mobile_number,
            role: record.role.into(),
            is_verified: record.is_verified,
        }
    }
}

/// One certificate in the lookup response, using the registry's field names
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateView {
    user_address: String,
    authority_address: String,
    certificate_id: String,
    issuance_date: String,
    ipfs_hash: String,
    metadata_hash: String,
    certificate_type: u8,
    is_verified: bool,
    timestamp: u64,
}

impl From<CertificateRecord> for CertificateView {
    fn from(record: CertificateRecord) -> Self {
        Self {
            user_address: record.subject_id.to_string(),
            authority_address: record.issuer_id.to_string(),
            certificate_id: record.certificate_id,
            issuance_date: record.issuance_date,
            ipfs_hash: record.content_hash,
            metadata_hash: record.metadata_hash,
            certificate_type: record.certificate_type.into(),
            is_verified: record.is_verified,
            timestamp: record.issued_at,
        }
    }
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    /// Verification orchestrator (owns the ledger, history and notification ports)
    verifier: Arc<Verifier>,

    /// In-process channels live verifier sessions subscribe to
    hub: Arc<BroadcastHub>,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `verifier` - Verification orchestrator
    /// * `hub` - Hub backing the WebSocket endpoint; the verifier's
    ///   notification channel should publish into the same hub
    pub fn new(verifier: Verifier, hub: Arc<BroadcastHub>) -> Self {
        ApiServer {
            verifier: Arc::new(verifier),
            hub,
        }
    }

    /// Builds the route table
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(Self::health_handler))
            .route("/verify", post(Self::verify_handler))
            .route("/verify/history", get(Self::history_handler))
            .route("/user/:address", get(Self::user_handler))
            .route("/certificates/:address", get(Self::certificates_handler))
            .route("/ws/:channel", get(Self::ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and serves requests until the listener fails
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("API server listening on http://{}", addr);
        axum::serve(listener, self.router()).await
    }

    /// Liveness probe
    ///
    /// # Endpoint
    /// GET /
    async fn health_handler() -> impl IntoResponse {
        Json(json!({ "message": "working" }))
    }

    /// Verifies a subject against verifier-declared conditions
    ///
    /// # Endpoint
    /// POST /verify
    ///
    /// # Responses
    /// - 200 OK: Aggregate result with per-condition verdicts and proofs
    /// - 400 Bad Request: Malformed body, identifier or condition
    /// - 404 Not Found: Subject is not registered
    /// - 504 Gateway Timeout: Identity ledger did not answer in time
    /// - 500 Internal Server Error: Any other failure during verification
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        payload: Result<Json<RawVerificationRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let Json(request) = payload.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
        let result = state.verifier.verify(request).await?;
        Ok(success(result))
    }

    /// Lists a verifier's past verifications, newest first
    ///
    /// # Endpoint
    /// GET /verify/history?verifierId=<id>[&limit=<n>]
    ///
    /// # Responses
    /// - 200 OK: Up to 50 records (empty list if none)
    /// - 400 Bad Request: Missing or malformed verifier ID
    async fn history_handler(
        State(state): State<Arc<ApiServer>>,
        query: Result<Query<HistoryQuery>, QueryRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let Query(query) = query.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
        let verifier = parse_account("verifierId", "verifier ID", query.verifier_id.as_deref())?;
        let records = state.verifier.history(verifier, query.limit).await?;
        Ok(success(records))
    }

    /// Fetches a subject's registered attributes
    ///
    /// # Endpoint
    /// GET /user/:address
    ///
    /// # Responses
    /// - 200 OK: Subject attributes
    /// - 400 Bad Request: Malformed address
    /// - 404 Not Found: Subject is not registered
    /// - 504 Gateway Timeout: Identity ledger did not answer in time
    async fn user_handler(
        State(state): State<Arc<ApiServer>>,
        Path(address): Path<String>,
    ) -> Result<impl IntoResponse, ApiError> {
        let subject = parse_account("address", "address", Some(&address))?;
        let record = state
            .verifier
            .resolver()
            .resolve_subject(subject)
            .await
            .map_err(|e| ApiError::from_lookup(e, "user data"))?;
        Ok(success(UserDataResponse::from(record)))
    }

    /// Fetches all certificates recorded for a subject
    ///
    /// # Endpoint
    /// GET /certificates/:address
    async fn certificates_handler(
        State(state): State<Arc<ApiServer>>,
        Path(address): Path<String>,
    ) -> Result<impl IntoResponse, ApiError> {
        let subject = parse_account("address", "address", Some(&address))?;
        let certificates = state
            .verifier
            .resolver()
            .resolve_certificates(subject)
            .await
            .map_err(|e| ApiError::from_lookup(e, "certificate data"))?;
        let certificates: Vec<CertificateView> = certificates.into_iter().map(CertificateView::from).collect();
        Ok(success(json!({ "certificates": certificates })))
    }

    /// Upgrades to a WebSocket subscribed to a notification channel
    ///
    /// # Endpoint
    /// GET /ws/:channel (e.g. /ws/verifier-0x2b63…)
    async fn ws_handler(
        ws: WebSocketUpgrade,
        State(state): State<Arc<ApiServer>>,
        Path(channel): Path<String>,
    ) -> impl IntoResponse {
        ws.on_upgrade(move |socket| forward_channel(socket, state.hub.clone(), channel))
    }
}

/// Pumps channel events into one live session until either side goes away.
async fn forward_channel(socket: WebSocket, hub: Arc<BroadcastHub>, channel: String) {
    let mut events = match hub.subscribe(&channel) {
        Ok(events) => events,
        Err(e) => {
            log::warn!("Cannot subscribe session to {}: {}", channel, e);
            return;
        }
    };
    let (mut sender, mut receiver) = socket.split();
    log::debug!("Live session subscribed to {}", channel);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(message) => {
                    let frame = match serde_json::to_string(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Dropping undeliverable event on {}: {}", channel, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Live session on {} lagged, {} event(s) lost", channel, missed);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    log::debug!("Live session on {} closed", channel);
}
