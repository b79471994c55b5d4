// src/services/verifier.rs
//! Verification orchestration.
//!
//! Drives a request through validation, subject resolution, condition
//! evaluation and proof encoding, then hands the finished record to the
//! history store and the notification publisher. Those two side effects run
//! as detached tasks: their failures are logged and can never change or fail
//! the result returned to the caller.

use crate::models::condition::{RawVerificationRequest, ValidationError, VerificationRequest};
use crate::models::subject::AccountId;
use crate::models::verification::{
    EvaluationOutcome, Outcomes, VerificationRecord, VerificationResult,
};
use crate::proof::proof_encoder::generate_proof;
use crate::services::evaluator::{evaluate, SubjectData};
use crate::services::identity_resolver::{IdentityResolver, ResolveError};
use crate::services::notifier::NotificationPublisher;
use crate::storage::history_store::{HistoryStore, StoreError, MAX_PAGE_SIZE};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Lifecycle of one verification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Validating,
    Resolving,
    Evaluating,
    Persisting,
    Notifying,
    Completed,
    Errored,
}

/// Why a verification call produced no result.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("User not found")]
    SubjectNotFound(AccountId),

    #[error("Request timeout")]
    LedgerTimeout(Duration),

    /// Anything unanticipated while resolving or evaluating.
    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Failed to fetch verification history: {0}")]
    History(#[from] StoreError),
}

impl From<ResolveError> for VerifyError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::SubjectNotFound(subject) => VerifyError::SubjectNotFound(subject),
            ResolveError::LedgerTimeout(bound) => VerifyError::LedgerTimeout(bound),
            ResolveError::Ledger(e) => VerifyError::Verification(e.to_string()),
        }
    }
}

/// Handles of the persistence and notification tasks spawned for a result.
///
/// Dropping this detaches both tasks; they still run to completion.
pub struct SideEffects {
    pub persisted: JoinHandle<bool>,
    pub notified: JoinHandle<bool>,
}

impl SideEffects {
    /// Waits for both tasks. Returns `(persisted, notified)`.
    pub async fn settle(self) -> (bool, bool) {
        let (persisted, notified) = tokio::join!(self.persisted, self.notified);
        (persisted.unwrap_or(false), notified.unwrap_or(false))
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Entry point for condition-based verification.
#[derive(Clone)]
pub struct Verifier {
    resolver: IdentityResolver,
    history: Arc<dyn HistoryStore>,
    publisher: NotificationPublisher,
    clock: Clock,
    page_size: usize,
}

impl Verifier {
    /// Constructs a verifier over already-initialised ports.
    ///
    /// # Arguments
    /// * `resolver` - Bounded reader over the identity ledger
    /// * `history` - Store that receives every completed record
    /// * `publisher` - Pushes completed records to the verifier's channel
    pub fn new(
        resolver: IdentityResolver,
        history: Arc<dyn HistoryStore>,
        publisher: NotificationPublisher,
    ) -> Self {
        Self {
            resolver,
            history,
            publisher,
            clock: Arc::new(Utc::now),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Replaces the wall clock used for timestamps and age derivation.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets the history page size used when a query names no limit.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Verifies a raw request and returns the aggregate result.
    pub async fn verify(&self, raw: RawVerificationRequest) -> Result<VerificationResult, VerifyError> {
        self.verify_detailed(raw).await.map(|(result, _)| result)
    }

    /// Like [`Verifier::verify`], also returning the side-effect task handles.
    pub async fn verify_detailed(
        &self,
        raw: RawVerificationRequest,
    ) -> Result<(VerificationResult, SideEffects), VerifyError> {
        enter(VerificationStage::Validating);
        let request = VerificationRequest::try_from(raw).map_err(|e| {
            enter(VerificationStage::Errored);
            e
        })?;
        self.run(request).await
    }

    async fn run(&self, request: VerificationRequest) -> Result<(VerificationResult, SideEffects), VerifyError> {
        log::info!(
            "Verifying {} condition(s) on {} for verifier {}",
            request.conditions.len(),
            request.subject,
            request.verifier
        );

        enter(VerificationStage::Resolving);
        let subject = self.resolver.resolve_subject(request.subject).await.map_err(errored)?;
        let certificates = if request.conditions.needs_certificates() {
            self.resolver.resolve_certificates(request.subject).await.map_err(errored)?
        } else {
            Vec::new()
        };

        enter(VerificationStage::Evaluating);
        let now = (self.clock)();
        let data = SubjectData {
            subject: &subject,
            certificates: &certificates,
        };
        let outcomes = evaluate_all(&request, data, now.date_naive())?;

        let record = VerificationRecord::new(
            request.subject,
            request.verifier,
            now,
            request.conditions,
            outcomes,
            request.requested_at,
        );
        let result = record.to_result();
        log::info!(
            "Verification {} for verifier {}: success={}",
            record.id,
            record.verifier_id,
            record.success
        );

        let side_effects = self.dispatch(record);
        enter(VerificationStage::Completed);
        Ok((result, side_effects))
    }

    /// Spawns persistence and notification for a finished record.
    fn dispatch(&self, record: VerificationRecord) -> SideEffects {
        let history = self.history.clone();
        let stored = record.clone();
        let persisted = tokio::spawn(async move {
            enter(VerificationStage::Persisting);
            let id = stored.id;
            match history.append(stored).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to record verification {}: {}", id, e);
                    false
                }
            }
        });

        let publisher = self.publisher.clone();
        let notified = tokio::spawn(async move {
            enter(VerificationStage::Notifying);
            match publisher.publish(&record.verifier_id, &record.notification()).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to notify verifier {} of {}: {}", record.verifier_id, record.id, e);
                    false
                }
            }
        });

        SideEffects { persisted, notified }
    }

    /// Past verifications requested by `verifier`, newest first.
    pub async fn history(&self, verifier: AccountId, limit: Option<usize>) -> Result<Vec<VerificationRecord>, VerifyError> {
        let limit = limit.unwrap_or(self.page_size);
        Ok(self.history.list_by_verifier(verifier, limit).await?)
    }
}

/// Evaluates every declared condition and encodes its proof.
fn evaluate_all(
    request: &VerificationRequest,
    data: SubjectData<'_>,
    today: NaiveDate,
) -> Result<Outcomes, VerifyError> {
    let mut outcomes = Outcomes::new();
    for condition in request.conditions.iter() {
        let evaluation = evaluate(condition, data, today);
        let proof = generate_proof(evaluation.value, condition.spec(), evaluation.verified)
            .map_err(|e| VerifyError::Verification(e.to_string()))?;
        outcomes.insert(
            condition.kind(),
            EvaluationOutcome {
                verified: evaluation.verified,
                proof,
            },
        );
    }
    Ok(outcomes)
}

fn enter(stage: VerificationStage) {
    log::debug!("verification stage: {:?}", stage);
}

fn errored(err: ResolveError) -> VerifyError {
    enter(VerificationStage::Errored);
    VerifyError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::condition::AttributeKind;
    use crate::proof::proof_encoder::decode_proof;
    use crate::services::identity_resolver::tests::{account, income_certificate, subject_record, StaticLedger};
    use crate::services::notifier::tests::RecordingChannel;
    use crate::services::notifier::NEW_VERIFICATION_EVENT;
    use crate::storage::history_store::tests::FailingStore;
    use crate::storage::history_store::InMemoryHistoryStore;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    struct Harness {
        verifier: Verifier,
        ledger: Arc<StaticLedger>,
        store: Arc<InMemoryHistoryStore>,
        channel: Arc<RecordingChannel>,
    }

    fn harness(ledger: StaticLedger) -> Harness {
        let ledger = Arc::new(ledger);
        let store = Arc::new(InMemoryHistoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let verifier = Verifier::new(
            IdentityResolver::new(ledger.clone(), Duration::from_secs(5)),
            store.clone(),
            NotificationPublisher::new(channel.clone()),
        )
        .with_clock(|| Utc.with_ymd_and_hms(2024, 6, 15, 9, 30, 0).unwrap());
        Harness { verifier, ledger, store, channel }
    }

    fn mumbai_subject() -> StaticLedger {
        let mut ledger = StaticLedger::with_subject(
            account('1'),
            subject_record("1990-06-15", "401 C-wing, Happy Homes Society, Mumbai"),
        );
        ledger.certificates.insert(
            account('1'),
            vec![
                income_certificate(account('1'), r#"{"amount": 40000}"#),
                income_certificate(account('1'), r#"{"amount": "not-a-number"}"#),
                income_certificate(account('1'), r#"{"amount": 90000}"#),
            ],
        );
        ledger
    }

    fn request(conditions: Value) -> RawVerificationRequest {
        serde_json::from_value(json!({
            "userAddress": account('1').to_string(),
            "verifierId": account('2').to_string(),
            "conditions": conditions,
            "timestamp": "2024-06-15T09:29:59.000Z",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_verification() {
        let h = harness(mumbai_subject());
        let (result, effects) = h
            .verifier
            .verify_detailed(request(json!({
                "age": {"value": 18, "operator": "greaterThan"},
                "income": {"value": 50000, "operator": "greaterThan"},
                "city": {"value": "mumbai", "operator": "equals"},
            })))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.timestamp, "2024-06-15T09:30:00.000Z");
        let income = decode_proof(&result.results[&AttributeKind::Income].proof).unwrap();
        assert_eq!(income.value, json!(90000));
        let age = decode_proof(&result.results[&AttributeKind::Age].proof).unwrap();
        assert_eq!(age.value, json!(34));

        assert_eq!(effects.settle().await, (true, true));
        let history = h.verifier.history(account('2'), None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcomes, result.results);
        assert_eq!(history[0].requested_at.as_deref(), Some("2024-06-15T09:29:59.000Z"));

        let published = h.channel.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, format!("verifier-{}", account('2')));
        assert_eq!(published[0].event, NEW_VERIFICATION_EVENT);
        assert_eq!(published[0].data["id"], json!(history[0].id.to_string()));
        assert_eq!(published[0].data["proofs"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_conditions_succeed_vacuously() {
        let h = harness(mumbai_subject());
        let result = h.verifier.verify(request(json!({}))).await.unwrap();
        assert!(result.success);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_only_declared_conditions_are_reported() {
        let h = harness(mumbai_subject());
        let result = h
            .verifier
            .verify(request(json!({"education": {"value": "B.Tech", "operator": "equals"}})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.results.keys().copied().collect::<Vec<_>>(), vec![AttributeKind::Education]);
    }

    #[tokio::test]
    async fn test_certificates_are_read_only_for_income() {
        let h = harness(mumbai_subject());
        h.verifier
            .verify(request(json!({"age": {"value": 18, "operator": "greaterThan"}})))
            .await
            .unwrap();
        assert_eq!(h.ledger.certificate_reads.load(std::sync::atomic::Ordering::SeqCst), 0);

        h.verifier
            .verify(request(json!({"income": {"value": 1, "operator": "greaterThan"}})))
            .await
            .unwrap();
        assert_eq!(h.ledger.certificate_reads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_verdict_different_proofs() {
        let h = harness(mumbai_subject());
        let conditions = json!({"age": {"value": 30, "operator": "greaterThan"}});
        let first = h.verifier.verify(request(conditions.clone())).await.unwrap();
        let second = h.verifier.verify(request(conditions)).await.unwrap();

        let (a, b) = (&first.results[&AttributeKind::Age], &second.results[&AttributeKind::Age]);
        assert_eq!(a.verified, b.verified);
        assert_ne!(a.proof, b.proof);
    }

    #[tokio::test]
    async fn test_invalid_subject_never_reaches_ledger() {
        let h = harness(mumbai_subject());
        let mut raw = request(json!({}));
        raw.user_address = Some("alice".into());

        let err = h.verifier.verify(raw).await.unwrap_err();
        assert!(matches!(err, VerifyError::Validation(ValidationError::InvalidIdentifier { .. })));
        assert_eq!(h.ledger.reads(), 0);
        assert_eq!(h.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_subject_has_no_side_effects() {
        let h = harness(StaticLedger::default());
        let err = h.verifier.verify(request(json!({}))).await.unwrap_err();
        assert!(matches!(err, VerifyError::SubjectNotFound(id) if id == account('1')));
        tokio::task::yield_now().await;
        assert_eq!(h.store.len().await, 0);
        assert!(h.channel.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_failure_is_verification_error() {
        let mut ledger = mumbai_subject();
        ledger.failure = Some("connection reset".into());
        let h = harness(ledger);
        let err = h.verifier.verify(request(json!({}))).await.unwrap_err();
        assert!(matches!(err, VerifyError::Verification(ref m) if m.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_change_result() {
        let ledger = Arc::new(mumbai_subject());
        let channel = Arc::new(RecordingChannel { fail: true, ..Default::default() });
        let verifier = Verifier::new(
            IdentityResolver::new(ledger, Duration::from_secs(5)),
            Arc::new(FailingStore),
            NotificationPublisher::new(channel),
        );

        let (result, effects) = verifier
            .verify_detailed(request(json!({"city": {"value": "Mumbai", "operator": "equals"}})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(effects.settle().await, (false, false));
    }
}
