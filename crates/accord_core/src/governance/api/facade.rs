//! Governance façade service implementation.
//!
//! [`GovernanceApiService`] is the single entry point of the engine. It routes
//! consent, request and listing operations to the component that owns them and
//! composes the ledger and the auditor for access checks:
//!
//! 1. resolve the single active consent of every requested data type;
//! 2. if any type is uncovered, answer [`AccessDecision::RequiresRequest`] and
//!    record nothing;
//! 3. otherwise append an audit entry with the covering consents as its basis.
//!
//! No lock is held between steps 1 and 3. The auditor re-validates the basis,
//! and when a revoke or a supersede won the race the façade reads the ledger
//! again once before giving up with [`GovernanceError::Unavailable`].

use std::{collections::BTreeSet, future::Future, pin::Pin, sync::Arc, task::Poll};

use tower::Service;
#[cfg(feature = "accord_tracing")]
use tracing::{info, warn};

use crate::governance::{
    api::types::{
        AccessDecision, AuditRequest, AuditResponse, GovernanceRequest, GovernanceResponse,
        GovernanceSummary, LedgerRequest, LedgerResponse, WorkflowRequest, WorkflowResponse,
    },
    config::GovernanceConfig,
    error::GovernanceError,
    infrastructure::{
        clock::Clock,
        naming::{ConsentId, ConsentKey, DataType},
    },
};

/// Ledger reads before an access check gives up.
const ACCESS_ATTEMPTS: usize = 2;

/// Coverage of a scope by standing consent.
enum Coverage {
    /// Active consent of every data type, in scope order
    Covered(Vec<ConsentId>),
    Missing(Vec<DataType>),
}

#[derive(Debug, Clone)]
pub struct GovernanceApiService<L, W, A> {
    /// Consent ledger
    ledger: L,
    /// Request workflow
    workflow: W,
    /// Access auditor
    auditor: A,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
}

impl<L, W, A> GovernanceApiService<L, W, A> {
    pub fn new(
        ledger: L,
        workflow: W,
        auditor: A,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        Self { ledger, workflow, auditor, clock, config }
    }
}

impl<L, W, A> GovernanceApiService<L, W, A>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
    A: Service<AuditRequest, Response = AuditResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    A::Future: Send,
{
    async fn coverage(
        &mut self,
        subject_id: &str,
        scope: &BTreeSet<DataType>,
        purpose: &str,
    ) -> Result<Coverage, GovernanceError> {
        let now = self.clock.now();
        let mut basis = Vec::with_capacity(scope.len());
        let mut missing = Vec::new();
        for data_type in scope {
            let key = ConsentKey::new(subject_id, *data_type, purpose);
            match self.ledger.call(LedgerRequest::IsPermitted { key, now }).await? {
                LedgerResponse::Permitted(Some(record)) => basis.push(record.id),
                LedgerResponse::Permitted(None) => missing.push(*data_type),
                _ => return Err(GovernanceError::InternalGovernanceError),
            }
        }
        Ok(if missing.is_empty() { Coverage::Covered(basis) } else { Coverage::Missing(missing) })
    }

    async fn check_access(
        &mut self,
        accessed_by: String,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
        source_context: String,
    ) -> Result<AccessDecision, GovernanceError> {
        let scope: BTreeSet<DataType> = data_types.into_iter().collect();
        if scope.is_empty() {
            return Err(GovernanceError::EmptyScope);
        }

        for _ in 0..ACCESS_ATTEMPTS {
            let basis = match self.coverage(&subject_id, &scope, &purpose).await? {
                Coverage::Covered(basis) => basis,
                Coverage::Missing(missing) => {
                    #[cfg(feature = "accord_tracing")]
                    info!(
                        "[governance] {} requires a request for {:?} of {}",
                        accessed_by, missing, subject_id
                    );
                    return Ok(AccessDecision::RequiresRequest { missing });
                }
            };
            let record = AuditRequest::RecordAccess {
                basis,
                accessed_by: accessed_by.clone(),
                subject_id: subject_id.clone(),
                data_types: scope.iter().copied().collect(),
                purpose: purpose.clone(),
                source_context: source_context.clone(),
            };
            match self.auditor.call(record).await {
                Ok(AuditResponse::Entry(entry)) => return Ok(AccessDecision::Permitted(entry)),
                Ok(_) => return Err(GovernanceError::InternalGovernanceError),
                Err(GovernanceError::ScopeExceeded(_data_type)) => {
                    #[cfg(feature = "accord_tracing")]
                    warn!(
                        "[governance] consent of {} for {} changed during access check",
                        subject_id, _data_type
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Err(GovernanceError::Unavailable)
    }
}

impl<L, W, A> Service<GovernanceRequest> for GovernanceApiService<L, W, A>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
    W: Service<WorkflowRequest, Response = WorkflowResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    W::Future: Send,
    A: Service<AuditRequest, Response = AuditResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    A::Future: Send,
{
    type Response = GovernanceResponse;
    type Error = GovernanceError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: GovernanceRequest) -> Self::Future {
        let mut this = self.clone();
        Box::pin(async move {
            match request {
                GovernanceRequest::Grant { subject_id, data_type, purpose, ttl } => {
                    let ttl = ttl.unwrap_or_else(|| this.config.default_ttl(data_type));
                    #[cfg(feature = "accord_tracing")]
                    info!(
                        "[governance] Grant: subject: {}, data type: {}, purpose: {:?}, ttl: {:?}",
                        subject_id, data_type, purpose, ttl
                    );
                    match this
                        .ledger
                        .call(LedgerRequest::Grant { subject_id, data_type, purpose, ttl })
                        .await?
                    {
                        LedgerResponse::Consent(record) => Ok(GovernanceResponse::Consent(record)),
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::Revoke { consent_id, acting_subject_id } => {
                    #[cfg(feature = "accord_tracing")]
                    info!("[governance] Revoke: {} by {}", consent_id, acting_subject_id);
                    match this
                        .ledger
                        .call(LedgerRequest::Revoke { consent_id, acting_subject_id })
                        .await?
                    {
                        LedgerResponse::Consent(record) => Ok(GovernanceResponse::Consent(record)),
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::CheckAccess {
                    accessed_by,
                    subject_id,
                    data_types,
                    purpose,
                    source_context,
                } => {
                    #[cfg(feature = "accord_tracing")]
                    info!(
                        "[governance] CheckAccess: {} on {} for {:?}, purpose: {:?}",
                        accessed_by, subject_id, data_types, purpose
                    );
                    this.check_access(accessed_by, subject_id, data_types, purpose, source_context)
                        .await
                        .map(GovernanceResponse::Access)
                }
                GovernanceRequest::OpenRequest {
                    requester_id,
                    requester_role,
                    subject_id,
                    data_types,
                    purpose,
                } => {
                    #[cfg(feature = "accord_tracing")]
                    info!(
                        "[governance] OpenRequest: {} ({}) on {} for {:?}",
                        requester_id, requester_role, subject_id, data_types
                    );
                    match this
                        .workflow
                        .call(WorkflowRequest::Open {
                            requester_id,
                            requester_role,
                            subject_id,
                            data_types,
                            purpose,
                        })
                        .await?
                    {
                        WorkflowResponse::Request(request) => {
                            Ok(GovernanceResponse::Request(request))
                        }
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::ResolveRequest { request_id, reviewer, decision, grant_ttl } => {
                    match this
                        .workflow
                        .call(WorkflowRequest::Resolve { request_id, reviewer, decision, grant_ttl })
                        .await?
                    {
                        WorkflowResponse::Request(request) => {
                            Ok(GovernanceResponse::Request(request))
                        }
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::GetRequest(request_id) => {
                    match this.workflow.call(WorkflowRequest::Get(request_id)).await? {
                        WorkflowResponse::Request(request) => {
                            Ok(GovernanceResponse::Request(request))
                        }
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::QueryLogs(filter) => {
                    match this.auditor.call(AuditRequest::Query(filter)).await? {
                        AuditResponse::Listing(entries) => Ok(GovernanceResponse::Logs(entries)),
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::ListConsents { subject_id, status, search } => {
                    match this
                        .ledger
                        .call(LedgerRequest::ListForSubject { subject_id, status, search })
                        .await?
                    {
                        LedgerResponse::Listing(records) => {
                            Ok(GovernanceResponse::Consents(records))
                        }
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::ListRequests { status, role, search } => {
                    match this
                        .workflow
                        .call(WorkflowRequest::List { status, role, search })
                        .await?
                    {
                        WorkflowResponse::Listing(requests) => {
                            Ok(GovernanceResponse::Requests(requests))
                        }
                        _ => Err(GovernanceError::InternalGovernanceError),
                    }
                }
                GovernanceRequest::Summary => {
                    let LedgerResponse::Summary(consents) =
                        this.ledger.call(LedgerRequest::Summary).await?
                    else {
                        return Err(GovernanceError::InternalGovernanceError);
                    };
                    let WorkflowResponse::Summary(requests) =
                        this.workflow.call(WorkflowRequest::Summary).await?
                    else {
                        return Err(GovernanceError::InternalGovernanceError);
                    };
                    let AuditResponse::Count(accesses) =
                        this.auditor.call(AuditRequest::Count).await?
                    else {
                        return Err(GovernanceError::InternalGovernanceError);
                    };
                    Ok(GovernanceResponse::Summary(GovernanceSummary {
                        consents,
                        requests,
                        accesses,
                    }))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::governance::{
        infrastructure::{clock::MockClock, naming::Timestamp},
        init_engine_with_clock,
        services::{
            audit::{AccessAuditorService, AccessLogFilter},
            consent::{ConsentLedgerService, ConsentStatus},
            notification::NotificationService,
            request::RequestWorkflowService,
        },
    };

    const T0: Timestamp = Timestamp(1_700_000_000_000);
    const HOUR: Duration = Duration::from_secs(3600);

    /// Fails the first `failures` recordings as if a basis consent changed.
    #[derive(Debug, Clone)]
    struct RacedAuditor {
        inner: AccessAuditorService,
        failures: Arc<AtomicUsize>,
    }

    impl Service<AuditRequest> for RacedAuditor {
        type Response = AuditResponse;
        type Error = GovernanceError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: AuditRequest) -> Self::Future {
            if let AuditRequest::RecordAccess { data_types, .. } = &request
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                let data_type = data_types[0];
                return Box::pin(async move { Err(GovernanceError::ScopeExceeded(data_type)) });
            }
            self.inner.call(request)
        }
    }

    /// Revokes a consent right before the first recording reaches the auditor.
    #[derive(Debug, Clone)]
    struct RevokingAuditor {
        inner: AccessAuditorService,
        ledger: ConsentLedgerService,
        consent_id: ConsentId,
        subject_id: String,
        revoked: Arc<AtomicBool>,
    }

    impl Service<AuditRequest> for RevokingAuditor {
        type Response = AuditResponse;
        type Error = GovernanceError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: AuditRequest) -> Self::Future {
            let mut this = self.clone();
            Box::pin(async move {
                if !this.revoked.swap(true, Ordering::SeqCst) {
                    this.ledger
                        .call(LedgerRequest::Revoke {
                            consent_id: this.consent_id,
                            acting_subject_id: this.subject_id.clone(),
                        })
                        .await?;
                }
                this.inner.call(request).await
            })
        }
    }

    fn check(data_types: Vec<DataType>) -> GovernanceRequest {
        GovernanceRequest::CheckAccess {
            accessed_by: "recruiter-1".into(),
            subject_id: "s1".into(),
            data_types,
            purpose: "placement".into(),
            source_context: "10.0.0.7".into(),
        }
    }

    fn grant(data_type: DataType, ttl: Option<Duration>) -> GovernanceRequest {
        GovernanceRequest::Grant {
            subject_id: "s1".into(),
            data_type,
            purpose: "placement".into(),
            ttl,
        }
    }

    fn stack_with<A>(
        clock: &MockClock,
        auditor: impl FnOnce(AccessAuditorService) -> A,
    ) -> (GovernanceApiService<ConsentLedgerService, RequestWorkflowService, A>, ConsentLedgerService)
    {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let config = Arc::new(GovernanceConfig::default());
        let notifications = NotificationService::default();
        let ledger = ConsentLedgerService::new(clock.clone(), notifications.clone());
        let workflow =
            RequestWorkflowService::new(ledger.clone(), clock.clone(), config.clone(), notifications);
        let auditor = auditor(AccessAuditorService::new(ledger.clone(), clock.clone()));
        (GovernanceApiService::new(ledger.clone(), workflow, auditor, clock, config), ledger)
    }

    #[tokio::test]
    async fn unit_governance_check_access_empty_scope() {
        #[cfg(feature = "accord_tracing")]
        crate::accord_tracing::init();
        let (mut governance, _, _) =
            init_engine_with_clock(GovernanceConfig::default(), Arc::new(MockClock::new(T0)));
        assert_eq!(governance.call(check(vec![])).await.unwrap_err(), GovernanceError::EmptyScope);
    }

    #[tokio::test]
    async fn unit_governance_check_access_requires_request() {
        let (mut governance, _, _) =
            init_engine_with_clock(GovernanceConfig::default(), Arc::new(MockClock::new(T0)));
        governance.call(grant(DataType::Resume, Some(HOUR))).await.unwrap();

        let GovernanceResponse::Access(decision) = governance
            .call(check(vec![DataType::Resume, DataType::ContactInfo, DataType::Transcript]))
            .await
            .unwrap()
        else {
            panic!("Expected GovernanceResponse::Access");
        };
        assert_eq!(
            decision,
            AccessDecision::RequiresRequest {
                missing: vec![DataType::ContactInfo, DataType::Transcript]
            }
        );

        let GovernanceResponse::Logs(logs) =
            governance.call(GovernanceRequest::QueryLogs(AccessLogFilter::default())).await.unwrap()
        else {
            panic!("Expected GovernanceResponse::Logs");
        };
        assert_eq!(logs.iter().count(), 0);
    }

    #[tokio::test]
    async fn unit_governance_check_access_permitted() {
        let clock = MockClock::new(T0);
        let (mut governance, _, _) =
            init_engine_with_clock(GovernanceConfig::default(), Arc::new(clock.clone()));
        let GovernanceResponse::Consent(consent) =
            governance.call(grant(DataType::Resume, Some(HOUR))).await.unwrap()
        else {
            panic!("Expected GovernanceResponse::Consent");
        };
        clock.advance(Duration::from_secs(30));

        let GovernanceResponse::Access(AccessDecision::Permitted(entry)) =
            governance.call(check(vec![DataType::Resume])).await.unwrap()
        else {
            panic!("Expected AccessDecision::Permitted");
        };
        assert_eq!(entry.consent_record_ids.get(&DataType::Resume), Some(&consent.id));
        assert_eq!(entry.accessed_at, clock.now());
        assert_eq!(entry.source_context, "10.0.0.7");
    }

    #[tokio::test]
    async fn unit_governance_grant_default_ttl() {
        let (mut governance, _, _) =
            init_engine_with_clock(GovernanceConfig::default(), Arc::new(MockClock::new(T0)));
        let day_ms = 86_400_000;
        for (data_type, days) in
            [(DataType::Transcript, 365), (DataType::Resume, 180), (DataType::ContactInfo, 90)]
        {
            let GovernanceResponse::Consent(record) =
                governance.call(grant(data_type, None)).await.unwrap()
            else {
                panic!("Expected GovernanceResponse::Consent");
            };
            assert_eq!(record.expires_at, Timestamp(T0.0 + days * day_ms));
        }
    }

    #[tokio::test]
    async fn unit_governance_check_access_retries_once() {
        let clock = MockClock::new(T0);
        let failures = Arc::new(AtomicUsize::new(1));
        let (mut governance, _) = stack_with(&clock, |inner| RacedAuditor {
            inner,
            failures: failures.clone(),
        });
        governance.call(grant(DataType::Resume, Some(HOUR))).await.unwrap();
        assert!(matches!(
            governance.call(check(vec![DataType::Resume])).await.unwrap(),
            GovernanceResponse::Access(AccessDecision::Permitted(_))
        ));

        failures.store(ACCESS_ATTEMPTS, Ordering::SeqCst);
        assert_eq!(
            governance.call(check(vec![DataType::Resume])).await.unwrap_err(),
            GovernanceError::Unavailable
        );
    }

    #[tokio::test]
    async fn unit_governance_check_access_raced_by_revoke() {
        let clock = MockClock::new(T0);
        let (mut seed, ledger) = stack_with(&clock, |inner| inner);
        let GovernanceResponse::Consent(consent) =
            seed.call(grant(DataType::Resume, Some(HOUR))).await.unwrap()
        else {
            panic!("Expected GovernanceResponse::Consent");
        };

        let mut governance = GovernanceApiService::new(
            ledger.clone(),
            seed.workflow.clone(),
            RevokingAuditor {
                inner: seed.auditor.clone(),
                ledger: ledger.clone(),
                consent_id: consent.id,
                subject_id: "s1".into(),
                revoked: Arc::new(AtomicBool::new(false)),
            },
            Arc::new(clock.clone()),
            Arc::new(GovernanceConfig::default()),
        );
        let GovernanceResponse::Access(decision) =
            governance.call(check(vec![DataType::Resume])).await.unwrap()
        else {
            panic!("Expected GovernanceResponse::Access");
        };
        assert_eq!(decision, AccessDecision::RequiresRequest { missing: vec![DataType::Resume] });

        let GovernanceResponse::Consents(consents) = governance
            .call(GovernanceRequest::ListConsents {
                subject_id: "s1".into(),
                status: Some(ConsentStatus::Revoked),
                search: None,
            })
            .await
            .unwrap()
        else {
            panic!("Expected GovernanceResponse::Consents");
        };
        assert_eq!(consents.iter().map(|c| c.id).collect::<Vec<_>>(), vec![consent.id]);
    }

    #[tokio::test]
    async fn unit_governance_summary() {
        let (mut governance, _, _) =
            init_engine_with_clock(GovernanceConfig::default(), Arc::new(MockClock::new(T0)));
        governance.call(grant(DataType::Resume, Some(HOUR))).await.unwrap();
        governance.call(check(vec![DataType::Resume])).await.unwrap();
        governance.call(check(vec![DataType::Transcript])).await.unwrap();

        let GovernanceResponse::Summary(summary) =
            governance.call(GovernanceRequest::Summary).await.unwrap()
        else {
            panic!("Expected GovernanceResponse::Summary");
        };
        assert_eq!(summary.consents.active, 1);
        assert_eq!(summary.requests.pending, 0);
        assert_eq!(summary.accesses, 1);
    }
}
