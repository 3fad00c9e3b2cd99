//! Request workflow: human review of data requests made absent standing consent.
//!
//! ```text
//! Pending ──approve──▶ Approved   (terminal, synthesizes consent records)
//!    └─────deny──────▶ Denied     (terminal)
//! ```
//!
//! Approval never bypasses the consent ledger: it grants one consent record per
//! requested data type through the ledger, and the request keeps the ids of the
//! records it produced. Resolution is exactly-once, a request being resolved is
//! claimed so that a concurrent resolution of the same request fails with
//! [`GovernanceError::AlreadyResolved`].
use std::{
    collections::BTreeSet,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::Poll,
    time::Duration,
};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tower::Service;
#[cfg(feature = "accord_tracing")]
use tracing::info;

use crate::governance::{
    api::types::{Decision, LedgerRequest, LedgerResponse, WorkflowRequest, WorkflowResponse},
    config::GovernanceConfig,
    error::GovernanceError,
    infrastructure::{
        clock::{Clock, Sequence, SystemClock},
        listing::{Listing, SearchTerm},
        naming::{ConsentId, ConsentKey, DataType, RequestId, Reviewer, Role, Timestamp},
    },
    services::{
        consent::ConsentLedgerService,
        notification::{GovernanceEvent, NotificationService},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A third party's ask for data of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub id: RequestId,
    pub requester_id: String,
    pub requester_role: Role,
    pub subject_id: String,
    /// Never empty
    pub data_types: BTreeSet<DataType>,
    pub purpose: String,
    pub requested_at: Timestamp,
    pub status: RequestStatus,
    /// Set iff the request is no longer pending
    pub reviewer_id: Option<String>,
    /// Set iff the request is no longer pending
    pub reviewed_at: Option<Timestamp>,
    /// Expiry of the consents backing an approval
    pub grant_expiry: Option<Timestamp>,
    /// Consent records backing an approval
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consent_ids: Vec<ConsentId>,
}

pub type RequestListing = Listing<RequestId, DataRequest>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowSummary {
    pub pending: usize,
    pub approved: usize,
    pub denied: usize,
}

/// Releases a resolution claim when dropped, including on error paths.
struct ResolutionClaim {
    claims: Arc<DashSet<RequestId>>,
    request_id: RequestId,
}

impl Drop for ResolutionClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.request_id);
    }
}

#[derive(Debug, Clone)]
pub struct RequestWorkflowService<L = ConsentLedgerService> {
    clock: Arc<dyn Clock>,
    ids: Sequence,
    requests: Arc<DashMap<RequestId, DataRequest>>,
    /// Requests currently being resolved
    claims: Arc<DashSet<RequestId>>,
    config: Arc<GovernanceConfig>,
    /// Ledger used for coverage lookups and consent synthesis
    ledger: L,
    notifications: NotificationService,
}

impl Default for RequestWorkflowService {
    fn default() -> Self {
        let notifications = NotificationService::default();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        Self::new(
            ConsentLedgerService::new(clock.clone(), notifications.clone()),
            clock,
            Arc::new(GovernanceConfig::default()),
            notifications,
        )
    }
}

impl<L> RequestWorkflowService<L> {
    pub fn new(
        ledger: L,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            clock,
            ids: Sequence::default(),
            requests: Arc::new(DashMap::new()),
            claims: Arc::new(DashSet::new()),
            config,
            ledger,
            notifications,
        }
    }

    /// The subject may always review its own requests; an administrator only
    /// when every requested data type is delegated to administrators.
    fn authorize(
        &self,
        reviewer: &Reviewer,
        subject_id: &str,
        scope: &BTreeSet<DataType>,
    ) -> Result<(), GovernanceError> {
        let delegated = reviewer.role == Role::Admin && self.config.is_delegated(scope.iter());
        if reviewer.id == subject_id || delegated {
            Ok(())
        } else {
            Err(GovernanceError::Forbidden(reviewer.id.clone()))
        }
    }

    fn get(&self, request_id: RequestId) -> Result<DataRequest, GovernanceError> {
        self.requests
            .get(&request_id)
            .map(|request| request.value().clone())
            .ok_or(GovernanceError::RequestNotFound(request_id))
    }

    fn list(
        &self,
        status: Option<RequestStatus>,
        role: Option<Role>,
        search: Option<SearchTerm>,
    ) -> RequestListing {
        let mut ordered: Vec<(Timestamp, RequestId)> =
            self.requests.iter().map(|request| (request.requested_at, request.id)).collect();
        ordered.sort_unstable();
        Listing::new(ordered.into_iter().map(|(_, id)| id).collect(), self.requests.clone())
            .with_filter(move |request| {
                status.is_none_or(|status| request.status == status)
                    && role.is_none_or(|role| request.requester_role == role)
                    && search.as_ref().is_none_or(|search| {
                        search.matches(&request.requester_id)
                            || search.matches(&request.purpose)
                            || request.data_types.iter().any(|dt| search.matches(dt.as_str()))
                    })
            })
    }

    fn summary(&self) -> WorkflowSummary {
        self.requests.iter().fold(WorkflowSummary::default(), |mut summary, request| {
            match request.status {
                RequestStatus::Pending => summary.pending += 1,
                RequestStatus::Approved => summary.approved += 1,
                RequestStatus::Denied => summary.denied += 1,
            }
            summary
        })
    }
}

impl<L> RequestWorkflowService<L>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
{
    async fn open(
        self,
        requester_id: String,
        requester_role: Role,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
    ) -> Result<DataRequest, GovernanceError> {
        let scope: BTreeSet<DataType> = data_types.into_iter().collect();
        if scope.is_empty() {
            return Err(GovernanceError::EmptyScope);
        }

        let now = self.clock.now();
        let mut ledger = self.ledger.clone();
        let mut covering = Vec::with_capacity(scope.len());
        for data_type in &scope {
            let key = ConsentKey::new(subject_id.clone(), *data_type, purpose.clone());
            match ledger.call(LedgerRequest::IsPermitted { key, now }).await? {
                LedgerResponse::Permitted(Some(record)) => covering.push(record),
                LedgerResponse::Permitted(None) => break,
                _ => return Err(GovernanceError::InternalGovernanceError),
            }
        }

        let mut request = DataRequest {
            id: RequestId(self.ids.next()),
            requester_id,
            requester_role,
            subject_id,
            data_types: scope,
            purpose,
            requested_at: now,
            status: RequestStatus::Pending,
            reviewer_id: None,
            reviewed_at: None,
            grant_expiry: None,
            consent_ids: Vec::new(),
        };
        // Standing consent already covers the whole scope, record the intent
        // without a review round
        if covering.len() == request.data_types.len() {
            request.status = RequestStatus::Approved;
            request.reviewer_id = Some(request.subject_id.clone());
            request.reviewed_at = Some(now);
            request.grant_expiry = covering.iter().map(|record| record.expires_at).min();
            request.consent_ids = covering.iter().map(|record| record.id).collect();
        }
        self.requests.insert(request.id, request.clone());

        #[cfg(feature = "accord_tracing")]
        info!(
            "[workflow] {} opened by {} ({}) on {} for {:?}: {:?}",
            request.id,
            request.requester_id,
            request.requester_role,
            request.subject_id,
            request.data_types,
            request.status
        );
        self.notifications.emit(GovernanceEvent::RequestOpened {
            request_id: request.id,
            requester_id: request.requester_id.clone(),
            subject_id: request.subject_id.clone(),
        });
        if request.status == RequestStatus::Approved {
            self.notifications.emit(GovernanceEvent::RequestApproved {
                request_id: request.id,
                requester_id: request.requester_id.clone(),
                subject_id: request.subject_id.clone(),
                consent_ids: request.consent_ids.clone(),
            });
        }
        Ok(request)
    }

    async fn resolve(
        self,
        request_id: RequestId,
        reviewer: Reviewer,
        decision: Decision,
        grant_ttl: Option<Duration>,
    ) -> Result<DataRequest, GovernanceError> {
        let (subject_id, scope, purpose) = {
            let request =
                self.requests.get(&request_id).ok_or(GovernanceError::RequestNotFound(request_id))?;
            if request.status != RequestStatus::Pending {
                return Err(GovernanceError::AlreadyResolved(request_id));
            }
            (request.subject_id.clone(), request.data_types.clone(), request.purpose.clone())
        };
        self.authorize(&reviewer, &subject_id, &scope)?;
        let ttl = match decision {
            Decision::Approved => Some(
                grant_ttl.filter(|ttl| !ttl.is_zero()).ok_or(GovernanceError::InvalidDuration)?,
            ),
            Decision::Denied => None,
        };

        if !self.claims.insert(request_id) {
            return Err(GovernanceError::AlreadyResolved(request_id));
        }
        let _claim = ResolutionClaim { claims: self.claims.clone(), request_id };
        // A resolution may have completed between the status check and the claim
        let still_pending = self
            .requests
            .get(&request_id)
            .is_some_and(|request| request.status == RequestStatus::Pending);
        if !still_pending {
            return Err(GovernanceError::AlreadyResolved(request_id));
        }

        let consents = match ttl {
            Some(ttl) => {
                let mut ledger = self.ledger.clone();
                match ledger
                    .call(LedgerRequest::GrantScope {
                        subject_id: subject_id.clone(),
                        data_types: scope,
                        purpose,
                        ttl,
                    })
                    .await?
                {
                    LedgerResponse::Consents(records) => records,
                    _ => return Err(GovernanceError::InternalGovernanceError),
                }
            }
            None => Vec::new(),
        };

        let resolved = {
            let mut request = self
                .requests
                .get_mut(&request_id)
                .ok_or(GovernanceError::RequestNotFound(request_id))?;
            match decision {
                Decision::Approved => {
                    // Synthesized consents are granted at review time
                    request.status = RequestStatus::Approved;
                    request.reviewed_at = Some(
                        consents
                            .first()
                            .map(|record| record.granted_at)
                            .unwrap_or_else(|| self.clock.now()),
                    );
                    request.grant_expiry = consents.first().map(|record| record.expires_at);
                    request.consent_ids = consents.iter().map(|record| record.id).collect();
                }
                Decision::Denied => {
                    request.status = RequestStatus::Denied;
                    request.reviewed_at = Some(self.clock.now());
                }
            }
            request.reviewer_id = Some(reviewer.id);
            request.clone()
        };

        #[cfg(feature = "accord_tracing")]
        info!(
            "[workflow] {} {:?} by {:?}, consents: {:?}",
            resolved.id, resolved.status, resolved.reviewer_id, resolved.consent_ids
        );
        self.notifications.emit(match resolved.status {
            RequestStatus::Approved => GovernanceEvent::RequestApproved {
                request_id,
                requester_id: resolved.requester_id.clone(),
                subject_id: resolved.subject_id.clone(),
                consent_ids: resolved.consent_ids.clone(),
            },
            _ => GovernanceEvent::RequestDenied {
                request_id,
                requester_id: resolved.requester_id.clone(),
                subject_id: resolved.subject_id.clone(),
            },
        });
        Ok(resolved)
    }
}

impl<L> Service<WorkflowRequest> for RequestWorkflowService<L>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
{
    type Response = WorkflowResponse;
    type Error = GovernanceError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: WorkflowRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match request {
                WorkflowRequest::Open {
                    requester_id,
                    requester_role,
                    subject_id,
                    data_types,
                    purpose,
                } => this
                    .open(requester_id, requester_role, subject_id, data_types, purpose)
                    .await
                    .map(WorkflowResponse::Request),
                WorkflowRequest::Resolve { request_id, reviewer, decision, grant_ttl } => {
                    #[cfg(feature = "accord_tracing")]
                    info!("[workflow] Resolve {} as {:?} by {:?}", request_id, decision, reviewer);
                    this.resolve(request_id, reviewer, decision, grant_ttl)
                        .await
                        .map(WorkflowResponse::Request)
                }
                WorkflowRequest::Get(request_id) => {
                    this.get(request_id).map(WorkflowResponse::Request)
                }
                WorkflowRequest::List { status, role, search } => {
                    Ok(WorkflowResponse::Listing(this.list(status, role, SearchTerm::parse(search))))
                }
                WorkflowRequest::Summary => Ok(WorkflowResponse::Summary(this.summary())),
            }
        })
    }
}
