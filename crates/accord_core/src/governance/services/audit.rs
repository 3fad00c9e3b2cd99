//! Access auditor: the append-only trail of realized accesses.
//!
//! Every entry names the consent record that authorized each accessed data
//! type. Before appending, the auditor re-validates that basis against the
//! ledger at the access timestamp, so an entry can never outlive a revoke or a
//! supersede that won the race against it.
use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::Poll,
};

use dashmap::DashMap;
use serde::Serialize;
use tower::Service;
#[cfg(feature = "accord_tracing")]
use tracing::{debug, info};

use crate::governance::{
    api::types::{AuditRequest, AuditResponse, LedgerRequest, LedgerResponse},
    error::GovernanceError,
    infrastructure::{
        clock::{Clock, Sequence, SystemClock},
        listing::Listing,
        naming::{AccessLogId, ConsentId, DataType, Timestamp},
    },
    services::{consent::ConsentLedgerService, notification::NotificationService},
};

/// One realized access. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub id: AccessLogId,
    /// Consent record covering each accessed data type
    pub consent_record_ids: BTreeMap<DataType, ConsentId>,
    pub accessed_by: String,
    pub subject_id: String,
    pub data_types_accessed: BTreeSet<DataType>,
    pub purpose: String,
    pub accessed_at: Timestamp,
    pub source_context: String,
}

/// Audit trail query, absent fields match everything.
///
/// The date range is inclusive on both ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccessLogFilter {
    pub subject_id: Option<String>,
    pub accessed_by: Option<String>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub data_type: Option<DataType>,
}

impl AccessLogFilter {
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        self.subject_id.as_ref().is_none_or(|subject| entry.subject_id == *subject)
            && self.accessed_by.as_ref().is_none_or(|actor| entry.accessed_by == *actor)
            && self.from.is_none_or(|from| entry.accessed_at >= from)
            && self.to.is_none_or(|to| entry.accessed_at <= to)
            && self.data_type.is_none_or(|data_type| entry.data_types_accessed.contains(&data_type))
    }
}

pub type AccessLogListing = Listing<AccessLogId, AccessLogEntry>;

#[derive(Debug, Clone)]
pub struct AccessAuditorService<L = ConsentLedgerService> {
    clock: Arc<dyn Clock>,
    ids: Sequence,
    entries: Arc<DashMap<AccessLogId, AccessLogEntry>>,
    /// Entries of each subject, in append order
    by_subject: Arc<DashMap<String, Vec<AccessLogId>>>,
    /// Ledger used to re-validate the authorization basis
    ledger: L,
}

impl Default for AccessAuditorService {
    fn default() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        Self::new(
            ConsentLedgerService::new(clock.clone(), NotificationService::default()),
            clock,
        )
    }
}

impl<L> AccessAuditorService<L> {
    pub fn new(ledger: L, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ids: Sequence::default(),
            entries: Arc::new(DashMap::new()),
            by_subject: Arc::new(DashMap::new()),
            ledger,
        }
    }

    fn query(&self, filter: AccessLogFilter) -> AccessLogListing {
        let candidates: Vec<AccessLogId> = match &filter.subject_id {
            Some(subject_id) => {
                self.by_subject.get(subject_id).map(|ids| ids.value().clone()).unwrap_or_default()
            }
            None => self.entries.iter().map(|entry| *entry.key()).collect(),
        };
        let mut ordered: Vec<(Timestamp, AccessLogId)> = candidates
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|entry| (entry.accessed_at, id)))
            .collect();
        ordered.sort_unstable_by(|a, b| b.cmp(a));

        Listing::new(ordered.into_iter().map(|(_, id)| id).collect(), self.entries.clone())
            .with_filter(move |entry| filter.matches(entry))
    }

    fn count(&self) -> usize {
        self.entries.len()
    }
}

impl<L> AccessAuditorService<L>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
{
    async fn record_access(
        self,
        basis: Vec<ConsentId>,
        accessed_by: String,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
        source_context: String,
    ) -> Result<AccessLogEntry, GovernanceError> {
        let scope: BTreeSet<DataType> = data_types.into_iter().collect();
        if scope.is_empty() {
            return Err(GovernanceError::EmptyScope);
        }

        // Taken before validation: a basis consent revoked after this point is
        // revoked after the access
        let accessed_at = self.clock.now();
        let mut ledger = self.ledger.clone();
        let mut covering = BTreeMap::new();
        for consent_id in basis {
            match ledger.call(LedgerRequest::Validate { consent_id, now: accessed_at }).await? {
                LedgerResponse::Permitted(Some(record))
                    if record.subject_id == subject_id && record.purpose == purpose =>
                {
                    covering.insert(record.data_type, record.id);
                }
                LedgerResponse::Permitted(_) => {
                    #[cfg(feature = "accord_tracing")]
                    debug!("[auditor] {} no longer authorizes {}", consent_id, subject_id);
                }
                _ => return Err(GovernanceError::InternalGovernanceError),
            }
        }

        let mut consent_record_ids = BTreeMap::new();
        for data_type in &scope {
            let consent_id =
                covering.get(data_type).ok_or(GovernanceError::ScopeExceeded(*data_type))?;
            consent_record_ids.insert(*data_type, *consent_id);
        }

        let entry = AccessLogEntry {
            id: AccessLogId(self.ids.next()),
            consent_record_ids,
            accessed_by,
            subject_id,
            data_types_accessed: scope,
            purpose,
            accessed_at,
            source_context,
        };
        self.entries.insert(entry.id, entry.clone());
        self.by_subject.entry(entry.subject_id.clone()).or_default().push(entry.id);

        #[cfg(feature = "accord_tracing")]
        info!(
            "[auditor] {}: {} accessed {:?} of {} for purpose {:?}",
            entry.id, entry.accessed_by, entry.data_types_accessed, entry.subject_id, entry.purpose
        );
        Ok(entry)
    }
}

impl<L> Service<AuditRequest> for AccessAuditorService<L>
where
    L: Service<LedgerRequest, Response = LedgerResponse, Error = GovernanceError>
        + Clone
        + Send
        + 'static,
    L::Future: Send,
{
    type Response = AuditResponse;
    type Error = GovernanceError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: AuditRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match request {
                AuditRequest::RecordAccess {
                    basis,
                    accessed_by,
                    subject_id,
                    data_types,
                    purpose,
                    source_context,
                } => this
                    .record_access(basis, accessed_by, subject_id, data_types, purpose, source_context)
                    .await
                    .map(AuditResponse::Entry),
                AuditRequest::Query(filter) => {
                    #[cfg(feature = "accord_tracing")]
                    debug!("[auditor] Query {:?}", filter);
                    Ok(AuditResponse::Listing(this.query(filter)))
                }
                AuditRequest::Count => Ok(AuditResponse::Count(this.count())),
            }
        })
    }
}
