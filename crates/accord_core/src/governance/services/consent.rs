//! Consent ledger: lifecycle of standing consent records.
//!
//! The ledger answers whether a subject currently consents to a given use of
//! one of its data types. Records move through a small state machine:
//!
//! ```text
//! Active ──(expires_at reached / superseded)──▶ Expired
//!    │                                            │
//!    └────────────(subject revokes)──────────▶ Revoked
//! ```
//!
//! `Revoked` is terminal. Expiry is applied lazily when a read observes a
//! record past its deadline, or eagerly by the optional sweep task.
//!
//! ## Concurrency
//!
//! The active index maps each (subject, data type, purpose) tuple to its single
//! active record. Mutations of a tuple run while holding the exclusive entry of
//! the tuple in that index, which serializes concurrent grants and revokes of
//! the same tuple. Locks are always taken in the order active index, then
//! records, so the two tables never deadlock.
use std::{collections::BTreeSet, future::Future, pin::Pin, sync::Arc, task::Poll, time::Duration};

use dashmap::{DashMap, Entry};
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tower::Service;
#[cfg(feature = "accord_tracing")]
use tracing::{debug, info};

use crate::governance::{
    api::types::{LedgerRequest, LedgerResponse},
    error::GovernanceError,
    infrastructure::{
        clock::{Clock, Sequence, SystemClock},
        listing::{Listing, SearchTerm},
        naming::{ConsentId, ConsentKey, DataType, Timestamp},
    },
    services::notification::{GovernanceEvent, NotificationService},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Active,
    Expired,
    Revoked,
}

/// A subject's standing permission for one (data type, purpose) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: ConsentId,
    pub subject_id: String,
    pub data_type: DataType,
    pub purpose: String,
    pub granted_at: Timestamp,
    /// Always strictly greater than `granted_at`
    pub expires_at: Timestamp,
    pub status: ConsentStatus,
    /// Record that replaced this one when it was superseded by a new grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<ConsentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<Timestamp>,
}

impl ConsentRecord {
    pub fn key(&self) -> ConsentKey {
        ConsentKey::new(self.subject_id.clone(), self.data_type, self.purpose.clone())
    }

    /// Whether the record authorizes access at `now`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.status == ConsentStatus::Active && now < self.expires_at
    }
}

pub type ConsentListing = Listing<ConsentId, ConsentRecord>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
}

#[derive(Debug, Clone)]
pub struct ConsentLedgerService {
    clock: Arc<dyn Clock>,
    ids: Sequence,
    /// All records ever granted, keyed by id
    records: Arc<DashMap<ConsentId, ConsentRecord>>,
    /// Single active record per tuple
    active: Arc<DashMap<ConsentKey, ConsentId>>,
    /// Records of each subject, in grant order
    by_subject: Arc<DashMap<String, Vec<ConsentId>>>,
    notifications: NotificationService,
}

impl Default for ConsentLedgerService {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::default()), NotificationService::default())
    }
}

impl ConsentLedgerService {
    pub fn new(clock: Arc<dyn Clock>, notifications: NotificationService) -> Self {
        Self {
            clock,
            ids: Sequence::default(),
            records: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
            by_subject: Arc::new(DashMap::new()),
            notifications,
        }
    }

    /// Grant and expiry timestamps of a consent granted now for `ttl`.
    fn validity(&self, ttl: Duration) -> Result<(Timestamp, Timestamp), GovernanceError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).map_err(|_| GovernanceError::InvalidDuration)?;
        if ttl_ms == 0 {
            return Err(GovernanceError::InvalidDuration);
        }
        let granted_at = self.clock.now();
        let expires_at =
            granted_at.checked_add_millis(ttl_ms).ok_or(GovernanceError::InvalidDuration)?;
        Ok((granted_at, expires_at))
    }

    fn grant(&self, key: ConsentKey, ttl: Duration) -> Result<ConsentRecord, GovernanceError> {
        let (granted_at, expires_at) = self.validity(ttl)?;
        Ok(self.supersede_and_insert(key, granted_at, expires_at))
    }

    /// Grants every data type of `scope` with the same validity window.
    ///
    /// Validation happens once up front so a scope is never partially granted.
    fn grant_scope(
        &self,
        subject_id: &str,
        scope: BTreeSet<DataType>,
        purpose: &str,
        ttl: Duration,
    ) -> Result<Vec<ConsentRecord>, GovernanceError> {
        if scope.is_empty() {
            return Err(GovernanceError::EmptyScope);
        }
        let (granted_at, expires_at) = self.validity(ttl)?;
        Ok(scope
            .into_iter()
            .map(|data_type| {
                self.supersede_and_insert(
                    ConsentKey::new(subject_id, data_type, purpose),
                    granted_at,
                    expires_at,
                )
            })
            .collect())
    }

    fn supersede_and_insert(
        &self,
        key: ConsentKey,
        granted_at: Timestamp,
        expires_at: Timestamp,
    ) -> ConsentRecord {
        let id = ConsentId(self.ids.next());
        let record = ConsentRecord {
            id,
            subject_id: key.subject_id.clone(),
            data_type: key.data_type,
            purpose: key.purpose.clone(),
            granted_at,
            expires_at,
            status: ConsentStatus::Active,
            superseded_by: None,
            revoked_at: None,
        };

        let superseded = match self.active.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous = *slot.get();
                let superseded = match self.records.get_mut(&previous) {
                    Some(mut prior) if prior.status == ConsentStatus::Active => {
                        prior.status = ConsentStatus::Expired;
                        prior.superseded_by = Some(id);
                        Some(previous)
                    }
                    _ => None,
                };
                self.records.insert(id, record.clone());
                slot.insert(id);
                superseded
            }
            Entry::Vacant(slot) => {
                self.records.insert(id, record.clone());
                slot.insert(id);
                None
            }
        };
        self.by_subject.entry(record.subject_id.clone()).or_default().push(id);

        if let Some(previous) = superseded {
            #[cfg(feature = "accord_tracing")]
            debug!("[ledger] {} superseded by {}", previous, id);
            self.notifications.emit(GovernanceEvent::ConsentExpired {
                consent_id: previous,
                subject_id: record.subject_id.clone(),
                data_type: record.data_type,
                purpose: record.purpose.clone(),
            });
        }
        self.notifications.emit(GovernanceEvent::ConsentGranted {
            consent_id: id,
            subject_id: record.subject_id.clone(),
            data_type: record.data_type,
            purpose: record.purpose.clone(),
            expires_at,
        });
        record
    }

    fn revoke(
        &self,
        consent_id: ConsentId,
        acting_subject_id: &str,
    ) -> Result<ConsentRecord, GovernanceError> {
        let key = {
            let record =
                self.records.get(&consent_id).ok_or(GovernanceError::ConsentNotFound(consent_id))?;
            if record.subject_id != acting_subject_id {
                return Err(GovernanceError::Forbidden(acting_subject_id.to_string()));
            }
            record.value().key()
        };

        let slot = self.active.entry(key);
        let (revoked, changed) = {
            let mut record = self
                .records
                .get_mut(&consent_id)
                .ok_or(GovernanceError::ConsentNotFound(consent_id))?;
            if record.status == ConsentStatus::Revoked {
                (record.clone(), false)
            } else {
                record.status = ConsentStatus::Revoked;
                record.revoked_at = Some(self.clock.now());
                (record.clone(), true)
            }
        };
        if let Entry::Occupied(slot) = slot
            && *slot.get() == consent_id
        {
            slot.remove();
        }

        if changed {
            self.notifications.emit(GovernanceEvent::ConsentRevoked {
                consent_id,
                subject_id: revoked.subject_id.clone(),
                data_type: revoked.data_type,
                purpose: revoked.purpose.clone(),
            });
        }
        Ok(revoked)
    }

    /// Active record of `key` at `now`.
    ///
    /// Reads proceed under shared locks; only a read that observes an expired
    /// or superseded record falls back to [`Self::settle`].
    fn is_permitted(&self, key: &ConsentKey, now: Timestamp) -> Option<ConsentRecord> {
        let id = self.active.get(key).map(|slot| *slot.value())?;
        if let Some(record) = self
            .records
            .get(&id)
            .filter(|record| record.is_active_at(now))
            .map(|record| record.value().clone())
        {
            return Some(record);
        }
        self.settle(key, now)
    }

    /// Resolves the active record of `key` under the tuple lock, persisting
    /// the expiry of a record read past its deadline.
    fn settle(&self, key: &ConsentKey, now: Timestamp) -> Option<ConsentRecord> {
        let Entry::Occupied(slot) = self.active.entry(key.clone()) else {
            return None;
        };
        let id = *slot.get();
        let (current, expired) = match self.records.get_mut(&id) {
            Some(record) if record.is_active_at(now) => (Some(record.clone()), None),
            Some(mut record) if record.status == ConsentStatus::Active => {
                record.status = ConsentStatus::Expired;
                (None, Some(record.clone()))
            }
            _ => (None, None),
        };
        if current.is_none() {
            slot.remove();
        }

        if let Some(record) = expired {
            #[cfg(feature = "accord_tracing")]
            debug!("[ledger] {} expired at {}", record.id, record.expires_at);
            self.notifications.emit(GovernanceEvent::ConsentExpired {
                consent_id: record.id,
                subject_id: record.subject_id,
                data_type: record.data_type,
                purpose: record.purpose,
            });
        }
        current
    }

    /// The record if it is the active record of its tuple at `now`.
    fn validate(
        &self,
        consent_id: ConsentId,
        now: Timestamp,
    ) -> Result<Option<ConsentRecord>, GovernanceError> {
        let key = self
            .records
            .get(&consent_id)
            .map(|record| record.value().key())
            .ok_or(GovernanceError::ConsentNotFound(consent_id))?;
        Ok(self.is_permitted(&key, now).filter(|record| record.id == consent_id))
    }

    fn list_for_subject(
        &self,
        subject_id: &str,
        status: Option<ConsentStatus>,
        search: Option<SearchTerm>,
    ) -> ConsentListing {
        let now = self.clock.now();
        let ids = self.by_subject.get(subject_id).map(|ids| ids.value().clone()).unwrap_or_default();

        // Persist expiries before exposing statuses
        for id in &ids {
            let stale = self
                .records
                .get(id)
                .filter(|record| record.status == ConsentStatus::Active && now >= record.expires_at)
                .map(|record| record.value().key());
            if let Some(key) = stale {
                self.settle(&key, now);
            }
        }

        let mut ordered: Vec<(Timestamp, ConsentId)> = ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|record| (record.granted_at, *id)))
            .collect();
        ordered.sort_unstable_by(|a, b| b.cmp(a));

        let listing =
            Listing::new(ordered.into_iter().map(|(_, id)| id).collect(), self.records.clone());
        if status.is_none() && search.is_none() {
            return listing;
        }
        listing.with_filter(move |record| {
            status.is_none_or(|status| record.status == status)
                && search.as_ref().is_none_or(|search| {
                    search.matches(record.data_type.as_str()) || search.matches(&record.purpose)
                })
        })
    }

    /// Eagerly expires every active record past its deadline.
    fn sweep(&self, now: Timestamp) -> usize {
        let stale: Vec<ConsentKey> = self
            .active
            .iter()
            .filter(|slot| {
                self.records.get(slot.value()).is_some_and(|record| !record.is_active_at(now))
            })
            .map(|slot| slot.key().clone())
            .collect();
        stale.iter().filter(|key| self.settle(key, now).is_none()).count()
    }

    fn summary(&self) -> LedgerSummary {
        self.records.iter().fold(LedgerSummary::default(), |mut summary, record| {
            match record.status {
                ConsentStatus::Active => summary.active += 1,
                ConsentStatus::Expired => summary.expired += 1,
                ConsentStatus::Revoked => summary.revoked += 1,
            }
            summary
        })
    }

    /// Spawns the periodic expiry sweep on the current runtime.
    ///
    /// Correctness never depends on the sweep, it only keeps the active index
    /// small between reads.
    pub fn spawn_expiry_sweep(&self, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = this.sweep(this.clock.now());
                #[cfg(feature = "accord_tracing")]
                if swept > 0 {
                    info!("[ledger] sweep expired {} consent records", swept);
                }
                #[cfg(not(feature = "accord_tracing"))]
                let _ = swept;
            }
        })
    }
}

impl Service<LedgerRequest> for ConsentLedgerService {
    type Response = LedgerResponse;
    type Error = GovernanceError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: LedgerRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match request {
                LedgerRequest::Grant { subject_id, data_type, purpose, ttl } => {
                    let key = ConsentKey::new(subject_id, data_type, purpose);
                    #[cfg(feature = "accord_tracing")]
                    info!("[ledger] Grant {} for {:?}", key, ttl);
                    this.grant(key, ttl).map(LedgerResponse::Consent)
                }
                LedgerRequest::GrantScope { subject_id, data_types, purpose, ttl } => {
                    #[cfg(feature = "accord_tracing")]
                    info!(
                        "[ledger] GrantScope {:?} of {} for purpose {:?} for {:?}",
                        data_types, subject_id, purpose, ttl
                    );
                    this.grant_scope(&subject_id, data_types, &purpose, ttl)
                        .map(LedgerResponse::Consents)
                }
                LedgerRequest::Revoke { consent_id, acting_subject_id } => {
                    #[cfg(feature = "accord_tracing")]
                    info!("[ledger] Revoke {} by {}", consent_id, acting_subject_id);
                    this.revoke(consent_id, &acting_subject_id).map(LedgerResponse::Consent)
                }
                LedgerRequest::IsPermitted { key, now } => {
                    #[cfg(feature = "accord_tracing")]
                    debug!("[ledger] IsPermitted {} at {}", key, now);
                    Ok(LedgerResponse::Permitted(this.is_permitted(&key, now)))
                }
                LedgerRequest::Validate { consent_id, now } => {
                    #[cfg(feature = "accord_tracing")]
                    debug!("[ledger] Validate {} at {}", consent_id, now);
                    this.validate(consent_id, now).map(LedgerResponse::Permitted)
                }
                LedgerRequest::ListForSubject { subject_id, status, search } => {
                    #[cfg(feature = "accord_tracing")]
                    debug!(
                        "[ledger] ListForSubject {} with status {:?}, search {:?}",
                        subject_id, status, search
                    );
                    let search = SearchTerm::parse(search);
                    Ok(LedgerResponse::Listing(this.list_for_subject(&subject_id, status, search)))
                }
                LedgerRequest::Sweep { now } => Ok(LedgerResponse::Swept(this.sweep(now))),
                LedgerRequest::Summary => Ok(LedgerResponse::Summary(this.summary())),
            }
        })
    }
}
