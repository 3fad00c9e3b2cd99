//! Governance API type definitions.
//!
//! This module defines the request and response types of every governance
//! service. Each component is a [`tower::Service`] over one request enum and
//! answers with the matching response enum:
//!
//! ## Governance Façade
//! The single entry point used by external collaborators. It mirrors the
//! request/response boundary of the engine: consent grant and revocation,
//! access checks, data requests and their review, audit and listing queries.
//!
//! ## Internal Service APIs
//! - **Ledger**: consent record lifecycle and permission lookups
//! - **Workflow**: data request lifecycle and review queues
//! - **Auditor**: append-only access log and its queries

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::governance::{
    infrastructure::naming::{ConsentId, ConsentKey, DataType, RequestId, Reviewer, Role, Timestamp},
    services::{
        audit::{AccessLogEntry, AccessLogFilter, AccessLogListing},
        consent::{ConsentListing, ConsentRecord, ConsentStatus, LedgerSummary},
        request::{DataRequest, RequestListing, RequestStatus, WorkflowSummary},
    },
};

/// Requests served by the governance façade.
#[derive(Debug, Clone)]
pub enum GovernanceRequest {
    /// Record a subject's consent for one (data type, purpose) pair.
    ///
    /// Without a `ttl`, the configured default duration of the data type is used.
    Grant { subject_id: String, data_type: DataType, purpose: String, ttl: Option<Duration> },
    /// Withdraw a consent, only its subject may do so.
    Revoke { consent_id: ConsentId, acting_subject_id: String },
    /// Decide whether `accessed_by` may access `data_types` of the subject now,
    /// recording the access when it is fully authorized.
    CheckAccess {
        accessed_by: String,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
        /// Opaque caller context, e.g. IP address or origin
        source_context: String,
    },
    /// Ask for data absent standing consent.
    OpenRequest {
        requester_id: String,
        requester_role: Role,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
    },
    /// Approve or deny a pending data request.
    ResolveRequest {
        request_id: RequestId,
        reviewer: Reviewer,
        decision: Decision,
        /// Required when approving
        grant_ttl: Option<Duration>,
    },
    GetRequest(RequestId),
    QueryLogs(AccessLogFilter),
    /// Consents of a subject, optionally narrowed by status and by a
    /// case-insensitive search over data type and purpose.
    ListConsents { subject_id: String, status: Option<ConsentStatus>, search: Option<String> },
    /// Requests, optionally narrowed by status, requester role and a
    /// case-insensitive search over requester, data types and purpose.
    ListRequests { status: Option<RequestStatus>, role: Option<Role>, search: Option<String> },
    Summary,
}

/// Responses of the governance façade.
#[derive(Debug, Clone)]
pub enum GovernanceResponse {
    Consent(ConsentRecord),
    Access(AccessDecision),
    Request(DataRequest),
    Logs(AccessLogListing),
    Consents(ConsentListing),
    Requests(RequestListing),
    Summary(GovernanceSummary),
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Every data type is covered by an active consent; the access was recorded.
    Permitted(AccessLogEntry),
    /// Some data types lack consent; nothing was recorded.
    RequiresRequest { missing: Vec<DataType> },
}

/// Reviewer decision on a pending data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GovernanceSummary {
    pub consents: LedgerSummary,
    pub requests: WorkflowSummary,
    pub accesses: usize,
}

/// Consent ledger requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRequest {
    Grant { subject_id: String, data_type: DataType, purpose: String, ttl: Duration },
    /// Grant every data type of a scope at once, used by request approval.
    GrantScope { subject_id: String, data_types: BTreeSet<DataType>, purpose: String, ttl: Duration },
    Revoke { consent_id: ConsentId, acting_subject_id: String },
    /// Active record of a tuple at `now`, applying lazy expiry.
    IsPermitted { key: ConsentKey, now: Timestamp },
    /// The record if it is still the active record of its tuple at `now`.
    Validate { consent_id: ConsentId, now: Timestamp },
    ListForSubject { subject_id: String, status: Option<ConsentStatus>, search: Option<String> },
    Sweep { now: Timestamp },
    Summary,
}

#[derive(Debug, Clone)]
pub enum LedgerResponse {
    Consent(ConsentRecord),
    Consents(Vec<ConsentRecord>),
    Permitted(Option<ConsentRecord>),
    Listing(ConsentListing),
    Swept(usize),
    Summary(LedgerSummary),
}

/// Request workflow requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowRequest {
    Open {
        requester_id: String,
        requester_role: Role,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
    },
    Resolve {
        request_id: RequestId,
        reviewer: Reviewer,
        decision: Decision,
        grant_ttl: Option<Duration>,
    },
    Get(RequestId),
    /// Requests filtered by status and requester role, oldest first.
    List { status: Option<RequestStatus>, role: Option<Role>, search: Option<String> },
    Summary,
}

#[derive(Debug, Clone)]
pub enum WorkflowResponse {
    Request(DataRequest),
    Listing(RequestListing),
    Summary(WorkflowSummary),
}

/// Access auditor requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRequest {
    /// Append an access authorized by the `basis` consents.
    RecordAccess {
        basis: Vec<ConsentId>,
        accessed_by: String,
        subject_id: String,
        data_types: Vec<DataType>,
        purpose: String,
        source_context: String,
    },
    Query(AccessLogFilter),
    Count,
}

#[derive(Debug, Clone)]
pub enum AuditResponse {
    Entry(AccessLogEntry),
    Listing(AccessLogListing),
    Count(usize),
}
