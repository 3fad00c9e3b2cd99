//! # HTTP Transport Implementation
//!
//! This module binds the governance façade to an HTTP/JSON API with [`axum`].
//! Bodies use camelCase field names, durations are expressed in seconds.
//!
//! ## Routes
//!
//! | Method | Path                     | Operation                          |
//! |--------|--------------------------|------------------------------------|
//! | POST   | `/grant`                 | grant consent                      |
//! | POST   | `/revoke`                | revoke consent                     |
//! | POST   | `/access-check`          | check and record an access         |
//! | POST   | `/request`               | open a data request                |
//! | POST   | `/request/:id/resolve`   | approve or deny a data request     |
//! | GET    | `/request/:id`           | fetch a data request               |
//! | GET    | `/logs`                  | page of the audit trail            |
//! | GET    | `/consents`              | consents of a subject              |
//! | GET    | `/requests`              | review queue                       |
//! | GET    | `/summary`               | governance counters                |
//!
//! ## Errors
//!
//! Every [`GovernanceError`] maps to a status code and a `{error, code}` body.
//! Malformed bodies, query strings and path parameters are answered with the
//! same body under the `INVALID_REQUEST` code.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::{Service, ServiceExt};
#[cfg(feature = "accord_tracing")]
use tracing::{error, info};

use crate::governance::{
    api::types::{AccessDecision, Decision, GovernanceRequest, GovernanceResponse, GovernanceSummary},
    error::GovernanceError,
    infrastructure::naming::{AccessLogId, ConsentId, DataType, RequestId, Reviewer, Role, Timestamp},
    services::{
        audit::{AccessLogEntry, AccessLogFilter},
        consent::{ConsentRecord, ConsentStatus},
        request::{DataRequest, RequestStatus},
    },
};

/// Default port of the governance HTTP API.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Audit trail page size when `limit` is omitted.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Largest audit trail page served at once.
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantBody {
    pub subject_id: String,
    pub data_type: DataType,
    pub purpose: String,
    /// Category default when omitted
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeBody {
    pub consent_record_id: ConsentId,
    pub acting_subject_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckBody {
    pub accessed_by: String,
    pub subject_id: String,
    pub data_types: Vec<DataType>,
    pub purpose: String,
    #[serde(default)]
    pub source_context: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequestBody {
    pub requester_id: String,
    pub requester_role: Role,
    pub subject_id: String,
    pub data_types: Vec<DataType>,
    pub purpose: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    pub reviewer_id: String,
    pub reviewer_role: Role,
    pub decision: Decision,
    pub grant_ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub subject_id: Option<String>,
    pub accessed_by: Option<String>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub data_type: Option<DataType>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentsQuery {
    pub subject_id: String,
    pub status: Option<ConsentStatus>,
    /// Matched against data type and purpose
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestsQuery {
    pub status: Option<RequestStatus>,
    pub role: Option<Role>,
    /// Matched against requester, data types and purpose
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "decision", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AccessCheckReply {
    Permitted {
        log_entry_id: AccessLogId,
        #[serde(flatten)]
        entry: AccessLogEntry,
    },
    RequiresRequest {
        missing: Vec<DataType>,
    },
}

impl From<AccessDecision> for AccessCheckReply {
    fn from(decision: AccessDecision) -> Self {
        match decision {
            AccessDecision::Permitted(entry) => Self::Permitted { log_entry_id: entry.id, entry },
            AccessDecision::RequiresRequest { missing } => Self::RequiresRequest { missing },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPage {
    pub entries: Vec<AccessLogEntry>,
    pub offset: usize,
    pub limit: usize,
    /// Whether entries remain past this page
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// JSON body extractor answering rejections with an [`ErrorBody`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(InvalidRequest))]
pub struct ApiJson<T>(pub T);

/// Query string extractor answering rejections with an [`ErrorBody`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(InvalidRequest))]
pub struct ApiQuery<T>(pub T);

/// Path parameter extractor answering rejections with an [`ErrorBody`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(InvalidRequest))]
pub struct ApiPath<T>(pub T);

/// Input the router could not decode.
#[derive(Debug)]
pub struct InvalidRequest {
    status: StatusCode,
    message: String,
}

impl From<JsonRejection> for InvalidRequest {
    fn from(rejection: JsonRejection) -> Self {
        Self { status: rejection.status(), message: rejection.body_text() }
    }
}

impl From<QueryRejection> for InvalidRequest {
    fn from(rejection: QueryRejection) -> Self {
        Self { status: rejection.status(), message: rejection.body_text() }
    }
}

impl From<PathRejection> for InvalidRequest {
    fn from(rejection: PathRejection) -> Self {
        Self { status: rejection.status(), message: rejection.body_text() }
    }
}

impl IntoResponse for InvalidRequest {
    fn into_response(self) -> Response {
        #[cfg(feature = "accord_tracing")]
        info!("[http] rejected input: {}", self.message);
        (self.status, Json(ErrorBody { error: self.message, code: "INVALID_REQUEST" }))
            .into_response()
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GovernanceError::InvalidDuration => (StatusCode::BAD_REQUEST, "INVALID_DURATION"),
            GovernanceError::EmptyScope => (StatusCode::BAD_REQUEST, "EMPTY_SCOPE"),
            GovernanceError::ConsentNotFound(_) | GovernanceError::RequestNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            GovernanceError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            GovernanceError::AlreadyResolved(_) => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
            GovernanceError::ScopeExceeded(_) => (StatusCode::FORBIDDEN, "SCOPE_EXCEEDED"),
            GovernanceError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            GovernanceError::InternalGovernanceError => {
                #[cfg(feature = "accord_tracing")]
                error!("[http] {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        (status, Json(ErrorBody { error: self.to_string(), code })).into_response()
    }
}

/// Converts a duration in seconds, rejecting zero and negative values.
pub fn ttl_from_secs(seconds: i64) -> Result<Duration, GovernanceError> {
    u64::try_from(seconds)
        .ok()
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
        .ok_or(GovernanceError::InvalidDuration)
}

/// Builds the HTTP router over a governance service.
pub fn router<S>(governance: S) -> Router
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    Router::new()
        .route("/grant", post(grant::<S>))
        .route("/revoke", post(revoke::<S>))
        .route("/access-check", post(access_check::<S>))
        .route("/request", post(open_request::<S>))
        .route("/request/:id", get(get_request::<S>))
        .route("/request/:id/resolve", post(resolve_request::<S>))
        .route("/logs", get(logs::<S>))
        .route("/consents", get(consents::<S>))
        .route("/requests", get(requests::<S>))
        .route("/summary", get(summary::<S>))
        .with_state(governance)
}

async fn grant<S>(
    State(governance): State<S>,
    ApiJson(body): ApiJson<GrantBody>,
) -> Result<Json<ConsentRecord>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    let ttl = body.ttl_seconds.map(ttl_from_secs).transpose()?;
    match governance
        .oneshot(GovernanceRequest::Grant {
            subject_id: body.subject_id,
            data_type: body.data_type,
            purpose: body.purpose,
            ttl,
        })
        .await?
    {
        GovernanceResponse::Consent(record) => Ok(Json(record)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn revoke<S>(
    State(governance): State<S>,
    ApiJson(body): ApiJson<RevokeBody>,
) -> Result<Json<ConsentRecord>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance
        .oneshot(GovernanceRequest::Revoke {
            consent_id: body.consent_record_id,
            acting_subject_id: body.acting_subject_id,
        })
        .await?
    {
        GovernanceResponse::Consent(record) => Ok(Json(record)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn access_check<S>(
    State(governance): State<S>,
    ApiJson(body): ApiJson<AccessCheckBody>,
) -> Result<Json<AccessCheckReply>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance
        .oneshot(GovernanceRequest::CheckAccess {
            accessed_by: body.accessed_by,
            subject_id: body.subject_id,
            data_types: body.data_types,
            purpose: body.purpose,
            source_context: body.source_context,
        })
        .await?
    {
        GovernanceResponse::Access(decision) => Ok(Json(decision.into())),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn open_request<S>(
    State(governance): State<S>,
    ApiJson(body): ApiJson<OpenRequestBody>,
) -> Result<Json<DataRequest>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance
        .oneshot(GovernanceRequest::OpenRequest {
            requester_id: body.requester_id,
            requester_role: body.requester_role,
            subject_id: body.subject_id,
            data_types: body.data_types,
            purpose: body.purpose,
        })
        .await?
    {
        GovernanceResponse::Request(request) => Ok(Json(request)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn resolve_request<S>(
    State(governance): State<S>,
    ApiPath(request_id): ApiPath<RequestId>,
    ApiJson(body): ApiJson<ResolveBody>,
) -> Result<Json<DataRequest>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    // A denial carries no grant
    let grant_ttl = match body.decision {
        Decision::Approved => body.grant_ttl_seconds.map(ttl_from_secs).transpose()?,
        Decision::Denied => None,
    };
    #[cfg(feature = "accord_tracing")]
    info!("[http] resolve {} as {:?} by {}", request_id, body.decision, body.reviewer_id);
    match governance
        .oneshot(GovernanceRequest::ResolveRequest {
            request_id,
            reviewer: Reviewer::new(body.reviewer_id, body.reviewer_role),
            decision: body.decision,
            grant_ttl,
        })
        .await?
    {
        GovernanceResponse::Request(request) => Ok(Json(request)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn get_request<S>(
    State(governance): State<S>,
    ApiPath(request_id): ApiPath<RequestId>,
) -> Result<Json<DataRequest>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance.oneshot(GovernanceRequest::GetRequest(request_id)).await? {
        GovernanceResponse::Request(request) => Ok(Json(request)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn logs<S>(
    State(governance): State<S>,
    ApiQuery(query): ApiQuery<LogsQuery>,
) -> Result<Json<LogsPage>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    let offset = query.offset.unwrap_or_default();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let filter = AccessLogFilter {
        subject_id: query.subject_id,
        accessed_by: query.accessed_by,
        from: query.from,
        to: query.to,
        data_type: query.data_type,
    };
    match governance.oneshot(GovernanceRequest::QueryLogs(filter)).await? {
        GovernanceResponse::Logs(listing) => {
            // One extra entry tells whether another page exists
            let mut entries: Vec<_> = listing.iter().skip(offset).take(limit + 1).collect();
            let has_more = entries.len() > limit;
            entries.truncate(limit);
            Ok(Json(LogsPage { entries, offset, limit, has_more }))
        }
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn consents<S>(
    State(governance): State<S>,
    ApiQuery(query): ApiQuery<ConsentsQuery>,
) -> Result<Json<Vec<ConsentRecord>>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance
        .oneshot(GovernanceRequest::ListConsents {
            subject_id: query.subject_id,
            status: query.status,
            search: query.search,
        })
        .await?
    {
        GovernanceResponse::Consents(listing) => Ok(Json(listing.iter().collect())),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn requests<S>(
    State(governance): State<S>,
    ApiQuery(query): ApiQuery<RequestsQuery>,
) -> Result<Json<Vec<DataRequest>>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance
        .oneshot(GovernanceRequest::ListRequests {
            status: query.status,
            role: query.role,
            search: query.search,
        })
        .await?
    {
        GovernanceResponse::Requests(listing) => Ok(Json(listing.iter().collect())),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}

async fn summary<S>(State(governance): State<S>) -> Result<Json<GovernanceSummary>, GovernanceError>
where
    S: Service<GovernanceRequest, Response = GovernanceResponse, Error = GovernanceError>
        + Send
        + 'static,
    S::Future: Send,
{
    match governance.oneshot(GovernanceRequest::Summary).await? {
        GovernanceResponse::Summary(summary) => Ok(Json(summary)),
        _ => Err(GovernanceError::InternalGovernanceError),
    }
}
