use thiserror::Error;

use crate::governance::infrastructure::naming::{ConsentId, DataType, RequestId};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GovernanceError {
    #[error("Governance error, internal engine API error")]
    InternalGovernanceError,

    #[error("Governance error, duration must be strictly positive")]
    InvalidDuration,

    #[error("Governance error, at least one data type is required")]
    EmptyScope,

    #[error("Governance error, consent record not found (id: {0})")]
    ConsentNotFound(ConsentId),

    #[error("Governance error, data request not found (id: {0})")]
    RequestNotFound(RequestId),

    #[error("Governance error, actor is not allowed to perform this action (actor: {0})")]
    Forbidden(String),

    #[error("Governance error, data request already resolved (id: {0})")]
    AlreadyResolved(RequestId),

    #[error("Governance error, data type not covered by an active consent (data type: {0})")]
    ScopeExceeded(DataType),

    #[error("Governance error, engine temporarily unavailable, retry the operation")]
    Unavailable,
}

impl GovernanceError {
    /// Whether the error belongs to the `NotFound` class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConsentNotFound(_) | Self::RequestNotFound(_))
    }
}
