//! Identifiers and naming conventions of the governance engine.
//!
//! Entities are keyed by typed numeric identifiers handed out by a per-table
//! [`Sequence`](super::clock::Sequence). Actors (subjects, requesters,
//! reviewers) are referred to by the opaque identifier supplied by the
//! identity provider and are kept as plain strings.
//!
//! Protected data is never handled by the engine: a [`DataType`] only names
//! a category of record held by the document/profile store.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

/// Point in time, in milliseconds since the Unix epoch.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns `None` on overflow.
    pub fn checked_add_millis(&self, millis: u64) -> Option<Self> {
        self.0.checked_add(millis).map(Self)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`ConsentRecord`](crate::governance::services::consent::ConsentRecord).
    ConsentId,
    "consent"
);
entity_id!(
    /// Identifier of a [`DataRequest`](crate::governance::services::request::DataRequest).
    RequestId,
    "request"
);
entity_id!(
    /// Identifier of an [`AccessLogEntry`](crate::governance::services::audit::AccessLogEntry).
    AccessLogId,
    "access"
);

/// Category of protected record a consent or request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    AcademicRecords,
    PersonalInfo,
    ContactInfo,
    Resume,
    Transcript,
    ProjectDetails,
    PlacementPreferences,
}

/// Retention category of a data type, used to pick a default consent duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCategory {
    Academic,
    Personal,
    Contact,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::AcademicRecords,
        DataType::PersonalInfo,
        DataType::ContactInfo,
        DataType::Resume,
        DataType::Transcript,
        DataType::ProjectDetails,
        DataType::PlacementPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::AcademicRecords => "academic-records",
            DataType::PersonalInfo => "personal-info",
            DataType::ContactInfo => "contact-info",
            DataType::Resume => "resume",
            DataType::Transcript => "transcript",
            DataType::ProjectDetails => "project-details",
            DataType::PlacementPreferences => "placement-preferences",
        }
    }

    pub fn category(&self) -> DataCategory {
        match self {
            DataType::AcademicRecords | DataType::Transcript | DataType::ProjectDetails => {
                DataCategory::Academic
            }
            DataType::ContactInfo => DataCategory::Contact,
            DataType::PersonalInfo | DataType::Resume | DataType::PlacementPreferences => {
                DataCategory::Personal
            }
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an actor, as asserted by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Recruiter,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => f.write_str("student"),
            Role::Faculty => f.write_str("faculty"),
            Role::Recruiter => f.write_str("recruiter"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

/// An authenticated actor resolving a data request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reviewer {
    pub id: String,
    pub role: Role,
}

impl Reviewer {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

/// The triple that uniquely identifies the subject matter of a consent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsentKey {
    pub subject_id: String,
    pub data_type: DataType,
    pub purpose: String,
}

impl ConsentKey {
    pub fn new(
        subject_id: impl Into<String>,
        data_type: DataType,
        purpose: impl Into<String>,
    ) -> Self {
        Self { subject_id: subject_id.into(), data_type, purpose: purpose.into() }
    }
}

impl Display for ConsentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.subject_id, self.data_type, self.purpose)
    }
}
