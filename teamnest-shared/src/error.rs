//! Error types for the membership engine and its datastores
//!
//! Validation failures (`NotAParticipant`, `TeamFull`, `DuplicateMembership`, ...)
//! are ordinary values that batch callers collect and continue past.
//! `InvariantViolation` and `Store` are fatal: the first means the relational
//! rows and their node mirror have diverged, the second that the datastore
//! itself failed.
//!
//! # Example
//!
//! ```
//! use teamnest_shared::error::{EntityRef, MembershipError};
//! use uuid::Uuid;
//!
//! let err = MembershipError::NotFound(EntityRef::Team(Uuid::nil()));
//! assert!(!err.is_fatal());
//! assert_eq!(err.code(), "not_found");
//! ```

use std::fmt;

use uuid::Uuid;

use crate::models::entity::ParentKind;

/// Result alias used by every engine operation
pub type MembershipResult<T> = Result<T, MembershipError>;

/// Result alias used by datastore primitives
pub type StoreResult<T> = Result<T, StoreError>;

/// Identifies the record a `NotFound` error refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// User looked up by ID
    User(Uuid),

    /// User looked up by login name (roster rows, request layer)
    UserName(String),

    /// Course
    Course(Uuid),

    /// Assignment
    Assignment(Uuid),

    /// Team
    Team(Uuid),

    /// Membership row
    Membership(Uuid),
}

impl EntityRef {
    /// Builds the reference for an owning entity of the given kind
    pub fn parent(kind: ParentKind, id: Uuid) -> Self {
        match kind {
            ParentKind::Course => EntityRef::Course(id),
            ParentKind::Assignment => EntityRef::Assignment(id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::User(id) => write!(f, "user {}", id),
            EntityRef::UserName(name) => write!(f, "user \"{}\"", name),
            EntityRef::Course(id) => write!(f, "course {}", id),
            EntityRef::Assignment(id) => write!(f, "assignment {}", id),
            EntityRef::Team(id) => write!(f, "team {}", id),
            EntityRef::Membership(id) => write!(f, "membership {}", id),
        }
    }
}

/// Datastore failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Login names are unique across users
    #[error("A user named \"{0}\" already exists")]
    DuplicateUserName(String),

    /// A stored value could not be mapped back onto the domain model
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Error returned by membership, hierarchy, transfer and copy operations
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(EntityRef),

    /// User has no participant link under the team's owning entity
    #[error("User {user_id} is not a participant of {parent_kind} {parent_id}")]
    NotAParticipant {
        user_id: Uuid,
        parent_id: Uuid,
        parent_kind: ParentKind,
    },

    /// User is already on the team
    #[error("User {user_id} is already a member of team {team_id}")]
    DuplicateMembership { team_id: Uuid, user_id: Uuid },

    /// Team has no regular slot left
    #[error("Team {team_id} already has the maximum number of members ({max_members})")]
    TeamFull { team_id: Uuid, max_members: u32 },

    /// User is not on the team
    #[error("User {user_id} is not a member of team {team_id}")]
    NotAMember { team_id: Uuid, user_id: Uuid },

    /// Roster row could not be interpreted
    #[error("Invalid roster row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    /// Team name already used under the same parent
    #[error("A team named \"{name}\" already exists under {parent_id}")]
    DuplicateTeamName { parent_id: Uuid, name: String },

    /// Team name is blank
    #[error("Team name must not be blank")]
    BlankTeamName,

    /// Team kind cannot live under the given parent kind
    #[error("A {kind} cannot belong to a {parent_kind}")]
    KindMismatch { kind: &'static str, parent_kind: ParentKind },

    /// Mentor requested on a team that is not mentored
    #[error("Team {0} does not take a mentor")]
    NotMentored(Uuid),

    /// Mentored team already has its mentor
    #[error("Team {0} already has a mentor")]
    MentorAlreadyAssigned(Uuid),

    /// Relational rows and node mirror disagree
    #[error("Node mirror invariant violated: {0}")]
    InvariantViolation(String),

    /// Datastore failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MembershipError {
    /// True when the error signals corruption or an unavailable datastore
    /// rather than a rejected request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MembershipError::InvariantViolation(_) | MembershipError::Store(_)
        )
    }

    /// Stable machine-readable code for the request layer
    pub fn code(&self) -> &'static str {
        match self {
            MembershipError::NotFound(_) => "not_found",
            MembershipError::NotAParticipant { .. } => "not_a_participant",
            MembershipError::DuplicateMembership { .. } => "duplicate_membership",
            MembershipError::TeamFull { .. } => "team_full",
            MembershipError::NotAMember { .. } => "not_a_member",
            MembershipError::InvalidRow { .. } => "invalid_row",
            MembershipError::DuplicateTeamName { .. } => "duplicate_team_name",
            MembershipError::BlankTeamName => "blank_team_name",
            MembershipError::KindMismatch { .. } => "kind_mismatch",
            MembershipError::NotMentored(_) => "not_mentored",
            MembershipError::MentorAlreadyAssigned(_) => "mentor_already_assigned",
            MembershipError::InvariantViolation(_) => "invariant_violation",
            MembershipError::Store(_) => "store_error",
        }
    }
}

impl From<sqlx::Error> for MembershipError {
    fn from(err: sqlx::Error) -> Self {
        MembershipError::Store(StoreError::Database(err))
    }
}

/// True when a database error is a unique constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map_or(false, |code| code == "23505")
}
