/// Team membership model
///
/// A membership attaches one user to one team. Each membership is mirrored
/// by exactly one [`TeamUserNode`](crate::graph::TeamUserNode); both are
/// written and removed in the same unit of work.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE team_memberships (
///     id UUID PRIMARY KEY,
///     team_id UUID NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     role VARCHAR(20) NOT NULL DEFAULT 'member',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (team_id, user_id)
/// );
/// ```
///
/// # Roles
///
/// - **member**: occupies one regular slot
/// - **mentor**: the single extra slot of a mentored team; not counted
///   against `max_members`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a user on a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Regular member, counted against capacity
    Member,

    /// Mentor of a mentored team
    Mentor,
}

impl MemberRole {
    /// Converts role to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Mentor => "mentor",
        }
    }

    /// Parses role from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "member" => Some(MemberRole::Member),
            "mentor" => Some(MemberRole::Mentor),
            _ => None,
        }
    }

    /// Whether this role occupies a regular capacity slot
    pub fn counts_toward_capacity(&self) -> bool {
        matches!(self, MemberRole::Member)
    }
}

/// Membership row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Unique membership ID
    pub id: Uuid,

    /// Team
    pub team_id: Uuid,

    /// User
    pub user_id: Uuid,

    /// Role on the team
    pub role: MemberRole,

    /// When the user joined
    pub created_at: DateTime<Utc>,
}

/// Input for creating a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMembership {
    /// Team
    pub team_id: Uuid,

    /// User
    pub user_id: Uuid,

    /// Role to assign (defaults to Member)
    #[serde(default = "default_role")]
    pub role: MemberRole,
}

fn default_role() -> MemberRole {
    MemberRole::Member
}

impl NewMembership {
    /// Regular membership
    pub fn member(team_id: Uuid, user_id: Uuid) -> Self {
        NewMembership {
            team_id,
            user_id,
            role: MemberRole::Member,
        }
    }

    /// Mentor membership
    pub fn mentor(team_id: Uuid, user_id: Uuid) -> Self {
        NewMembership {
            team_id,
            user_id,
            role: MemberRole::Mentor,
        }
    }

    /// Materializes the row with a fresh ID
    pub fn into_membership(self) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            team_id: self.team_id,
            user_id: self.user_id,
            role: self.role,
            created_at: Utc::now(),
        }
    }
}
