/// Team model
///
/// A team is a typed node under a course or an assignment. The three kinds
/// share one row shape and differ only in the rules looked up through
/// [`TeamKind`]: which owner they accept, how their default capacity is
/// derived, and whether they carry a mentor slot.
///
/// | kind              | owner      | default `max_members`          | mentor slot |
/// |-------------------|------------|--------------------------------|-------------|
/// | `CourseTeam`      | course     | `course.max_team_size`         | no          |
/// | `AssignmentTeam`  | assignment | `assignment.max_team_size`     | no          |
/// | `MentoredTeam`    | assignment | `assignment.max_team_size`     | yes         |
///
/// # Schema
///
/// ```sql
/// CREATE TABLE teams (
///     id UUID PRIMARY KEY,
///     parent_id UUID NOT NULL,
///     parent_kind VARCHAR(20) NOT NULL,
///     name VARCHAR(255) NOT NULL,
///     max_members INTEGER,
///     kind VARCHAR(30) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (parent_id, name)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Assignment, ParentEntity, ParentKind};
use crate::error::{MembershipError, MembershipResult};

/// Team variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    /// Team owned by a course
    CourseTeam,

    /// Plain team owned by an assignment
    AssignmentTeam,

    /// Assignment team with a mentor slot outside its regular capacity
    MentoredTeam,
}

impl TeamKind {
    /// Converts kind to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamKind::CourseTeam => "course_team",
            TeamKind::AssignmentTeam => "assignment_team",
            TeamKind::MentoredTeam => "mentored_team",
        }
    }

    /// Parses kind from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "course_team" => Some(TeamKind::CourseTeam),
            "assignment_team" => Some(TeamKind::AssignmentTeam),
            "mentored_team" => Some(TeamKind::MentoredTeam),
            _ => None,
        }
    }

    /// Owner kind this team variant belongs under.
    ///
    /// This is also the participant kind a user needs to join.
    pub fn parent_kind(&self) -> ParentKind {
        match self {
            TeamKind::CourseTeam => ParentKind::Course,
            TeamKind::AssignmentTeam | TeamKind::MentoredTeam => ParentKind::Assignment,
        }
    }

    /// Whether teams of this kind take a mentor
    pub fn auto_assign_mentor(&self) -> bool {
        matches!(self, TeamKind::MentoredTeam)
    }

    /// Picks the strategy for a team created under an assignment
    pub fn for_assignment(assignment: &Assignment) -> Self {
        if assignment.auto_assign_mentor {
            TeamKind::MentoredTeam
        } else {
            TeamKind::AssignmentTeam
        }
    }

    /// Picks the strategy for a team created under any owner
    pub fn for_parent(parent: &ParentEntity) -> Self {
        match parent {
            ParentEntity::Course(_) => TeamKind::CourseTeam,
            ParentEntity::Assignment(assignment) => TeamKind::for_assignment(assignment),
        }
    }

    /// Default capacity for a new team of this kind under `parent`.
    ///
    /// `None` means unbounded. Mentored teams get the same regular slots as
    /// plain assignment teams; the mentor is not counted.
    pub fn default_max_members(&self, parent: &ParentEntity) -> Option<u32> {
        match parent {
            ParentEntity::Course(course) => course.max_team_size,
            ParentEntity::Assignment(assignment) => Some(assignment.max_team_size),
        }
    }

    /// Factory for a default-initialized team of this kind.
    ///
    /// # Errors
    ///
    /// - `KindMismatch` if `parent` is not the owner kind this variant requires
    /// - `BlankTeamName` if `name` is empty after trimming
    pub fn prototype(&self, parent: &ParentEntity, name: &str) -> MembershipResult<NewTeam> {
        if parent.kind() != self.parent_kind() {
            return Err(MembershipError::KindMismatch {
                kind: self.as_str(),
                parent_kind: parent.kind(),
            });
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(MembershipError::BlankTeamName);
        }

        Ok(NewTeam {
            parent_id: parent.id(),
            parent_kind: parent.kind(),
            name: name.to_string(),
            max_members: self.default_max_members(parent),
            kind: *self,
        })
    }
}

/// Team row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Unique team ID
    pub id: Uuid,

    /// Owning course or assignment
    pub parent_id: Uuid,

    /// Kind of `parent_id`
    pub parent_kind: ParentKind,

    /// Team name, unique under its parent
    pub name: String,

    /// Regular member slots; `None` is unbounded
    pub max_members: Option<u32>,

    /// Team variant
    pub kind: TeamKind,

    /// When the team was created
    pub created_at: DateTime<Utc>,
}

impl Team {
    /// Participant kind a user needs to join this team
    pub fn required_participant_kind(&self) -> ParentKind {
        self.kind.parent_kind()
    }

    /// Whether `member_count` regular members fill the team
    pub fn is_full(&self, member_count: u32) -> bool {
        self.max_members.map_or(false, |max| member_count >= max)
    }

    /// Free regular slots given `member_count`; never negative
    pub fn remaining(&self, member_count: u32) -> Option<u32> {
        self.max_members.map(|max| max.saturating_sub(member_count))
    }
}

/// Input for creating a team together with its node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeam {
    pub parent_id: Uuid,
    pub parent_kind: ParentKind,
    pub name: String,
    pub max_members: Option<u32>,
    pub kind: TeamKind,
}

impl NewTeam {
    /// Materializes the row with a fresh ID
    pub fn into_team(self) -> Team {
        Team {
            id: Uuid::new_v4(),
            parent_id: self.parent_id,
            parent_kind: self.parent_kind,
            name: self.name,
            max_members: self.max_members,
            kind: self.kind,
            created_at: Utc::now(),
        }
    }
}
