/// Users and the entities that own teams
///
/// Teams hang off either a course or an assignment. Both are "owning
/// entities": a user must hold a participant link to the owner before
/// joining any team under it.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY,
///     name VARCHAR(255) NOT NULL UNIQUE,
///     full_name VARCHAR(255),
///     email VARCHAR(255),
///     master_permission_granted BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE courses (
///     id UUID PRIMARY KEY,
///     name VARCHAR(255) NOT NULL,
///     max_team_size INTEGER,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE assignments (
///     id UUID PRIMARY KEY,
///     course_id UUID REFERENCES courses(id) ON DELETE SET NULL,
///     name VARCHAR(255) NOT NULL,
///     max_team_size INTEGER NOT NULL,
///     auto_assign_mentor BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator for a team's owning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentKind {
    /// Owned by a course
    Course,

    /// Owned by an assignment
    Assignment,
}

impl ParentKind {
    /// Converts kind to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Course => "course",
            ParentKind::Assignment => "assignment",
        }
    }

    /// Parses kind from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "course" => Some(ParentKind::Course),
            "assignment" => Some(ParentKind::Assignment),
            _ => None,
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account as seen by the team engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Unique login handle, used by roster rows
    pub name: String,

    /// Display name
    pub full_name: Option<String>,

    /// Contact address
    pub email: Option<String>,

    /// Copied onto participant links created on the user's behalf
    pub master_permission_granted: bool,

    /// When the user was created
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Unique login handle
    pub name: String,

    /// Display name
    pub full_name: Option<String>,

    /// Contact address
    pub email: Option<String>,

    /// Master permission flag
    #[serde(default)]
    pub master_permission_granted: bool,
}

impl CreateUser {
    /// Shorthand for a user with only a login name
    pub fn named(name: impl Into<String>) -> Self {
        CreateUser {
            name: name.into(),
            full_name: None,
            email: None,
            master_permission_granted: false,
        }
    }
}

/// Course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Unique course ID
    pub id: Uuid,

    /// Course title
    pub name: String,

    /// Cap applied to new course teams; `None` leaves them unbounded
    pub max_team_size: Option<u32>,

    /// When the course was created
    pub created_at: DateTime<Utc>,
}

/// Input for creating a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourse {
    /// Course title
    pub name: String,

    /// Optional course team cap
    #[serde(default)]
    pub max_team_size: Option<u32>,
}

/// Assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment ID
    pub id: Uuid,

    /// Course this assignment belongs to, if any
    pub course_id: Option<Uuid>,

    /// Assignment title
    pub name: String,

    /// Regular member slots per team
    pub max_team_size: u32,

    /// Teams created under this assignment get a mentor slot
    pub auto_assign_mentor: bool,

    /// When the assignment was created
    pub created_at: DateTime<Utc>,
}

/// Input for creating an assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssignment {
    /// Owning course
    #[serde(default)]
    pub course_id: Option<Uuid>,

    /// Assignment title
    pub name: String,

    /// Regular member slots per team
    pub max_team_size: u32,

    /// Whether teams get a mentor slot
    #[serde(default)]
    pub auto_assign_mentor: bool,
}

/// Resolved owning entity of a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParentEntity {
    /// Course owner
    Course(Course),

    /// Assignment owner
    Assignment(Assignment),
}

impl ParentEntity {
    pub fn id(&self) -> Uuid {
        match self {
            ParentEntity::Course(course) => course.id,
            ParentEntity::Assignment(assignment) => assignment.id,
        }
    }

    pub fn kind(&self) -> ParentKind {
        match self {
            ParentEntity::Course(_) => ParentKind::Course,
            ParentEntity::Assignment(_) => ParentKind::Assignment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ParentEntity::Course(course) => &course.name,
            ParentEntity::Assignment(assignment) => &assignment.name,
        }
    }
}
