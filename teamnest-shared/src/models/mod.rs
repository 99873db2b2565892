/// Domain models for TeamNest
///
/// Plain data types shared by both datastores. Row mapping lives with each
/// store; these types carry no persistence code.
///
/// # Models
///
/// - `entity`: users, courses, assignments and the `ParentKind` discriminator
/// - `participant`: enrollment links that make a user eligible for teams
/// - `team`: teams and the `TeamKind` variant rules
/// - `membership`: user-on-team rows and member roles

pub mod entity;
pub mod membership;
pub mod participant;
pub mod team;

pub use entity::{
    Assignment, Course, CreateAssignment, CreateCourse, CreateUser, ParentEntity, ParentKind,
    User,
};
pub use membership::{MemberRole, Membership, NewMembership};
pub use participant::ParticipantLink;
pub use team::{NewTeam, Team, TeamKind};
