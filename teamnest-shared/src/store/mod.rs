//! Datastore contracts and backends
//!
//! Two traits split the datastore the way the engine consumes it:
//!
//! - [`EntityRegistry`]: users, courses, assignments and participant links
//! - [`TeamStore`]: teams, memberships and their node mirror
//!
//! Every write on `TeamStore` that touches both a relational row and its
//! node is one unit of work: it either applies completely or not at all.
//! Membership inserts also take the caller's [`AdmissionCheck`], evaluated
//! against a snapshot read inside that same unit of work, so "read count,
//! compare, insert" cannot interleave with a concurrent insert on the team.
//!
//! # Backends
//!
//! - [`MemoryStore`]: one `tokio::sync::Mutex` over all tables and the
//!   [`NodeArena`](crate::graph::NodeArena)
//! - [`PgStore`]: PostgreSQL via sqlx; one transaction per write with the
//!   team row locked `FOR UPDATE`

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{MembershipResult, StoreResult};
use crate::graph::{NodeGraph, TeamNode, TeamUserNode};
use crate::models::{
    Assignment, Course, CreateAssignment, CreateCourse, CreateUser, Membership, NewMembership,
    NewTeam, ParentEntity, ParentKind, ParticipantLink, Team, User,
};

/// Lookup of users, owning entities and participant links
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>>;

    /// Resolves a course or assignment
    async fn find_entity(&self, id: Uuid, kind: ParentKind) -> StoreResult<Option<ParentEntity>>;

    async fn find_participant_link(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<Option<ParticipantLink>>;

    /// Returns the existing link, or enrolls the user.
    ///
    /// Side effect: a newly created link copies
    /// `user.master_permission_granted` into `permission_granted`. An existing
    /// link is returned untouched.
    async fn find_or_create_participant(
        &self,
        user: &User,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<ParticipantLink>;

    async fn create_user(&self, data: CreateUser) -> StoreResult<User>;

    async fn create_course(&self, data: CreateCourse) -> StoreResult<Course>;

    async fn create_assignment(&self, data: CreateAssignment) -> StoreResult<Assignment>;
}

/// Membership state of one team, read inside a write unit of work
#[derive(Debug, Clone)]
pub struct AdmissionSnapshot {
    /// Team as locked by the unit of work
    pub team: Team,

    /// Memberships that occupy a regular slot
    pub member_count: u32,

    /// The candidate user's existing membership on the team, if any
    pub existing: Option<Membership>,

    /// Current mentor, if any
    pub mentor: Option<Membership>,
}

/// Rule deciding whether a membership may be inserted given a snapshot
pub type AdmissionCheck<'a> = &'a (dyn Fn(&AdmissionSnapshot) -> MembershipResult<()> + Send + Sync);

/// Result of deleting a team with everything it owns
#[derive(Debug, Clone)]
pub struct TeamDeletion {
    pub team: Team,
    pub memberships_removed: usize,
}

/// Teams, memberships and the node mirror
#[async_trait]
pub trait TeamStore: NodeGraph {
    async fn find_team(&self, team_id: Uuid) -> StoreResult<Option<Team>>;

    async fn find_team_by_name(&self, parent_id: Uuid, name: &str) -> StoreResult<Option<Team>>;

    /// Teams under an owner, oldest first
    async fn list_teams(&self, parent_id: Uuid) -> StoreResult<Vec<Team>>;

    /// Renames a team.
    ///
    /// Returns `None` if the team does not exist; `DuplicateTeamName` if the
    /// name is taken under the same parent.
    async fn rename_team(&self, team_id: Uuid, name: &str) -> MembershipResult<Option<Team>>;

    /// Inserts a team and its node in one unit of work.
    ///
    /// Fails with `DuplicateTeamName` when the name is taken under the parent.
    async fn insert_team_with_node(&self, data: NewTeam) -> MembershipResult<(Team, TeamNode)>;

    /// Deletes a team, its memberships and all of their nodes in one unit of
    /// work.
    ///
    /// Returns `None` if the team does not exist; `InvariantViolation` (and
    /// no change) if any node is missing.
    async fn delete_team_cascade(&self, team_id: Uuid) -> MembershipResult<Option<TeamDeletion>>;

    async fn find_membership(&self, membership_id: Uuid) -> StoreResult<Option<Membership>>;

    async fn find_team_membership(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>>;

    /// Memberships of a team, oldest first
    async fn list_memberships(&self, team_id: Uuid) -> StoreResult<Vec<Membership>>;

    /// Memberships that occupy a regular slot
    async fn count_members(&self, team_id: Uuid) -> StoreResult<u32>;

    /// Inserts a membership and its node in one unit of work.
    ///
    /// `admit` runs against a snapshot taken inside the unit of work, after
    /// concurrent writers to the same team are excluded. Errors:
    /// `NotFound(Team)` if the team vanished, whatever `admit` returns, and
    /// `InvariantViolation` if the team has no node.
    async fn insert_membership(
        &self,
        data: NewMembership,
        admit: AdmissionCheck<'_>,
    ) -> MembershipResult<(Membership, TeamUserNode)>;

    /// Deletes a membership and its node in one unit of work.
    ///
    /// Returns `None` if the membership does not exist; `InvariantViolation`
    /// (and no change) if its node is missing.
    async fn delete_membership(&self, membership_id: Uuid) -> MembershipResult<Option<Membership>>;
}

/// Both halves of the datastore
pub trait Datastore: EntityRegistry + TeamStore {}

impl<T> Datastore for T where T: EntityRegistry + TeamStore {}
