//! In-memory datastore
//!
//! All tables and the node arena sit behind a single `tokio::sync::Mutex`.
//! Each trait method takes the guard once, so every write (including the
//! admission check that precedes a membership insert) is serialized against
//! every other write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{AdmissionCheck, AdmissionSnapshot, EntityRegistry, TeamDeletion, TeamStore};
use crate::error::{EntityRef, MembershipError, MembershipResult, StoreError, StoreResult};
use crate::graph::{
    missing_team_node, missing_user_node, NodeArena, NodeGraph, TeamNode, TeamUserNode,
};
use crate::models::{
    Assignment, Course, CreateAssignment, CreateCourse, CreateUser, MemberRole, Membership,
    NewMembership, NewTeam, ParentEntity, ParentKind, ParticipantLink, Team, User,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    assignments: HashMap<Uuid, Assignment>,
    participants: Vec<ParticipantLink>,
    // Insertion order doubles as "oldest first".
    teams: Vec<Team>,
    memberships: Vec<Membership>,
    graph: NodeArena,
}

impl MemoryState {
    fn team(&self, team_id: Uuid) -> Option<&Team> {
        self.teams.iter().find(|team| team.id == team_id)
    }

    fn name_taken(&self, parent_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
        self.teams
            .iter()
            .any(|team| team.parent_id == parent_id && team.name == name && Some(team.id) != except)
    }

    fn memberships_of(&self, team_id: Uuid) -> impl Iterator<Item = &Membership> {
        self.memberships
            .iter()
            .filter(move |membership| membership.team_id == team_id)
    }

    fn count_members(&self, team_id: Uuid) -> u32 {
        self.memberships_of(team_id)
            .filter(|membership| membership.role.counts_toward_capacity())
            .count() as u32
    }
}

/// Datastore backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of team nodes and team user nodes currently stored
    pub async fn node_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.graph.team_node_count(), state.graph.user_node_count())
    }

    #[cfg(test)]
    async fn detach_user_node(&self, membership_id: Uuid) {
        self.state.lock().await.graph.delete_user_node(membership_id);
    }

    #[cfg(test)]
    async fn detach_team_node(&self, team_id: Uuid) {
        self.state.lock().await.graph.delete_node(team_id);
    }
}

#[async_trait]
impl EntityRegistry for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|user| user.name == name).cloned())
    }

    async fn find_entity(&self, id: Uuid, kind: ParentKind) -> StoreResult<Option<ParentEntity>> {
        let state = self.state.lock().await;
        let entity = match kind {
            ParentKind::Course => state.courses.get(&id).cloned().map(ParentEntity::Course),
            ParentKind::Assignment => state
                .assignments
                .get(&id)
                .cloned()
                .map(ParentEntity::Assignment),
        };
        Ok(entity)
    }

    async fn find_participant_link(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<Option<ParticipantLink>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .find(|link| {
                link.user_id == user_id
                    && link.parent_id == parent_id
                    && link.parent_kind == parent_kind
            })
            .cloned())
    }

    async fn find_or_create_participant(
        &self,
        user: &User,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<ParticipantLink> {
        let mut state = self.state.lock().await;
        if let Some(link) = state.participants.iter().find(|link| {
            link.user_id == user.id && link.parent_id == parent_id && link.parent_kind == parent_kind
        }) {
            return Ok(link.clone());
        }

        let link = ParticipantLink::enroll(user, parent_id, parent_kind);
        debug!(user_id = %user.id, parent_id = %parent_id, "Enrolled participant");
        state.participants.push(link.clone());
        Ok(link)
    }

    async fn create_user(&self, data: CreateUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|user| user.name == data.name) {
            return Err(StoreError::DuplicateUserName(data.name));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: data.name,
            full_name: data.full_name,
            email: data.email,
            master_permission_granted: data.master_permission_granted,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_course(&self, data: CreateCourse) -> StoreResult<Course> {
        let course = Course {
            id: Uuid::new_v4(),
            name: data.name,
            max_team_size: data.max_team_size,
            created_at: Utc::now(),
        };
        self.state.lock().await.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn create_assignment(&self, data: CreateAssignment) -> StoreResult<Assignment> {
        let assignment = Assignment {
            id: Uuid::new_v4(),
            course_id: data.course_id,
            name: data.name,
            max_team_size: data.max_team_size,
            auto_assign_mentor: data.auto_assign_mentor,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .assignments
            .insert(assignment.id, assignment.clone());
        Ok(assignment)
    }
}

#[async_trait]
impl NodeGraph for MemoryStore {
    async fn find_node_for(&self, team_id: Uuid) -> StoreResult<Option<TeamNode>> {
        Ok(self.state.lock().await.graph.find_node_for(team_id).cloned())
    }

    async fn find_user_node_for(&self, membership_id: Uuid) -> StoreResult<Option<TeamUserNode>> {
        Ok(self
            .state
            .lock()
            .await
            .graph
            .find_user_node_for(membership_id)
            .cloned())
    }

    async fn children_of(&self, team_node_id: Uuid) -> StoreResult<Vec<TeamUserNode>> {
        Ok(self.state.lock().await.graph.children_of(team_node_id))
    }

    async fn team_nodes_under(&self, parent_id: Uuid) -> StoreResult<Vec<TeamNode>> {
        Ok(self.state.lock().await.graph.team_nodes_under(parent_id))
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn find_team(&self, team_id: Uuid) -> StoreResult<Option<Team>> {
        Ok(self.state.lock().await.team(team_id).cloned())
    }

    async fn find_team_by_name(&self, parent_id: Uuid, name: &str) -> StoreResult<Option<Team>> {
        let state = self.state.lock().await;
        Ok(state
            .teams
            .iter()
            .find(|team| team.parent_id == parent_id && team.name == name)
            .cloned())
    }

    async fn list_teams(&self, parent_id: Uuid) -> StoreResult<Vec<Team>> {
        let state = self.state.lock().await;
        Ok(state
            .teams
            .iter()
            .filter(|team| team.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn rename_team(&self, team_id: Uuid, name: &str) -> MembershipResult<Option<Team>> {
        let mut state = self.state.lock().await;
        let Some(parent_id) = state.team(team_id).map(|team| team.parent_id) else {
            return Ok(None);
        };
        if state.name_taken(parent_id, name, Some(team_id)) {
            return Err(MembershipError::DuplicateTeamName {
                parent_id,
                name: name.to_string(),
            });
        }

        let team = state
            .teams
            .iter_mut()
            .find(|team| team.id == team_id)
            .map(|team| {
                team.name = name.to_string();
                team.clone()
            });
        Ok(team)
    }

    async fn insert_team_with_node(&self, data: NewTeam) -> MembershipResult<(Team, TeamNode)> {
        let mut state = self.state.lock().await;
        if state.name_taken(data.parent_id, &data.name, None) {
            return Err(MembershipError::DuplicateTeamName {
                parent_id: data.parent_id,
                name: data.name,
            });
        }

        let team = data.into_team();
        let node = state
            .graph
            .create_node(team.id, team.parent_id, team.parent_kind);
        state.teams.push(team.clone());
        Ok((team, node))
    }

    async fn delete_team_cascade(&self, team_id: Uuid) -> MembershipResult<Option<TeamDeletion>> {
        let mut state = self.state.lock().await;
        let Some(team) = state.team(team_id).cloned() else {
            return Ok(None);
        };

        // Verify the whole mirror before touching anything.
        if state.graph.find_node_for(team_id).is_none() {
            return Err(missing_team_node(team_id));
        }
        let membership_ids: Vec<Uuid> = state.memberships_of(team_id).map(|m| m.id).collect();
        if let Some(missing) = membership_ids
            .iter()
            .find(|id| state.graph.find_user_node_for(**id).is_none())
        {
            return Err(missing_user_node(*missing));
        }

        for membership_id in &membership_ids {
            state.graph.delete_user_node(*membership_id);
        }
        state.graph.delete_node(team_id);
        state.memberships.retain(|membership| membership.team_id != team_id);
        state.teams.retain(|candidate| candidate.id != team_id);

        Ok(Some(TeamDeletion {
            team,
            memberships_removed: membership_ids.len(),
        }))
    }

    async fn find_membership(&self, membership_id: Uuid) -> StoreResult<Option<Membership>> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .iter()
            .find(|membership| membership.id == membership_id)
            .cloned())
    }

    async fn find_team_membership(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        let state = self.state.lock().await;
        let found = state
            .memberships_of(team_id)
            .find(|membership| membership.user_id == user_id)
            .cloned();
        Ok(found)
    }

    async fn list_memberships(&self, team_id: Uuid) -> StoreResult<Vec<Membership>> {
        let state = self.state.lock().await;
        Ok(state.memberships_of(team_id).cloned().collect())
    }

    async fn count_members(&self, team_id: Uuid) -> StoreResult<u32> {
        Ok(self.state.lock().await.count_members(team_id))
    }

    async fn insert_membership(
        &self,
        data: NewMembership,
        admit: AdmissionCheck<'_>,
    ) -> MembershipResult<(Membership, TeamUserNode)> {
        let mut state = self.state.lock().await;

        let team = state
            .team(data.team_id)
            .cloned()
            .ok_or(MembershipError::NotFound(EntityRef::Team(data.team_id)))?;
        let snapshot = AdmissionSnapshot {
            member_count: state.count_members(team.id),
            existing: state
                .memberships_of(team.id)
                .find(|membership| membership.user_id == data.user_id)
                .cloned(),
            mentor: state
                .memberships_of(team.id)
                .find(|membership| membership.role == MemberRole::Mentor)
                .cloned(),
            team,
        };
        admit(&snapshot)?;

        let team_node_id = state
            .graph
            .find_node_for(data.team_id)
            .map(|node| node.id)
            .ok_or_else(|| missing_team_node(data.team_id))?;

        let membership = data.into_membership();
        let user_node = state.graph.create_user_node(team_node_id, membership.id);
        state.memberships.push(membership.clone());
        Ok((membership, user_node))
    }

    async fn delete_membership(&self, membership_id: Uuid) -> MembershipResult<Option<Membership>> {
        let mut state = self.state.lock().await;
        let Some(position) = state
            .memberships
            .iter()
            .position(|membership| membership.id == membership_id)
        else {
            return Ok(None);
        };

        if state.graph.delete_user_node(membership_id).is_none() {
            return Err(missing_user_node(membership_id));
        }
        Ok(Some(state.memberships.remove(position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TeamKind;

    fn new_team(parent_id: Uuid, name: &str, max_members: Option<u32>) -> NewTeam {
        NewTeam {
            parent_id,
            parent_kind: ParentKind::Assignment,
            name: name.to_string(),
            max_members,
            kind: TeamKind::AssignmentTeam,
        }
    }

    fn admit_all(_: &AdmissionSnapshot) -> MembershipResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_team_creates_node() {
        let store = MemoryStore::new();
        let parent_id = Uuid::new_v4();

        let (team, node) = store
            .insert_team_with_node(new_team(parent_id, "Alpha", Some(2)))
            .await
            .unwrap();

        assert_eq!(node.node_object_id, team.id);
        assert_eq!(node.parent_id, parent_id);
        assert_eq!(store.find_node_for(team.id).await.unwrap(), Some(node));
        assert_eq!(store.node_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_insert_team_rejects_duplicate_name() {
        let store = MemoryStore::new();
        let parent_id = Uuid::new_v4();
        store
            .insert_team_with_node(new_team(parent_id, "Alpha", None))
            .await
            .unwrap();

        let err = store
            .insert_team_with_node(new_team(parent_id, "Alpha", None))
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::DuplicateTeamName { .. }));

        // Same name under another parent is fine.
        store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_membership_runs_admission_before_writing() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", Some(1)))
            .await
            .unwrap();

        let reject = |snapshot: &AdmissionSnapshot| -> MembershipResult<()> {
            Err(MembershipError::TeamFull {
                team_id: snapshot.team.id,
                max_members: 1,
            })
        };
        let err = store
            .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &reject)
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::TeamFull { .. }));
        assert_eq!(store.count_members(team.id).await.unwrap(), 0);
        assert_eq!(store.node_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_insert_membership_without_team_node_is_invariant_violation() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
        store.detach_team_node(team.id).await;

        let err = store
            .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &admit_all)
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::InvariantViolation(_)));
        assert!(err.is_fatal());
        assert!(store.list_memberships(team.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_membership_without_node_leaves_row() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
        let (membership, _) = store
            .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &admit_all)
            .await
            .unwrap();
        store.detach_user_node(membership.id).await;

        let err = store.delete_membership(membership.id).await.unwrap_err();
        assert!(matches!(err, MembershipError::InvariantViolation(_)));
        assert_eq!(
            store.find_membership(membership.id).await.unwrap(),
            Some(membership)
        );
    }

    #[tokio::test]
    async fn test_delete_team_cascade_removes_rows_and_nodes() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &admit_all)
                .await
                .unwrap();
        }
        assert_eq!(store.node_counts().await, (1, 3));

        let deletion = store.delete_team_cascade(team.id).await.unwrap().unwrap();
        assert_eq!(deletion.memberships_removed, 3);
        assert_eq!(store.node_counts().await, (0, 0));
        assert!(store.find_team(team.id).await.unwrap().is_none());
        assert!(store.delete_team_cascade(team.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_team_cascade_refuses_broken_mirror() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
        let (membership, _) = store
            .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &admit_all)
            .await
            .unwrap();
        store.detach_user_node(membership.id).await;

        let err = store.delete_team_cascade(team.id).await.unwrap_err();
        assert!(matches!(err, MembershipError::InvariantViolation(_)));
        assert!(store.find_team(team.id).await.unwrap().is_some());
        assert_eq!(store.node_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_verify_mirror_reports_missing_user_node() {
        let store = MemoryStore::new();
        let (team, _) = store
            .insert_team_with_node(new_team(Uuid::new_v4(), "Alpha", None))
            .await
            .unwrap();
        let (membership, _) = store
            .insert_membership(NewMembership::member(team.id, Uuid::new_v4()), &admit_all)
            .await
            .unwrap();

        assert!(crate::graph::verify_mirror(&store, team.id)
            .await
            .unwrap()
            .is_empty());

        store.detach_user_node(membership.id).await;
        let violations = crate::graph::verify_mirror(&store, team.id).await.unwrap();
        assert_eq!(
            violations,
            vec![crate::graph::MirrorViolation::MissingUserNode {
                membership_id: membership.id
            }]
        );
    }

    #[tokio::test]
    async fn test_find_or_create_participant_is_idempotent() {
        let store = MemoryStore::new();
        let user = store
            .create_user(CreateUser {
                master_permission_granted: true,
                ..CreateUser::named("student1")
            })
            .await
            .unwrap();
        let course = store
            .create_course(CreateCourse {
                name: "CSC 517".to_string(),
                max_team_size: None,
            })
            .await
            .unwrap();

        let first = store
            .find_or_create_participant(&user, course.id, ParentKind::Course)
            .await
            .unwrap();
        assert!(first.permission_granted);

        let second = store
            .find_or_create_participant(&user, course.id, ParentKind::Course)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        // A link for the course does not make the user an assignment participant.
        assert!(store
            .find_participant_link(user.id, course.id, ParentKind::Assignment)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_user_rejects_taken_name() {
        let store = MemoryStore::new();
        let first = store.create_user(CreateUser::named("student1")).await.unwrap();

        let err = store
            .create_user(CreateUser::named("student1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUserName(ref name) if name == "student1"));

        let found = store.find_user_by_name("student1").await.unwrap();
        assert_eq!(found.map(|user| user.id), Some(first.id));
    }
}
