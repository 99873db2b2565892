//! Common test utilities for integration tests
//!
//! Every test gets a fresh in-memory datastore and the services built on it,
//! plus helpers that seed courses, assignments, users and enrollments.

#![allow(dead_code)]

use std::sync::Arc;

use teamnest_shared::copy::TeamCopier;
use teamnest_shared::hierarchy::TeamHierarchy;
use teamnest_shared::membership::MembershipEngine;
use teamnest_shared::models::{
    Assignment, Course, CreateAssignment, CreateCourse, CreateUser, ParentKind, ParticipantLink,
    Team, TeamKind, User,
};
use teamnest_shared::store::{EntityRegistry, MemoryStore};
use teamnest_shared::transfer::RosterTransfer;
use uuid::Uuid;

/// Test context containing the store and every service over it
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub engine: MembershipEngine<MemoryStore>,
    pub hierarchy: TeamHierarchy<MemoryStore>,
    pub transfer: RosterTransfer<MemoryStore>,
    pub copier: TeamCopier<MemoryStore>,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            engine: MembershipEngine::new(Arc::clone(&store)),
            hierarchy: TeamHierarchy::new(Arc::clone(&store)),
            transfer: RosterTransfer::new(Arc::clone(&store)),
            copier: TeamCopier::new(Arc::clone(&store)),
            store,
        }
    }

    pub async fn course(&self, name: &str, max_team_size: Option<u32>) -> anyhow::Result<Course> {
        Ok(self
            .store
            .create_course(CreateCourse {
                name: name.to_string(),
                max_team_size,
            })
            .await?)
    }

    pub async fn assignment(
        &self,
        course_id: Option<Uuid>,
        name: &str,
        max_team_size: u32,
        auto_assign_mentor: bool,
    ) -> anyhow::Result<Assignment> {
        Ok(self
            .store
            .create_assignment(CreateAssignment {
                course_id,
                name: name.to_string(),
                max_team_size,
                auto_assign_mentor,
            })
            .await?)
    }

    pub async fn user(&self, name: &str) -> anyhow::Result<User> {
        Ok(self
            .store
            .create_user(CreateUser {
                full_name: Some(format!("Full {}", name)),
                email: Some(format!("{}@example.edu", name)),
                ..CreateUser::named(name)
            })
            .await?)
    }

    pub async fn enroll(
        &self,
        user: &User,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> anyhow::Result<ParticipantLink> {
        Ok(self
            .store
            .find_or_create_participant(user, parent_id, parent_kind)
            .await?)
    }

    /// Creates a user already enrolled under the given owner
    pub async fn participant(
        &self,
        name: &str,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> anyhow::Result<User> {
        let user = self.user(name).await?;
        self.enroll(&user, parent_id, parent_kind).await?;
        Ok(user)
    }

    pub async fn team(&self, parent_id: Uuid, kind: TeamKind, name: &str) -> anyhow::Result<Team> {
        Ok(self
            .hierarchy
            .create_team_and_node(parent_id, kind, Some(name))
            .await?)
    }
}
