//! Team copy
//!
//! Clones a team and its regular members under another owner. The new team's
//! kind comes from the target: a course yields a `CourseTeam`, an assignment
//! yields a `MentoredTeam` when it auto-assigns mentors and an
//! `AssignmentTeam` otherwise. Members are re-added through the
//! [`MembershipEngine`], so each one must be eligible under the target;
//! ineligible members are reported and skipped. Mentors are not copied.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::MembershipResult;
use crate::hierarchy::TeamHierarchy;
use crate::membership::{ItemFailure, MembershipEngine};
use crate::models::{MemberRole, Membership, ParentEntity, ParentKind, Team, TeamKind};
use crate::store::Datastore;

/// Outcome of a copy
#[derive(Debug)]
pub struct CopyReport {
    /// Newly created team
    pub team: Team,

    /// Memberships created on the new team
    pub copied: Vec<Membership>,

    /// Source members that could not be added, keyed by user ID
    pub failures: Vec<ItemFailure>,
}

pub struct TeamCopier<S: ?Sized> {
    engine: MembershipEngine<S>,
    hierarchy: TeamHierarchy<S>,
}

impl<S: Datastore + ?Sized> TeamCopier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            engine: MembershipEngine::new(Arc::clone(&store)),
            hierarchy: TeamHierarchy::new(store),
        }
    }

    /// Copies a team into an assignment.
    ///
    /// # Errors
    ///
    /// `NotFound` if the source team or the assignment does not exist. Member
    /// failures are reported in [`CopyReport::failures`].
    pub async fn copy_to_assignment_team(
        &self,
        source_team_id: Uuid,
        assignment_id: Uuid,
    ) -> MembershipResult<CopyReport> {
        let source = self.hierarchy.find_team(source_team_id).await?;
        let target = self
            .hierarchy
            .find_parent(assignment_id, ParentKind::Assignment)
            .await?;

        self.copy_into(&source, &target).await
    }

    /// Copies a team into a course
    pub async fn copy_to_course_team(
        &self,
        source_team_id: Uuid,
        course_id: Uuid,
    ) -> MembershipResult<CopyReport> {
        let source = self.hierarchy.find_team(source_team_id).await?;
        let target = self
            .hierarchy
            .find_parent(course_id, ParentKind::Course)
            .await?;

        self.copy_into(&source, &target).await
    }

    async fn copy_into(&self, source: &Team, target: &ParentEntity) -> MembershipResult<CopyReport> {
        let kind = TeamKind::for_parent(target);
        let name = self
            .hierarchy
            .unique_team_name(target.id(), &source.name)
            .await?;
        let team = self
            .hierarchy
            .create_team_under(target, kind, Some(&name))
            .await?;

        let mut copied = Vec::new();
        let mut failures = Vec::new();
        for membership in self.engine.members(source.id).await? {
            if membership.role != MemberRole::Member {
                continue;
            }
            match self.engine.add_member(team.id, membership.user_id).await {
                Ok(created) => copied.push(created),
                Err(error) => {
                    warn!(
                        source_team_id = %source.id,
                        team_id = %team.id,
                        user_id = %membership.user_id,
                        code = error.code(),
                        "Member not copied"
                    );
                    failures.push(ItemFailure {
                        id: membership.user_id,
                        error,
                    });
                }
            }
        }

        info!(
            source_team_id = %source.id,
            team_id = %team.id,
            kind = team.kind.as_str(),
            copied = copied.len(),
            failed = failures.len(),
            "Copied team"
        );
        Ok(CopyReport {
            team,
            copied,
            failures,
        })
    }
}
