//! Membership engine
//!
//! Decides whether a user may join or leave a team and applies the change
//! together with its node in one store unit of work.
//!
//! Check order for `add_member`:
//!
//! 1. team and user exist (`NotFound`)
//! 2. user is a participant of the team's owner (`NotAParticipant`)
//! 3. inside the unit of work: not already on the team
//!    (`DuplicateMembership`), then a free slot (`TeamFull`)
//!
//! Eligibility is checked before anything that depends on the team's current
//! members, so an ineligible user is told so even when the team is full.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use teamnest_shared::membership::MembershipEngine;
//! use teamnest_shared::store::MemoryStore;
//! use uuid::Uuid;
//!
//! # async fn example(team_id: Uuid, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = MembershipEngine::new(Arc::new(MemoryStore::new()));
//! let membership = engine.add_member(team_id, user_id).await?;
//! println!("{} joined {}", membership.user_id, membership.team_id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EntityRef, MembershipError, MembershipResult};
use crate::models::{Membership, NewMembership, ParticipantLink, Team, TeamKind, User};
use crate::store::{AdmissionSnapshot, Datastore};

/// Per-item failure inside a batch operation
#[derive(Debug)]
pub struct ItemFailure {
    /// Membership ID for removals, user ID for copies
    pub id: Uuid,

    pub error: MembershipError,
}

/// Outcome of [`MembershipEngine::remove_members`]
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Memberships that were removed
    pub removed: Vec<Membership>,

    /// IDs that could not be removed, with the reason
    pub failures: Vec<ItemFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Admission rule for a regular member.
///
/// Duplicate check precedes the capacity check.
pub fn admit_member(snapshot: &AdmissionSnapshot, user_id: Uuid) -> MembershipResult<()> {
    if snapshot.existing.is_some() {
        return Err(MembershipError::DuplicateMembership {
            team_id: snapshot.team.id,
            user_id,
        });
    }

    if let Some(max_members) = snapshot.team.max_members {
        if snapshot.member_count >= max_members {
            return Err(MembershipError::TeamFull {
                team_id: snapshot.team.id,
                max_members,
            });
        }
    }

    Ok(())
}

/// Admission rule for a mentor. Capacity does not apply.
pub fn admit_mentor(snapshot: &AdmissionSnapshot, user_id: Uuid) -> MembershipResult<()> {
    if snapshot.team.kind != TeamKind::MentoredTeam {
        return Err(MembershipError::NotMentored(snapshot.team.id));
    }

    if snapshot.existing.is_some() {
        return Err(MembershipError::DuplicateMembership {
            team_id: snapshot.team.id,
            user_id,
        });
    }

    if snapshot.mentor.is_some() {
        return Err(MembershipError::MentorAlreadyAssigned(snapshot.team.id));
    }

    Ok(())
}

fn log_rejection(operation: &str, team_id: Uuid, id: Uuid, err: &MembershipError) {
    if err.is_fatal() {
        tracing::error!(operation, team_id = %team_id, id = %id, error = %err, "Membership write failed");
    } else {
        warn!(operation, team_id = %team_id, id = %id, code = err.code(), "Membership change rejected");
    }
}

/// Adds and removes team members
pub struct MembershipEngine<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for MembershipEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Datastore + ?Sized> MembershipEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn load_team(&self, team_id: Uuid) -> MembershipResult<Team> {
        self.store
            .find_team(team_id)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::Team(team_id)))
    }

    async fn load_user(&self, user_id: Uuid) -> MembershipResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::User(user_id)))
    }

    /// Participant link that makes `user_id` eligible for `team`
    async fn require_participant(
        &self,
        team: &Team,
        user_id: Uuid,
    ) -> MembershipResult<ParticipantLink> {
        let parent_kind = team.required_participant_kind();
        let link = self
            .store
            .find_participant_link(user_id, team.parent_id, parent_kind)
            .await?;

        link.ok_or(MembershipError::NotAParticipant {
            user_id,
            parent_id: team.parent_id,
            parent_kind,
        })
    }

    /// Adds `user_id` to the team as a regular member.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the team or user does not exist
    /// - `NotAParticipant` if the user is not enrolled under the team's owner
    /// - `DuplicateMembership` if the user is already on the team
    /// - `TeamFull` if every regular slot is taken
    /// - `InvariantViolation` if the team has no node
    pub async fn add_member(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<Membership> {
        let result = self.try_add_member(team_id, user_id).await;
        match &result {
            Ok(membership) => info!(
                team_id = %team_id,
                user_id = %user_id,
                membership_id = %membership.id,
                "Added team member"
            ),
            Err(err) => log_rejection("add_member", team_id, user_id, err),
        }
        result
    }

    async fn try_add_member(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<Membership> {
        let team = self.load_team(team_id).await?;
        self.load_user(user_id).await?;
        self.require_participant(&team, user_id).await?;

        let admit = move |snapshot: &AdmissionSnapshot| admit_member(snapshot, user_id);
        let (membership, _) = self
            .store
            .insert_membership(NewMembership::member(team_id, user_id), &admit)
            .await?;

        Ok(membership)
    }

    /// Resolves `user_name` and adds that user as a member
    pub async fn add_member_by_name(
        &self,
        team_id: Uuid,
        user_name: &str,
    ) -> MembershipResult<Membership> {
        let user = self
            .store
            .find_user_by_name(user_name)
            .await?
            .ok_or_else(|| MembershipError::NotFound(EntityRef::UserName(user_name.to_string())))?;

        self.add_member(team_id, user.id).await
    }

    /// Assigns the mentor of a mentored team.
    ///
    /// The mentor needs the same participant link as a member but does not
    /// take a regular slot.
    pub async fn assign_mentor(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<Membership> {
        let result = self.try_assign_mentor(team_id, user_id).await;
        match &result {
            Ok(membership) => info!(
                team_id = %team_id,
                user_id = %user_id,
                membership_id = %membership.id,
                "Assigned team mentor"
            ),
            Err(err) => log_rejection("assign_mentor", team_id, user_id, err),
        }
        result
    }

    async fn try_assign_mentor(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<Membership> {
        let team = self.load_team(team_id).await?;
        if team.kind != TeamKind::MentoredTeam {
            return Err(MembershipError::NotMentored(team_id));
        }
        self.load_user(user_id).await?;
        self.require_participant(&team, user_id).await?;

        let admit = move |snapshot: &AdmissionSnapshot| admit_mentor(snapshot, user_id);
        let (membership, _) = self
            .store
            .insert_membership(NewMembership::mentor(team_id, user_id), &admit)
            .await?;

        Ok(membership)
    }

    /// Removes `user_id` from the team.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the team does not exist
    /// - `NotAMember` if the user is not on the team
    /// - `InvariantViolation` if the membership has no node; nothing is removed
    pub async fn remove_member(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<()> {
        let result = self.try_remove_member(team_id, user_id).await;
        match &result {
            Ok(membership) => info!(
                team_id = %team_id,
                user_id = %user_id,
                membership_id = %membership.id,
                "Removed team member"
            ),
            Err(err) => log_rejection("remove_member", team_id, user_id, err),
        }
        result.map(|_| ())
    }

    async fn try_remove_member(&self, team_id: Uuid, user_id: Uuid) -> MembershipResult<Membership> {
        self.load_team(team_id).await?;

        let not_a_member = || MembershipError::NotAMember { team_id, user_id };
        let membership = self
            .store
            .find_team_membership(team_id, user_id)
            .await?
            .ok_or_else(not_a_member)?;

        // A concurrent removal between the lookup and the delete is still
        // "not a member" from this caller's point of view.
        self.store
            .delete_membership(membership.id)
            .await?
            .ok_or_else(not_a_member)
    }

    /// Removes a membership by its ID
    pub async fn remove_membership(&self, membership_id: Uuid) -> MembershipResult<Membership> {
        let result = self
            .store
            .delete_membership(membership_id)
            .await
            .and_then(|removed| {
                removed.ok_or(MembershipError::NotFound(EntityRef::Membership(membership_id)))
            });

        match &result {
            Ok(membership) => info!(
                team_id = %membership.team_id,
                user_id = %membership.user_id,
                membership_id = %membership_id,
                "Removed membership"
            ),
            Err(err) if err.is_fatal() => {
                tracing::error!(membership_id = %membership_id, error = %err, "Membership write failed")
            }
            Err(err) => warn!(membership_id = %membership_id, code = err.code(), "Membership removal rejected"),
        }
        result
    }

    /// Removes each membership independently.
    ///
    /// A failing ID is recorded and the batch continues; earlier removals are
    /// never undone.
    pub async fn remove_members(&self, membership_ids: &[Uuid]) -> BatchResult {
        let mut batch = BatchResult::default();

        for &membership_id in membership_ids {
            match self.remove_membership(membership_id).await {
                Ok(membership) => batch.removed.push(membership),
                Err(error) => batch.failures.push(ItemFailure {
                    id: membership_id,
                    error,
                }),
            }
        }

        info!(
            removed = batch.removed.len(),
            failed = batch.failures.len(),
            "Batch membership removal finished"
        );
        batch
    }

    /// Free regular slots; `None` for an unbounded team
    pub async fn capacity_remaining(&self, team_id: Uuid) -> MembershipResult<Option<u32>> {
        let team = self.load_team(team_id).await?;
        let count = self.store.count_members(team_id).await?;
        debug!(team_id = %team_id, count, "Counted team members");
        Ok(team.remaining(count))
    }

    /// Memberships of the team, oldest first
    pub async fn members(&self, team_id: Uuid) -> MembershipResult<Vec<Membership>> {
        self.load_team(team_id).await?;
        Ok(self.store.list_memberships(team_id).await?)
    }

    pub async fn is_full(&self, team_id: Uuid) -> MembershipResult<bool> {
        let team = self.load_team(team_id).await?;
        let count = self.store.count_members(team_id).await?;
        Ok(team.is_full(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemberRole, ParentKind};
    use chrono::Utc;

    fn snapshot(kind: TeamKind, max_members: Option<u32>, member_count: u32) -> AdmissionSnapshot {
        AdmissionSnapshot {
            team: Team {
                id: Uuid::new_v4(),
                parent_id: Uuid::new_v4(),
                parent_kind: ParentKind::Assignment,
                name: "Alpha".to_string(),
                max_members,
                kind,
                created_at: Utc::now(),
            },
            member_count,
            existing: None,
            mentor: None,
        }
    }

    fn membership(team_id: Uuid, user_id: Uuid, role: MemberRole) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            team_id,
            user_id,
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_admit_member_with_free_slot() {
        let snap = snapshot(TeamKind::AssignmentTeam, Some(2), 1);
        assert!(admit_member(&snap, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_admit_member_unbounded() {
        let snap = snapshot(TeamKind::CourseTeam, None, 500);
        assert!(admit_member(&snap, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_admit_member_full() {
        let snap = snapshot(TeamKind::AssignmentTeam, Some(2), 2);
        let err = admit_member(&snap, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, MembershipError::TeamFull { max_members: 2, .. }));
    }

    #[test]
    fn test_duplicate_reported_before_capacity() {
        let user_id = Uuid::new_v4();
        let mut snap = snapshot(TeamKind::AssignmentTeam, Some(1), 1);
        snap.existing = Some(membership(snap.team.id, user_id, MemberRole::Member));

        let err = admit_member(&snap, user_id).unwrap_err();
        assert!(matches!(err, MembershipError::DuplicateMembership { .. }));
    }

    #[test]
    fn test_admit_mentor_ignores_capacity() {
        let snap = snapshot(TeamKind::MentoredTeam, Some(2), 2);
        assert!(admit_mentor(&snap, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_admit_mentor_rules() {
        let plain = snapshot(TeamKind::AssignmentTeam, Some(2), 0);
        assert!(matches!(
            admit_mentor(&plain, Uuid::new_v4()),
            Err(MembershipError::NotMentored(_))
        ));

        let mut taken = snapshot(TeamKind::MentoredTeam, Some(2), 0);
        taken.mentor = Some(membership(taken.team.id, Uuid::new_v4(), MemberRole::Mentor));
        assert!(matches!(
            admit_mentor(&taken, Uuid::new_v4()),
            Err(MembershipError::MentorAlreadyAssigned(_))
        ));
    }

    #[test]
    fn test_batch_result_complete() {
        let mut batch = BatchResult::default();
        assert!(batch.is_complete());
        batch.failures.push(ItemFailure {
            id: Uuid::nil(),
            error: MembershipError::NotFound(EntityRef::Membership(Uuid::nil())),
        });
        assert!(!batch.is_complete());
    }
}
