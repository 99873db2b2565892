//! Team hierarchy
//!
//! Creation, lookup and removal of teams as typed nodes under a course or an
//! assignment. Each team is written together with its [`TeamNode`] so that
//! `owner → teams` traversal through the mirror always matches the rows.
//!
//! [`TeamNode`]: crate::graph::TeamNode

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EntityRef, MembershipError, MembershipResult};
use crate::models::{Course, ParentEntity, ParentKind, Team, TeamKind};
use crate::store::{Datastore, TeamDeletion};

/// Upper bound on suffixes tried when looking for a free team name
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Team lifecycle and owner lookups
pub struct TeamHierarchy<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for TeamHierarchy<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Datastore + ?Sized> TeamHierarchy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolves an owner of a known kind
    pub async fn find_parent(&self, parent_id: Uuid, kind: ParentKind) -> MembershipResult<ParentEntity> {
        self.store
            .find_entity(parent_id, kind)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::parent(kind, parent_id)))
    }

    /// Creates a team of `kind` and its node under `parent_id`.
    ///
    /// Without a name the team is called `"<parent name> Team <n>"`, with `n`
    /// the first number not yet used under the parent.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no course or assignment has `parent_id`
    /// - `KindMismatch` if `parent_id` exists but is the wrong kind of owner
    /// - `BlankTeamName` if `name` is blank
    /// - `DuplicateTeamName` if `name` is taken under the parent
    pub async fn create_team_and_node(
        &self,
        parent_id: Uuid,
        kind: TeamKind,
        name: Option<&str>,
    ) -> MembershipResult<Team> {
        let expected = kind.parent_kind();
        let parent = match self.store.find_entity(parent_id, expected).await? {
            Some(parent) => parent,
            None => {
                let other = match expected {
                    ParentKind::Course => ParentKind::Assignment,
                    ParentKind::Assignment => ParentKind::Course,
                };
                if self.store.find_entity(parent_id, other).await?.is_some() {
                    return Err(MembershipError::KindMismatch {
                        kind: kind.as_str(),
                        parent_kind: other,
                    });
                }
                return Err(MembershipError::NotFound(EntityRef::parent(expected, parent_id)));
            }
        };

        self.create_team_under(&parent, kind, name).await
    }

    /// Same as [`create_team_and_node`](Self::create_team_and_node) for an
    /// already resolved owner
    pub async fn create_team_under(
        &self,
        parent: &ParentEntity,
        kind: TeamKind,
        name: Option<&str>,
    ) -> MembershipResult<Team> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.generate_team_name(parent).await?,
        };

        let new_team = kind.prototype(parent, &name)?;
        let (team, node) = self.store.insert_team_with_node(new_team).await?;

        info!(
            team_id = %team.id,
            node_id = %node.id,
            parent_id = %team.parent_id,
            kind = team.kind.as_str(),
            name = %team.name,
            "Created team"
        );
        Ok(team)
    }

    async fn generate_team_name(&self, parent: &ParentEntity) -> MembershipResult<String> {
        let existing = self.store.list_teams(parent.id()).await?;
        let start = existing.len() as u32 + 1;

        for n in start..start + MAX_NAME_ATTEMPTS {
            let candidate = format!("{} Team {}", parent.name(), n);
            if !existing.iter().any(|team| team.name == candidate) {
                return Ok(candidate);
            }
        }

        Err(MembershipError::DuplicateTeamName {
            parent_id: parent.id(),
            name: format!("{} Team {}", parent.name(), start),
        })
    }

    /// First free name under `parent_id` derived from `base`: `base`, then
    /// `base (2)`, `base (3)`, ...
    pub async fn unique_team_name(&self, parent_id: Uuid, base: &str) -> MembershipResult<String> {
        let base = base.trim();
        let existing = self.store.list_teams(parent_id).await?;
        let taken = |candidate: &str| existing.iter().any(|team| team.name == candidate);

        if !taken(base) {
            return Ok(base.to_string());
        }

        for n in 2..MAX_NAME_ATTEMPTS {
            let candidate = format!("{} ({})", base, n);
            if !taken(&candidate) {
                debug!(parent_id = %parent_id, base, name = %candidate, "Team name taken, using suffix");
                return Ok(candidate);
            }
        }

        Err(MembershipError::DuplicateTeamName {
            parent_id,
            name: base.to_string(),
        })
    }

    pub async fn find_team(&self, team_id: Uuid) -> MembershipResult<Team> {
        self.store
            .find_team(team_id)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::Team(team_id)))
    }

    /// Owning course or assignment of a team
    pub async fn parent_entity(&self, team: &Team) -> MembershipResult<ParentEntity> {
        self.find_parent(team.parent_id, team.parent_kind).await
    }

    /// Course a team ultimately belongs to.
    ///
    /// Course teams resolve to their owner; assignment teams go through the
    /// assignment's course, which may be unset.
    pub async fn parent_course(&self, team: &Team) -> MembershipResult<Course> {
        match self.parent_entity(team).await? {
            ParentEntity::Course(course) => Ok(course),
            ParentEntity::Assignment(assignment) => {
                // Nil ID: the assignment is not attached to a course.
                let course_id = assignment.course_id.ok_or(MembershipError::NotFound(
                    EntityRef::Course(Uuid::nil()),
                ))?;
                match self.find_parent(course_id, ParentKind::Course).await? {
                    ParentEntity::Course(course) => Ok(course),
                    ParentEntity::Assignment(_) => Err(MembershipError::NotFound(
                        EntityRef::Course(course_id),
                    )),
                }
            }
        }
    }

    pub async fn rename_team(&self, team_id: Uuid, name: &str) -> MembershipResult<Team> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MembershipError::BlankTeamName);
        }

        let team = self
            .store
            .rename_team(team_id, name)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::Team(team_id)))?;

        info!(team_id = %team_id, name = %team.name, "Renamed team");
        Ok(team)
    }

    /// Deletes a team with its memberships and every node they own
    pub async fn delete_team(&self, team_id: Uuid) -> MembershipResult<TeamDeletion> {
        let deletion = self
            .store
            .delete_team_cascade(team_id)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::Team(team_id)))?;

        info!(
            team_id = %team_id,
            memberships_removed = deletion.memberships_removed,
            "Deleted team"
        );
        Ok(deletion)
    }

    /// Teams under an owner, oldest first
    pub async fn teams_under(&self, parent_id: Uuid) -> MembershipResult<Vec<Team>> {
        Ok(self.store.list_teams(parent_id).await?)
    }
}
