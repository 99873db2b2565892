/// PostgreSQL datastore
///
/// Each write that touches a team or membership row runs in one transaction
/// together with the node helpers from [`crate::graph::sql`]. Membership
/// inserts lock the team row with `SELECT ... FOR UPDATE` before reading the
/// admission snapshot, so concurrent adds to the same team are serialized.
///
/// # Example
///
/// ```no_run
/// use teamnest_shared::store::{PgStore, TeamStore};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, team_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PgStore::new(pool);
/// let members = store.count_members(team_id).await?;
/// println!("{} members", members);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{AdmissionCheck, AdmissionSnapshot, EntityRegistry, TeamDeletion, TeamStore};
use crate::error::{
    is_unique_violation, EntityRef, MembershipError, MembershipResult, StoreError, StoreResult,
};
use crate::graph::{missing_team_node, missing_user_node, sql, NodeGraph, TeamNode, TeamUserNode};
use crate::models::{
    Assignment, Course, CreateAssignment, CreateCourse, CreateUser, MemberRole, Membership,
    NewMembership, NewTeam, ParentEntity, ParentKind, ParticipantLink, Team, TeamKind, User,
};

const TEAM_COLUMNS: &str = "id, parent_id, parent_kind, name, max_members, kind, created_at";
const MEMBERSHIP_COLUMNS: &str = "id, team_id, user_id, role, created_at";

fn to_db_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_db_size(value: i32, what: &str, id: Uuid) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} {} has negative size {}", what, id, value)))
}

fn parse_parent_kind(value: &str, id: Uuid) -> StoreResult<ParentKind> {
    ParentKind::from_str(value).ok_or_else(|| {
        StoreError::Corrupt(format!("row {} has unknown parent kind {:?}", id, value))
    })
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    full_name: Option<String>,
    email: Option<String>,
    master_permission_granted: bool,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            full_name: self.full_name,
            email: self.email,
            master_permission_granted: self.master_permission_granted,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CourseRow {
    id: Uuid,
    name: String,
    max_team_size: Option<i32>,
    created_at: DateTime<Utc>,
}

impl CourseRow {
    fn into_course(self) -> StoreResult<Course> {
        let max_team_size = self
            .max_team_size
            .map(|size| from_db_size(size, "course", self.id))
            .transpose()?;

        Ok(Course {
            id: self.id,
            name: self.name,
            max_team_size,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    course_id: Option<Uuid>,
    name: String,
    max_team_size: i32,
    auto_assign_mentor: bool,
    created_at: DateTime<Utc>,
}

impl AssignmentRow {
    fn into_assignment(self) -> StoreResult<Assignment> {
        Ok(Assignment {
            max_team_size: from_db_size(self.max_team_size, "assignment", self.id)?,
            id: self.id,
            course_id: self.course_id,
            name: self.name,
            auto_assign_mentor: self.auto_assign_mentor,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: Uuid,
    user_id: Uuid,
    parent_id: Uuid,
    parent_kind: String,
    permission_granted: bool,
    created_at: DateTime<Utc>,
}

impl ParticipantRow {
    fn into_link(self) -> StoreResult<ParticipantLink> {
        Ok(ParticipantLink {
            parent_kind: parse_parent_kind(&self.parent_kind, self.id)?,
            id: self.id,
            user_id: self.user_id,
            parent_id: self.parent_id,
            permission_granted: self.permission_granted,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TeamRow {
    id: Uuid,
    parent_id: Uuid,
    parent_kind: String,
    name: String,
    max_members: Option<i32>,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TeamRow {
    fn into_team(self) -> StoreResult<Team> {
        let kind = TeamKind::from_str(&self.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("team {} has unknown kind {:?}", self.id, self.kind))
        })?;
        let max_members = self
            .max_members
            .map(|size| from_db_size(size, "team", self.id))
            .transpose()?;

        Ok(Team {
            parent_kind: parse_parent_kind(&self.parent_kind, self.id)?,
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            max_members,
            kind,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    id: Uuid,
    team_id: Uuid,
    user_id: Uuid,
    role: String,
    created_at: DateTime<Utc>,
}

impl MembershipRow {
    fn into_membership(self) -> StoreResult<Membership> {
        let role = MemberRole::from_str(&self.role).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "membership {} has unknown role {:?}",
                self.id, self.role
            ))
        })?;

        Ok(Membership {
            id: self.id,
            team_id: self.team_id,
            user_id: self.user_id,
            role,
            created_at: self.created_at,
        })
    }
}

/// Datastore backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_team(conn: &mut PgConnection, team_id: Uuid) -> StoreResult<Option<Team>> {
        let row = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {} FROM teams WHERE id = $1 FOR UPDATE",
            TEAM_COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(TeamRow::into_team).transpose()
    }

    async fn memberships_in(
        conn: &mut PgConnection,
        team_id: Uuid,
    ) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {} FROM team_memberships WHERE team_id = $1 ORDER BY created_at ASC, id ASC",
            MEMBERSHIP_COLUMNS
        ))
        .bind(team_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(MembershipRow::into_membership).collect()
    }
}

#[async_trait]
impl EntityRegistry for PgStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, full_name, email, master_permission_granted, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, full_name, email, master_permission_granted, created_at
            FROM users
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    async fn find_entity(&self, id: Uuid, kind: ParentKind) -> StoreResult<Option<ParentEntity>> {
        match kind {
            ParentKind::Course => {
                let row = sqlx::query_as::<_, CourseRow>(
                    "SELECT id, name, max_team_size, created_at FROM courses WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

                Ok(row
                    .map(CourseRow::into_course)
                    .transpose()?
                    .map(ParentEntity::Course))
            }
            ParentKind::Assignment => {
                let row = sqlx::query_as::<_, AssignmentRow>(
                    r#"
                    SELECT id, course_id, name, max_team_size, auto_assign_mentor, created_at
                    FROM assignments
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

                Ok(row
                    .map(AssignmentRow::into_assignment)
                    .transpose()?
                    .map(ParentEntity::Assignment))
            }
        }
    }

    async fn find_participant_link(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<Option<ParticipantLink>> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT id, user_id, parent_id, parent_kind, permission_granted, created_at
            FROM participants
            WHERE user_id = $1 AND parent_id = $2 AND parent_kind = $3
            "#,
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(parent_kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ParticipantRow::into_link).transpose()
    }

    async fn find_or_create_participant(
        &self,
        user: &User,
        parent_id: Uuid,
        parent_kind: ParentKind,
    ) -> StoreResult<ParticipantLink> {
        let link = ParticipantLink::enroll(user, parent_id, parent_kind);
        let inserted = sqlx::query_as::<_, ParticipantRow>(
            r#"
            INSERT INTO participants (id, user_id, parent_id, parent_kind, permission_granted, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, parent_id, parent_kind) DO NOTHING
            RETURNING id, user_id, parent_id, parent_kind, permission_granted, created_at
            "#,
        )
        .bind(link.id)
        .bind(link.user_id)
        .bind(link.parent_id)
        .bind(link.parent_kind.as_str())
        .bind(link.permission_granted)
        .bind(link.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            debug!(user_id = %user.id, parent_id = %parent_id, "Enrolled participant");
            return row.into_link();
        }

        self.find_participant_link(user.id, parent_id, parent_kind)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "participant link for user {} under {} vanished",
                    user.id, parent_id
                ))
            })
    }

    async fn create_user(&self, data: CreateUser) -> StoreResult<User> {
        let result = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, name, full_name, email, master_permission_granted)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, full_name, email, master_permission_granted, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(data.full_name)
        .bind(data.email)
        .bind(data.master_permission_granted)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.into_user()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateUserName(data.name)),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_course(&self, data: CreateCourse) -> StoreResult<Course> {
        let row = sqlx::query_as::<_, CourseRow>(
            r#"
            INSERT INTO courses (id, name, max_team_size)
            VALUES ($1, $2, $3)
            RETURNING id, name, max_team_size, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.name)
        .bind(data.max_team_size.map(to_db_size))
        .fetch_one(&self.pool)
        .await?;

        row.into_course()
    }

    async fn create_assignment(&self, data: CreateAssignment) -> StoreResult<Assignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            INSERT INTO assignments (id, course_id, name, max_team_size, auto_assign_mentor)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, course_id, name, max_team_size, auto_assign_mentor, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.course_id)
        .bind(data.name)
        .bind(to_db_size(data.max_team_size))
        .bind(data.auto_assign_mentor)
        .fetch_one(&self.pool)
        .await?;

        row.into_assignment()
    }
}

#[async_trait]
impl NodeGraph for PgStore {
    async fn find_node_for(&self, team_id: Uuid) -> StoreResult<Option<TeamNode>> {
        let mut conn = self.pool.acquire().await?;
        sql::find_node_for(&mut conn, team_id).await
    }

    async fn find_user_node_for(&self, membership_id: Uuid) -> StoreResult<Option<TeamUserNode>> {
        let mut conn = self.pool.acquire().await?;
        sql::find_user_node_for(&mut conn, membership_id).await
    }

    async fn children_of(&self, team_node_id: Uuid) -> StoreResult<Vec<TeamUserNode>> {
        let mut conn = self.pool.acquire().await?;
        sql::children_of(&mut conn, team_node_id).await
    }

    async fn team_nodes_under(&self, parent_id: Uuid) -> StoreResult<Vec<TeamNode>> {
        let mut conn = self.pool.acquire().await?;
        sql::team_nodes_under(&mut conn, parent_id).await
    }
}

#[async_trait]
impl TeamStore for PgStore {
    async fn find_team(&self, team_id: Uuid) -> StoreResult<Option<Team>> {
        let row = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {} FROM teams WHERE id = $1",
            TEAM_COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TeamRow::into_team).transpose()
    }

    async fn find_team_by_name(&self, parent_id: Uuid, name: &str) -> StoreResult<Option<Team>> {
        let row = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {} FROM teams WHERE parent_id = $1 AND name = $2",
            TEAM_COLUMNS
        ))
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TeamRow::into_team).transpose()
    }

    async fn list_teams(&self, parent_id: Uuid) -> StoreResult<Vec<Team>> {
        let rows = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {} FROM teams WHERE parent_id = $1 ORDER BY created_at ASC, id ASC",
            TEAM_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TeamRow::into_team).collect()
    }

    async fn rename_team(&self, team_id: Uuid, name: &str) -> MembershipResult<Option<Team>> {
        let result = sqlx::query_as::<_, TeamRow>(&format!(
            "UPDATE teams SET name = $2 WHERE id = $1 RETURNING {}",
            TEAM_COLUMNS
        ))
        .bind(team_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.map(TeamRow::into_team).transpose()?),
            Err(err) if is_unique_violation(&err) => {
                let parent_id = self
                    .find_team(team_id)
                    .await?
                    .map_or(Uuid::nil(), |team| team.parent_id);
                Err(MembershipError::DuplicateTeamName {
                    parent_id,
                    name: name.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn insert_team_with_node(&self, data: NewTeam) -> MembershipResult<(Team, TeamNode)> {
        let mut tx = self.pool.begin().await?;
        let team = data.clone().into_team();

        let inserted = sqlx::query_as::<_, TeamRow>(&format!(
            r#"
            INSERT INTO teams (id, parent_id, parent_kind, name, max_members, kind, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TEAM_COLUMNS
        ))
        .bind(team.id)
        .bind(team.parent_id)
        .bind(team.parent_kind.as_str())
        .bind(&team.name)
        .bind(team.max_members.map(to_db_size))
        .bind(team.kind.as_str())
        .bind(team.created_at)
        .fetch_one(&mut *tx)
        .await;

        let team = match inserted {
            Ok(row) => row.into_team()?,
            Err(err) if is_unique_violation(&err) => {
                return Err(MembershipError::DuplicateTeamName {
                    parent_id: data.parent_id,
                    name: data.name,
                })
            }
            Err(err) => return Err(err.into()),
        };

        let node = sql::create_node(&mut tx, team.id, team.parent_id, team.parent_kind).await?;
        tx.commit().await?;

        Ok((team, node))
    }

    async fn delete_team_cascade(&self, team_id: Uuid) -> MembershipResult<Option<TeamDeletion>> {
        let mut tx = self.pool.begin().await?;
        let Some(team) = Self::lock_team(&mut tx, team_id).await? else {
            return Ok(None);
        };

        if sql::find_node_for(&mut tx, team_id).await?.is_none() {
            return Err(missing_team_node(team_id));
        }

        let memberships = Self::memberships_in(&mut tx, team_id).await?;
        for membership in &memberships {
            if !sql::delete_user_node(&mut tx, membership.id).await? {
                // Dropping the transaction rolls back the nodes already removed.
                return Err(missing_user_node(membership.id));
            }
        }

        sqlx::query("DELETE FROM team_memberships WHERE team_id = $1")
            .bind(team_id)
            .execute(&mut *tx)
            .await?;
        sql::delete_node(&mut tx, team_id).await?;
        sqlx::query("DELETE FROM teams WHERE id = $1")
            .bind(team_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(TeamDeletion {
            team,
            memberships_removed: memberships.len(),
        }))
    }

    async fn find_membership(&self, membership_id: Uuid) -> StoreResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {} FROM team_memberships WHERE id = $1",
            MEMBERSHIP_COLUMNS
        ))
        .bind(membership_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MembershipRow::into_membership).transpose()
    }

    async fn find_team_membership(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {} FROM team_memberships WHERE team_id = $1 AND user_id = $2",
            MEMBERSHIP_COLUMNS
        ))
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MembershipRow::into_membership).transpose()
    }

    async fn list_memberships(&self, team_id: Uuid) -> StoreResult<Vec<Membership>> {
        let mut conn = self.pool.acquire().await?;
        Self::memberships_in(&mut conn, team_id).await
    }

    async fn count_members(&self, team_id: Uuid) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM team_memberships WHERE team_id = $1 AND role = 'member'",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert_membership(
        &self,
        data: NewMembership,
        admit: AdmissionCheck<'_>,
    ) -> MembershipResult<(Membership, TeamUserNode)> {
        let mut tx = self.pool.begin().await?;

        let team = Self::lock_team(&mut tx, data.team_id)
            .await?
            .ok_or(MembershipError::NotFound(EntityRef::Team(data.team_id)))?;

        let memberships = Self::memberships_in(&mut tx, team.id).await?;
        let snapshot = AdmissionSnapshot {
            member_count: memberships
                .iter()
                .filter(|membership| membership.role.counts_toward_capacity())
                .count() as u32,
            existing: memberships
                .iter()
                .find(|membership| membership.user_id == data.user_id)
                .cloned(),
            mentor: memberships
                .iter()
                .find(|membership| membership.role == MemberRole::Mentor)
                .cloned(),
            team,
        };
        admit(&snapshot)?;

        let team_node = sql::find_node_for(&mut tx, data.team_id)
            .await?
            .ok_or_else(|| missing_team_node(data.team_id))?;

        let membership = data.into_membership();
        let inserted = sqlx::query(
            r#"
            INSERT INTO team_memberships (id, team_id, user_id, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(membership.id)
        .bind(membership.team_id)
        .bind(membership.user_id)
        .bind(membership.role.as_str())
        .bind(membership.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(MembershipError::DuplicateMembership {
                    team_id: membership.team_id,
                    user_id: membership.user_id,
                })
            }
            Err(err) => return Err(err.into()),
        }

        let user_node = sql::create_user_node(&mut tx, team_node.id, membership.id).await?;
        tx.commit().await?;

        Ok((membership, user_node))
    }

    async fn delete_membership(&self, membership_id: Uuid) -> MembershipResult<Option<Membership>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {} FROM team_memberships WHERE id = $1 FOR UPDATE",
            MEMBERSHIP_COLUMNS
        ))
        .bind(membership_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(membership) = row.map(MembershipRow::into_membership).transpose()? else {
            return Ok(None);
        };

        if !sql::delete_user_node(&mut tx, membership_id).await? {
            return Err(missing_user_node(membership_id));
        }

        sqlx::query("DELETE FROM team_memberships WHERE id = $1")
            .bind(membership_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(membership))
    }
}
