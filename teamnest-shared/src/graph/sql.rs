/// PostgreSQL node helpers
///
/// Each helper takes the connection of an open transaction so that node
/// writes commit or roll back with the team/membership rows they mirror.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE team_nodes (
///     id UUID PRIMARY KEY,
///     node_object_id UUID NOT NULL UNIQUE REFERENCES teams(id) ON DELETE CASCADE,
///     parent_id UUID NOT NULL,
///     parent_kind VARCHAR(20) NOT NULL
/// );
///
/// CREATE TABLE team_user_nodes (
///     id UUID PRIMARY KEY,
///     parent_id UUID NOT NULL REFERENCES team_nodes(id) ON DELETE CASCADE,
///     node_object_id UUID NOT NULL UNIQUE REFERENCES team_memberships(id) ON DELETE CASCADE
/// );
/// ```

use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::{TeamNode, TeamUserNode};
use crate::error::{StoreError, StoreResult};
use crate::models::entity::ParentKind;

#[derive(Debug, Clone, FromRow)]
struct TeamNodeRow {
    id: Uuid,
    node_object_id: Uuid,
    parent_id: Uuid,
    parent_kind: String,
}

#[derive(Debug, Clone, FromRow)]
struct TeamUserNodeRow {
    id: Uuid,
    parent_id: Uuid,
    node_object_id: Uuid,
}

impl TeamNodeRow {
    fn into_node(self) -> StoreResult<TeamNode> {
        let parent_kind = ParentKind::from_str(&self.parent_kind).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "team node {} has unknown parent kind {:?}",
                self.id, self.parent_kind
            ))
        })?;

        Ok(TeamNode {
            id: self.id,
            node_object_id: self.node_object_id,
            parent_id: self.parent_id,
            parent_kind,
        })
    }
}

impl TeamUserNodeRow {
    fn into_node(self) -> TeamUserNode {
        TeamUserNode {
            id: self.id,
            parent_id: self.parent_id,
            node_object_id: self.node_object_id,
        }
    }
}

/// Inserts the node for a freshly inserted team
pub async fn create_node(
    conn: &mut PgConnection,
    team_id: Uuid,
    parent_id: Uuid,
    parent_kind: ParentKind,
) -> StoreResult<TeamNode> {
    let row = sqlx::query_as::<_, TeamNodeRow>(
        r#"
        INSERT INTO team_nodes (id, node_object_id, parent_id, parent_kind)
        VALUES ($1, $2, $3, $4)
        RETURNING id, node_object_id, parent_id, parent_kind
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(team_id)
    .bind(parent_id)
    .bind(parent_kind.as_str())
    .fetch_one(&mut *conn)
    .await?;

    row.into_node()
}

/// Deletes a team's node, returning whether one existed
pub async fn delete_node(conn: &mut PgConnection, team_id: Uuid) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM team_nodes WHERE node_object_id = $1")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Inserts the node for a freshly inserted membership
pub async fn create_user_node(
    conn: &mut PgConnection,
    team_node_id: Uuid,
    membership_id: Uuid,
) -> StoreResult<TeamUserNode> {
    let row = sqlx::query_as::<_, TeamUserNodeRow>(
        r#"
        INSERT INTO team_user_nodes (id, parent_id, node_object_id)
        VALUES ($1, $2, $3)
        RETURNING id, parent_id, node_object_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(team_node_id)
    .bind(membership_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.into_node())
}

/// Deletes a membership's node, returning whether one existed
pub async fn delete_user_node(conn: &mut PgConnection, membership_id: Uuid) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM team_user_nodes WHERE node_object_id = $1")
        .bind(membership_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_node_for(conn: &mut PgConnection, team_id: Uuid) -> StoreResult<Option<TeamNode>> {
    let row = sqlx::query_as::<_, TeamNodeRow>(
        r#"
        SELECT id, node_object_id, parent_id, parent_kind
        FROM team_nodes
        WHERE node_object_id = $1
        "#,
    )
    .bind(team_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TeamNodeRow::into_node).transpose()
}

pub async fn find_user_node_for(
    conn: &mut PgConnection,
    membership_id: Uuid,
) -> StoreResult<Option<TeamUserNode>> {
    let row = sqlx::query_as::<_, TeamUserNodeRow>(
        r#"
        SELECT id, parent_id, node_object_id
        FROM team_user_nodes
        WHERE node_object_id = $1
        "#,
    )
    .bind(membership_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(TeamUserNodeRow::into_node))
}

pub async fn children_of(conn: &mut PgConnection, team_node_id: Uuid) -> StoreResult<Vec<TeamUserNode>> {
    let rows = sqlx::query_as::<_, TeamUserNodeRow>(
        r#"
        SELECT id, parent_id, node_object_id
        FROM team_user_nodes
        WHERE parent_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(team_node_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(TeamUserNodeRow::into_node).collect())
}

pub async fn team_nodes_under(conn: &mut PgConnection, parent_id: Uuid) -> StoreResult<Vec<TeamNode>> {
    let rows = sqlx::query_as::<_, TeamNodeRow>(
        r#"
        SELECT id, node_object_id, parent_id, parent_kind
        FROM team_nodes
        WHERE parent_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TeamNodeRow::into_node).collect()
}
