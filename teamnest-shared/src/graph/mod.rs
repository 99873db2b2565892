//! Node graph mirroring the team hierarchy
//!
//! Every team has exactly one [`TeamNode`] and every membership exactly one
//! [`TeamUserNode`] whose `parent_id` is the team's node. Traversal
//! (owner → teams → members) reads the mirror; the relational rows are the
//! source of truth.
//!
//! Nodes are only created or deleted from inside a store unit of work:
//! [`NodeArena`] for the in-memory store, the [`sql`] helpers for PostgreSQL.
//! This module exposes reads ([`NodeGraph`]) and an audit
//! ([`verify_mirror`]) that reports divergence.
//!
//! ```text
//! course/assignment
//!   └─ TeamNode (node_object_id = team.id)
//!        ├─ TeamUserNode (node_object_id = membership.id)
//!        └─ TeamUserNode
//! ```

mod arena;
pub mod sql;

pub use arena::NodeArena;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MembershipError, MembershipResult, StoreResult};
use crate::models::entity::ParentKind;
use crate::store::TeamStore;

/// Graph node for a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamNode {
    /// Node ID
    pub id: Uuid,

    /// Team this node mirrors
    pub node_object_id: Uuid,

    /// Owning course or assignment
    pub parent_id: Uuid,

    /// Kind of `parent_id`
    pub parent_kind: ParentKind,
}

/// Graph node for a membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamUserNode {
    /// Node ID
    pub id: Uuid,

    /// Parent `TeamNode`
    pub parent_id: Uuid,

    /// Membership this node mirrors
    pub node_object_id: Uuid,
}

/// Divergence between relational rows and the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MirrorViolation {
    /// Team row without a node
    MissingTeamNode { team_id: Uuid },

    /// Membership row without a node
    MissingUserNode { membership_id: Uuid },

    /// User node under the team whose membership no longer exists
    OrphanedUserNode { node_id: Uuid, membership_id: Uuid },

    /// User node attached to another team's node
    MisplacedUserNode {
        membership_id: Uuid,
        expected_parent: Uuid,
        actual_parent: Uuid,
    },
}

/// Read access to the mirror
#[async_trait]
pub trait NodeGraph: Send + Sync {
    /// Node mirroring a team
    async fn find_node_for(&self, team_id: Uuid) -> StoreResult<Option<TeamNode>>;

    /// Node mirroring a membership
    async fn find_user_node_for(&self, membership_id: Uuid) -> StoreResult<Option<TeamUserNode>>;

    /// Member nodes hanging off a team node
    async fn children_of(&self, team_node_id: Uuid) -> StoreResult<Vec<TeamUserNode>>;

    /// Team nodes under a course or assignment
    async fn team_nodes_under(&self, parent_id: Uuid) -> StoreResult<Vec<TeamNode>>;
}

/// Error for a team row whose node is missing.
///
/// Stores return this from inside a unit of work, before anything is written.
pub fn missing_team_node(team_id: Uuid) -> MembershipError {
    tracing::error!(team_id = %team_id, "Team has no node");
    MembershipError::InvariantViolation(format!("team {} has no team node", team_id))
}

/// Error for a membership row whose node is missing
pub fn missing_user_node(membership_id: Uuid) -> MembershipError {
    tracing::error!(membership_id = %membership_id, "Membership has no node");
    MembershipError::InvariantViolation(format!(
        "membership {} has no team user node",
        membership_id
    ))
}

/// Compares a team's memberships against its mirror.
///
/// Returns an empty vector when the mirror is consistent.
pub async fn verify_mirror<S>(store: &S, team_id: Uuid) -> MembershipResult<Vec<MirrorViolation>>
where
    S: TeamStore + ?Sized,
{
    let mut violations = Vec::new();

    let Some(node) = store.find_node_for(team_id).await? else {
        violations.push(MirrorViolation::MissingTeamNode { team_id });
        return Ok(violations);
    };

    let memberships = store.list_memberships(team_id).await?;
    let membership_ids: HashSet<Uuid> = memberships.iter().map(|m| m.id).collect();

    for membership in &memberships {
        match store.find_user_node_for(membership.id).await? {
            None => violations.push(MirrorViolation::MissingUserNode {
                membership_id: membership.id,
            }),
            Some(user_node) if user_node.parent_id != node.id => {
                violations.push(MirrorViolation::MisplacedUserNode {
                    membership_id: membership.id,
                    expected_parent: node.id,
                    actual_parent: user_node.parent_id,
                })
            }
            Some(_) => {}
        }
    }

    for child in store.children_of(node.id).await? {
        if !membership_ids.contains(&child.node_object_id) {
            violations.push(MirrorViolation::OrphanedUserNode {
                node_id: child.id,
                membership_id: child.node_object_id,
            });
        }
    }

    if !violations.is_empty() {
        tracing::error!(
            team_id = %team_id,
            violations = violations.len(),
            "Node mirror diverged from memberships"
        );
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_node_errors_are_fatal() {
        let team_id = Uuid::new_v4();
        let err = missing_team_node(team_id);
        assert!(err.is_fatal());
        assert_eq!(err.code(), "invariant_violation");
        assert!(err.to_string().contains(&team_id.to_string()));

        let membership_id = Uuid::new_v4();
        let err = missing_user_node(membership_id);
        assert!(matches!(err, MembershipError::InvariantViolation(ref message)
            if message.contains(&membership_id.to_string())));
    }
}
