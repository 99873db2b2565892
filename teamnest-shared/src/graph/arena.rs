use std::collections::HashMap;

use uuid::Uuid;

use super::{TeamNode, TeamUserNode};
use crate::models::entity::ParentKind;

/// In-memory node storage: an arena keyed by node ID plus indexes by the
/// mirrored object's ID.
///
/// Mutations are only reachable through `&mut`, so the owning store decides
/// the unit of work (for [`MemoryStore`](crate::store::MemoryStore), one
/// mutex guard).
#[derive(Debug, Default)]
pub struct NodeArena {
    team_nodes: HashMap<Uuid, TeamNode>,
    user_nodes: HashMap<Uuid, TeamUserNode>,
    // team id -> team node id
    team_index: HashMap<Uuid, Uuid>,
    // membership id -> user node id
    membership_index: HashMap<Uuid, Uuid>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the node for a team
    pub fn create_node(&mut self, team_id: Uuid, parent_id: Uuid, parent_kind: ParentKind) -> TeamNode {
        let node = TeamNode {
            id: Uuid::new_v4(),
            node_object_id: team_id,
            parent_id,
            parent_kind,
        };
        self.team_index.insert(team_id, node.id);
        self.team_nodes.insert(node.id, node.clone());
        node
    }

    /// Deletes a team's node and any user nodes still under it
    pub fn delete_node(&mut self, team_id: Uuid) -> Option<TeamNode> {
        let node_id = self.team_index.remove(&team_id)?;
        let node = self.team_nodes.remove(&node_id)?;

        let orphaned: Vec<Uuid> = self
            .user_nodes
            .values()
            .filter(|child| child.parent_id == node_id)
            .map(|child| child.node_object_id)
            .collect();
        for membership_id in orphaned {
            self.delete_user_node(membership_id);
        }

        Some(node)
    }

    /// Creates the node for a membership under `team_node_id`
    pub fn create_user_node(&mut self, team_node_id: Uuid, membership_id: Uuid) -> TeamUserNode {
        let node = TeamUserNode {
            id: Uuid::new_v4(),
            parent_id: team_node_id,
            node_object_id: membership_id,
        };
        self.membership_index.insert(membership_id, node.id);
        self.user_nodes.insert(node.id, node.clone());
        node
    }

    /// Deletes a membership's node
    pub fn delete_user_node(&mut self, membership_id: Uuid) -> Option<TeamUserNode> {
        let node_id = self.membership_index.remove(&membership_id)?;
        self.user_nodes.remove(&node_id)
    }

    pub fn find_node_for(&self, team_id: Uuid) -> Option<&TeamNode> {
        self.team_index
            .get(&team_id)
            .and_then(|node_id| self.team_nodes.get(node_id))
    }

    pub fn find_user_node_for(&self, membership_id: Uuid) -> Option<&TeamUserNode> {
        self.membership_index
            .get(&membership_id)
            .and_then(|node_id| self.user_nodes.get(node_id))
    }

    /// User nodes under a team node, ordered by node ID
    pub fn children_of(&self, team_node_id: Uuid) -> Vec<TeamUserNode> {
        let mut children: Vec<TeamUserNode> = self
            .user_nodes
            .values()
            .filter(|child| child.parent_id == team_node_id)
            .cloned()
            .collect();
        children.sort_by_key(|child| child.id);
        children
    }

    /// Team nodes under an owner, ordered by node ID
    pub fn team_nodes_under(&self, parent_id: Uuid) -> Vec<TeamNode> {
        let mut nodes: Vec<TeamNode> = self
            .team_nodes
            .values()
            .filter(|node| node.parent_id == parent_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    pub fn team_node_count(&self) -> usize {
        self.team_nodes.len()
    }

    pub fn user_node_count(&self) -> usize {
        self.user_nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find_nodes() {
        let mut arena = NodeArena::new();
        let team_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();

        let node = arena.create_node(team_id, parent_id, ParentKind::Assignment);
        assert_eq!(arena.find_node_for(team_id), Some(&node));
        assert_eq!(arena.team_nodes_under(parent_id), vec![node.clone()]);

        let membership_id = Uuid::new_v4();
        let user_node = arena.create_user_node(node.id, membership_id);
        assert_eq!(arena.find_user_node_for(membership_id), Some(&user_node));
        assert_eq!(arena.children_of(node.id), vec![user_node]);
    }

    #[test]
    fn test_delete_user_node() {
        let mut arena = NodeArena::new();
        let node = arena.create_node(Uuid::new_v4(), Uuid::new_v4(), ParentKind::Course);
        let membership_id = Uuid::new_v4();
        arena.create_user_node(node.id, membership_id);

        assert!(arena.delete_user_node(membership_id).is_some());
        assert!(arena.find_user_node_for(membership_id).is_none());
        assert!(arena.delete_user_node(membership_id).is_none());
        assert_eq!(arena.user_node_count(), 0);
    }

    #[test]
    fn test_delete_node_cascades_to_children() {
        let mut arena = NodeArena::new();
        let team_id = Uuid::new_v4();
        let node = arena.create_node(team_id, Uuid::new_v4(), ParentKind::Course);
        arena.create_user_node(node.id, Uuid::new_v4());
        arena.create_user_node(node.id, Uuid::new_v4());
        assert_eq!(arena.user_node_count(), 2);

        assert!(arena.delete_node(team_id).is_some());
        assert_eq!(arena.team_node_count(), 0);
        assert_eq!(arena.user_node_count(), 0);
        assert!(arena.find_node_for(team_id).is_none());
    }
}
