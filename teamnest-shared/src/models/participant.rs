/// Participant links
///
/// A participant link records that a user is enrolled in a course or an
/// assignment and may therefore join teams owned by it. The membership engine
/// only reads these; enrollment goes through
/// [`EntityRegistry::find_or_create_participant`](crate::store::EntityRegistry::find_or_create_participant).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE participants (
///     id UUID PRIMARY KEY,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     parent_id UUID NOT NULL,
///     parent_kind VARCHAR(20) NOT NULL,
///     permission_granted BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (user_id, parent_id, parent_kind)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{ParentKind, User};

/// Enrollment of a user under a course or assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLink {
    /// Unique link ID
    pub id: Uuid,

    /// Enrolled user
    pub user_id: Uuid,

    /// Course or assignment ID
    pub parent_id: Uuid,

    /// Which kind of entity `parent_id` names
    pub parent_kind: ParentKind,

    /// Whether the participant granted publishing permission
    pub permission_granted: bool,

    /// When the link was created
    pub created_at: DateTime<Utc>,
}

impl ParticipantLink {
    /// Builds the link `find_or_create_participant` inserts when none exists.
    ///
    /// The permission flag is inherited from the user's master permission.
    pub fn enroll(user: &User, parent_id: Uuid, parent_kind: ParentKind) -> Self {
        ParticipantLink {
            id: Uuid::new_v4(),
            user_id: user.id,
            parent_id,
            parent_kind,
            permission_granted: user.master_permission_granted,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_inherits_master_permission() {
        let mut user = User {
            id: Uuid::new_v4(),
            name: "student1".to_string(),
            full_name: None,
            email: None,
            master_permission_granted: true,
            created_at: Utc::now(),
        };
        let parent_id = Uuid::new_v4();

        let link = ParticipantLink::enroll(&user, parent_id, ParentKind::Course);
        assert_eq!(link.user_id, user.id);
        assert_eq!(link.parent_id, parent_id);
        assert_eq!(link.parent_kind, ParentKind::Course);
        assert!(link.permission_granted);

        user.master_permission_granted = false;
        let link = ParticipantLink::enroll(&user, parent_id, ParentKind::Course);
        assert!(!link.permission_granted);
    }
}
