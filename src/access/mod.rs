// Permission checks and team membership, consumed through narrow contracts

pub mod directory;

pub use directory::{InMemoryTeamDirectory, TeamRole};

use crate::errors::MutationError;
use crate::tasks::{TeamId, UserId};
use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    CreateTask,
    ViewTask,
    EditTask,
    DeleteTask,
    LockTask,
    ManageWatchers,
    ViewTeamSettings,
    ManageWorkflow,
    RevertStatus,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::CreateTask => "CREATE_TASK",
            Permission::ViewTask => "VIEW_TASK",
            Permission::EditTask => "EDIT_TASK",
            Permission::DeleteTask => "DELETE_TASK",
            Permission::LockTask => "LOCK_TASK",
            Permission::ManageWatchers => "MANAGE_WATCHERS",
            Permission::ViewTeamSettings => "VIEW_TEAM_SETTINGS",
            Permission::ManageWorkflow => "MANAGE_WORKFLOW",
            Permission::RevertStatus => "REVERT_STATUS",
        };
        f.write_str(name)
    }
}

/// Permission check for an actor on a team.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Ok when the actor holds `permission` on `team`, `Forbidden` otherwise
    async fn authorize(
        &self,
        team: TeamId,
        actor: UserId,
        permission: Permission,
    ) -> Result<(), MutationError>;

    async fn is_permitted(&self, team: TeamId, actor: UserId, permission: Permission) -> bool {
        self.authorize(team, actor, permission).await.is_ok()
    }
}

/// Team membership, roles and label catalog
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn is_member(&self, team: TeamId, user: UserId) -> anyhow::Result<bool>;

    /// Role ids the user holds on the team
    async fn member_roles(&self, team: TeamId, user: UserId) -> anyhow::Result<BTreeSet<String>>;

    /// Labels a task of this team may carry
    async fn team_labels(&self, team: TeamId) -> anyhow::Result<BTreeSet<String>>;
}
