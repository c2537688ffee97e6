use super::{Authorizer, Permission, TeamDirectory};
use crate::errors::MutationError;
use crate::tasks::{TeamId, UserId};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A named role and the permissions it grants
#[derive(Debug, Clone)]
pub struct TeamRole {
    pub id: String,
    pub permissions: BTreeSet<Permission>,
}

impl TeamRole {
    pub fn new<I: IntoIterator<Item = Permission>>(id: impl Into<String>, permissions: I) -> Self {
        Self {
            id: id.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Every permission a regular contributor needs to work on tasks
    pub fn member(id: impl Into<String>) -> Self {
        Self::new(
            id,
            [
                Permission::CreateTask,
                Permission::ViewTask,
                Permission::EditTask,
                Permission::ManageWatchers,
                Permission::ViewTeamSettings,
            ],
        )
    }
}

#[derive(Debug, Default)]
struct TeamRecord {
    owner: Option<UserId>,
    roles: HashMap<String, TeamRole>,
    members: HashMap<UserId, BTreeSet<String>>,
    labels: BTreeSet<String>,
}

/// In-process directory of teams, roles and labels.
///
/// The team owner passes every permission check; other members pass when any of their
/// roles grants the permission.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTeamDirectory {
    teams: Arc<RwLock<HashMap<TeamId, TeamRecord>>>,
}

impl InMemoryTeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_team(&self, team: TeamId, owner: UserId) {
        let mut teams = self.teams.write().await;
        let record = teams.entry(team).or_default();
        record.owner = Some(owner);
        record.members.entry(owner).or_default();
    }

    pub async fn define_role(&self, team: TeamId, role: TeamRole) {
        let mut teams = self.teams.write().await;
        teams.entry(team).or_default().roles.insert(role.id.clone(), role);
    }

    pub async fn add_member<I, S>(&self, team: TeamId, user: UserId, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut teams = self.teams.write().await;
        teams
            .entry(team)
            .or_default()
            .members
            .entry(user)
            .or_default()
            .extend(roles.into_iter().map(Into::into));
    }

    pub async fn add_labels<I, S>(&self, team: TeamId, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut teams = self.teams.write().await;
        teams
            .entry(team)
            .or_default()
            .labels
            .extend(labels.into_iter().map(Into::into));
    }
}

#[async_trait]
impl Authorizer for InMemoryTeamDirectory {
    async fn authorize(
        &self,
        team: TeamId,
        actor: UserId,
        permission: Permission,
    ) -> Result<(), MutationError> {
        let teams = self.teams.read().await;
        let granted = teams.get(&team).is_some_and(|record| {
            if record.owner == Some(actor) {
                return true;
            }
            record.members.get(&actor).is_some_and(|roles| {
                roles.iter().any(|role_id| {
                    record
                        .roles
                        .get(role_id)
                        .is_some_and(|role| role.permissions.contains(&permission))
                })
            })
        });

        if granted {
            Ok(())
        } else {
            debug!(team = %team, actor = %actor, permission = %permission, "Permission denied");
            Err(MutationError::Forbidden {
                team,
                actor,
                permission,
            })
        }
    }
}

#[async_trait]
impl TeamDirectory for InMemoryTeamDirectory {
    async fn is_member(&self, team: TeamId, user: UserId) -> anyhow::Result<bool> {
        let teams = self.teams.read().await;
        Ok(teams
            .get(&team)
            .is_some_and(|record| record.members.contains_key(&user)))
    }

    async fn member_roles(&self, team: TeamId, user: UserId) -> anyhow::Result<BTreeSet<String>> {
        let teams = self.teams.read().await;
        Ok(teams
            .get(&team)
            .and_then(|record| record.members.get(&user))
            .cloned()
            .unwrap_or_default())
    }

    async fn team_labels(&self, team: TeamId) -> anyhow::Result<BTreeSet<String>> {
        let teams = self.teams.read().await;
        Ok(teams
            .get(&team)
            .map(|record| record.labels.clone())
            .unwrap_or_default())
    }
}
