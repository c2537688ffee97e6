use crate::tasks::{TaskStatus, TeamId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-team workflow policy. Created lazily the first time a team configures it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    pub team_id: TeamId,
    /// Terminal statuses: no forward transition leaves them
    pub final_statuses: BTreeSet<TaskStatus>,
    /// When true any editor may revert a final status
    pub allow_status_reversion: bool,
    /// Roles allowed to revert a final status regardless of `allow_status_reversion`
    pub status_reversion_roles: BTreeSet<String>,
}

impl WorkflowConfiguration {
    pub fn new(team_id: TeamId) -> Self {
        Self {
            team_id,
            final_statuses: BTreeSet::new(),
            allow_status_reversion: false,
            status_reversion_roles: BTreeSet::new(),
        }
    }
}

/// One cell of the transition matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub allowed: bool,
}

/// Allow/deny matrix over every (from, to) status pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMatrix {
    rules: BTreeMap<(TaskStatus, TaskStatus), bool>,
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        use TaskStatus::*;

        let allowed: BTreeSet<(TaskStatus, TaskStatus)> = [
            (Todo, InProgress),
            (InProgress, Review),
            (InProgress, Todo),
            (Review, Done),
            (Review, InProgress),
            (Done, Archived),
            (Done, InProgress),
        ]
        .into_iter()
        .collect();

        let mut rules = BTreeMap::new();
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                rules.insert((from, to), allowed.contains(&(from, to)));
            }
        }
        Self { rules }
    }
}

impl TransitionMatrix {
    pub fn is_allowed(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.rules.get(&(from, to)).copied().unwrap_or(false)
    }

    pub fn set(&mut self, from: TaskStatus, to: TaskStatus, allowed: bool) {
        self.rules.insert((from, to), allowed);
    }

    /// Deny every transition out of `from`
    pub fn close_row(&mut self, from: TaskStatus) {
        for to in TaskStatus::ALL {
            self.rules.insert((from, to), false);
        }
    }

    pub fn allowed_targets(&self, from: TaskStatus) -> Vec<TaskStatus> {
        TaskStatus::ALL
            .into_iter()
            .filter(|to| self.is_allowed(from, *to))
            .collect()
    }

    pub fn rules(&self) -> Vec<TransitionRule> {
        self.rules
            .iter()
            .map(|(&(from, to), &allowed)| TransitionRule { from, to, allowed })
            .collect()
    }
}

/// Storage for workflow configuration and transition matrices.
///
/// Every write touches one item atomically: a whole configuration replacement, one
/// final status, one transition rule or one matrix row. Concurrent administrators editing
/// different items never overwrite each other.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn configuration(&self, team: TeamId) -> anyhow::Result<Option<WorkflowConfiguration>>;

    /// Replace the team's configuration wholesale
    async fn save_configuration(&self, configuration: WorkflowConfiguration) -> anyhow::Result<()>;

    /// Add one final status, creating the configuration if the team has none
    async fn add_final_status(
        &self,
        team: TeamId,
        status: TaskStatus,
    ) -> anyhow::Result<WorkflowConfiguration>;

    async fn transitions(&self, team: TeamId) -> anyhow::Result<Option<TransitionMatrix>>;

    /// Store `matrix` unless the team already has one; returns whichever is stored
    async fn seed_transitions(
        &self,
        team: TeamId,
        matrix: TransitionMatrix,
    ) -> anyhow::Result<TransitionMatrix>;

    /// Override one rule. A team without a matrix is seeded with the default first.
    async fn set_transition(
        &self,
        team: TeamId,
        from: TaskStatus,
        to: TaskStatus,
        allowed: bool,
    ) -> anyhow::Result<()>;

    /// Deny every transition out of `from`, seeding the default matrix if needed
    async fn close_transitions_from(&self, team: TeamId, from: TaskStatus) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct WorkflowState {
    configurations: HashMap<TeamId, WorkflowConfiguration>,
    matrices: HashMap<TeamId, TransitionMatrix>,
}

/// Single-process store; each operation runs under one write guard
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<WorkflowState>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn configuration(&self, team: TeamId) -> anyhow::Result<Option<WorkflowConfiguration>> {
        Ok(self.state.read().await.configurations.get(&team).cloned())
    }

    async fn save_configuration(&self, configuration: WorkflowConfiguration) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .configurations
            .insert(configuration.team_id, configuration);
        Ok(())
    }

    async fn add_final_status(
        &self,
        team: TeamId,
        status: TaskStatus,
    ) -> anyhow::Result<WorkflowConfiguration> {
        let mut state = self.state.write().await;
        let configuration = state
            .configurations
            .entry(team)
            .or_insert_with(|| WorkflowConfiguration::new(team));
        configuration.final_statuses.insert(status);
        Ok(configuration.clone())
    }

    async fn transitions(&self, team: TeamId) -> anyhow::Result<Option<TransitionMatrix>> {
        Ok(self.state.read().await.matrices.get(&team).cloned())
    }

    async fn seed_transitions(
        &self,
        team: TeamId,
        matrix: TransitionMatrix,
    ) -> anyhow::Result<TransitionMatrix> {
        Ok(self
            .state
            .write()
            .await
            .matrices
            .entry(team)
            .or_insert(matrix)
            .clone())
    }

    async fn set_transition(
        &self,
        team: TeamId,
        from: TaskStatus,
        to: TaskStatus,
        allowed: bool,
    ) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .matrices
            .entry(team)
            .or_default()
            .set(from, to, allowed);
        Ok(())
    }

    async fn close_transitions_from(&self, team: TeamId, from: TaskStatus) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .matrices
            .entry(team)
            .or_default()
            .close_row(from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_default_matrix_allowed_pairs() {
        let matrix = TransitionMatrix::default();
        assert_eq!(matrix.allowed_targets(Todo), vec![InProgress]);
        assert_eq!(matrix.allowed_targets(InProgress), vec![Todo, Review]);
        assert_eq!(matrix.allowed_targets(Review), vec![InProgress, Done]);
        assert_eq!(matrix.allowed_targets(Done), vec![InProgress, Archived]);
        assert!(matrix.allowed_targets(Archived).is_empty());
    }

    #[test]
    fn test_default_matrix_is_full_cross_product() {
        assert_eq!(TransitionMatrix::default().rules().len(), 25);
    }

    #[tokio::test]
    async fn test_seeding_keeps_an_existing_matrix() {
        let store = InMemoryWorkflowStore::new();
        let team = TeamId(3);
        store.set_transition(team, Todo, Done, true).await.unwrap();

        let stored = store
            .seed_transitions(team, TransitionMatrix::default())
            .await
            .unwrap();
        assert!(stored.is_allowed(Todo, Done));
        assert!(stored.is_allowed(Todo, InProgress));
    }

    #[tokio::test]
    async fn test_add_final_status_creates_configuration() {
        let store = InMemoryWorkflowStore::new();
        let team = TeamId(4);
        store.add_final_status(team, Done).await.unwrap();
        let configuration = store.add_final_status(team, Archived).await.unwrap();

        assert_eq!(
            configuration.final_statuses,
            [Done, Archived].into_iter().collect()
        );
        assert!(!configuration.allow_status_reversion);
    }

    #[test]
    fn test_close_row_denies_all_targets() {
        let mut matrix = TransitionMatrix::default();
        matrix.close_row(Done);
        assert!(matrix.allowed_targets(Done).is_empty());
        assert!(matrix.is_allowed(Review, Done));
    }
}
