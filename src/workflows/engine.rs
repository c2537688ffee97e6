use super::store::{TransitionMatrix, TransitionRule, WorkflowConfiguration, WorkflowStore};
use crate::access::{Authorizer, Permission, TeamDirectory};
use crate::errors::MutationError;
use crate::events::{HistoryStore, TeamAuditEntry};
use crate::tasks::{TaskStatus, TeamId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Requested workflow policy for a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub final_statuses: BTreeSet<TaskStatus>,
    pub allow_status_reversion: bool,
    pub status_reversion_roles: BTreeSet<String>,
}

/// Per-team status policy.
///
/// Two independent policies live here: the final-status set, which is the hard gate on
/// forward transitions, and the transition matrix, which is advisory guidance for clients.
/// When they disagree the final-status set wins.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    authorizer: Arc<dyn Authorizer>,
    directory: Arc<dyn TeamDirectory>,
    audit: Option<Arc<dyn HistoryStore>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        authorizer: Arc<dyn Authorizer>,
        directory: Arc<dyn TeamDirectory>,
    ) -> Self {
        Self {
            store,
            authorizer,
            directory,
            audit: None,
        }
    }

    /// Record workflow changes in the team's audit trail
    pub fn with_audit_log(mut self, audit: Arc<dyn HistoryStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Seed a new team with the default transition matrix. A team that already has a
    /// matrix keeps it.
    pub async fn initialize_default_transitions(
        &self,
        team: TeamId,
    ) -> Result<TransitionMatrix, MutationError> {
        let matrix = self
            .store
            .seed_transitions(team, TransitionMatrix::default())
            .await
            .map_err(MutationError::Storage)?;
        debug!(team = %team, "Default status transitions in place");
        Ok(matrix)
    }

    async fn matrix(&self, team: TeamId) -> Result<TransitionMatrix, MutationError> {
        match self
            .store
            .transitions(team)
            .await
            .map_err(MutationError::Storage)?
        {
            Some(matrix) => Ok(matrix),
            None => self.initialize_default_transitions(team).await,
        }
    }

    /// Workflow configuration, absent until the team first configures one
    pub async fn workflow_configuration(
        &self,
        team: TeamId,
    ) -> Result<Option<WorkflowConfiguration>, MutationError> {
        self.store
            .configuration(team)
            .await
            .map_err(MutationError::Storage)
    }

    /// True iff `status` is in the team's final-status set. Teams without a
    /// configuration have no final statuses.
    pub async fn is_final_status(
        &self,
        team: TeamId,
        status: TaskStatus,
    ) -> Result<bool, MutationError> {
        Ok(self
            .workflow_configuration(team)
            .await?
            .is_some_and(|configuration| configuration.final_statuses.contains(&status)))
    }

    /// Gate a normal (non-reversion) status change.
    pub async fn validate_transition(
        &self,
        team: TeamId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), MutationError> {
        if self.is_final_status(team, from).await? {
            return Err(MutationError::WorkflowViolation { from, to });
        }

        if !self.matrix(team).await?.is_allowed(from, to) {
            debug!(
                team = %team,
                from = %from,
                to = %to,
                "Transition not in the team matrix; allowing because the matrix is advisory"
            );
        }
        Ok(())
    }

    /// Advisory matrix lookup for client guidance
    pub async fn is_transition_allowed(
        &self,
        team: TeamId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, MutationError> {
        Ok(self.matrix(team).await?.is_allowed(from, to))
    }

    /// Reversion is permitted when the team enables it, when the actor holds a reversion
    /// role, or when the authorizer grants `RevertStatus` directly.
    pub async fn authorize_reversion(
        &self,
        team: TeamId,
        actor: UserId,
    ) -> Result<(), MutationError> {
        let configuration = self
            .workflow_configuration(team)
            .await?
            .unwrap_or_else(|| WorkflowConfiguration::new(team));

        if configuration.allow_status_reversion {
            return Ok(());
        }

        let roles = self
            .directory
            .member_roles(team, actor)
            .await
            .map_err(MutationError::Storage)?;
        if !roles.is_disjoint(&configuration.status_reversion_roles) {
            return Ok(());
        }

        self.authorizer
            .authorize(team, actor, Permission::RevertStatus)
            .await
    }

    /// Create or replace the team's workflow policy
    pub async fn configure_workflow(
        &self,
        team: TeamId,
        actor: UserId,
        settings: WorkflowSettings,
    ) -> Result<WorkflowConfiguration, MutationError> {
        self.authorizer
            .authorize(team, actor, Permission::ManageWorkflow)
            .await?;

        let configuration = WorkflowConfiguration {
            team_id: team,
            final_statuses: settings.final_statuses,
            allow_status_reversion: settings.allow_status_reversion,
            status_reversion_roles: settings.status_reversion_roles,
        };
        self.store
            .save_configuration(configuration.clone())
            .await
            .map_err(MutationError::Storage)?;

        info!(
            team = %team,
            actor = %actor,
            final_statuses = ?configuration.final_statuses,
            allow_status_reversion = configuration.allow_status_reversion,
            "Workflow configured"
        );
        self.record_audit(
            TeamAuditEntry::new(team, actor, "WORKFLOW_CONFIGURED")
                .with_info("teamId", json!(team))
                .with_info("finalStatuses", json!(configuration.final_statuses))
                .with_info("allowReversion", json!(configuration.allow_status_reversion)),
        )
        .await;
        Ok(configuration)
    }

    /// Override a single (from, to) rule; other rules are untouched
    pub async fn update_transition(
        &self,
        team: TeamId,
        actor: UserId,
        from: TaskStatus,
        to: TaskStatus,
        allowed: bool,
    ) -> Result<TransitionRule, MutationError> {
        self.authorizer
            .authorize(team, actor, Permission::ManageWorkflow)
            .await?;

        self.store
            .set_transition(team, from, to, allowed)
            .await
            .map_err(MutationError::Storage)?;

        info!(team = %team, actor = %actor, from = %from, to = %to, allowed, "Workflow transition updated");
        Ok(TransitionRule { from, to, allowed })
    }

    pub async fn team_transitions(
        &self,
        team: TeamId,
        actor: UserId,
    ) -> Result<Vec<TransitionRule>, MutationError> {
        self.authorizer
            .authorize(team, actor, Permission::ViewTeamSettings)
            .await?;
        Ok(self.matrix(team).await?.rules())
    }

    /// Close every transition out of `status` and add it to the final-status set
    pub async fn mark_status_as_final(
        &self,
        team: TeamId,
        actor: UserId,
        status: TaskStatus,
    ) -> Result<WorkflowConfiguration, MutationError> {
        self.authorizer
            .authorize(team, actor, Permission::ManageWorkflow)
            .await?;

        self.store
            .close_transitions_from(team, status)
            .await
            .map_err(MutationError::Storage)?;
        let configuration = self
            .store
            .add_final_status(team, status)
            .await
            .map_err(MutationError::Storage)?;

        info!(team = %team, actor = %actor, status = %status, "Status marked as final");
        Ok(configuration)
    }

    async fn record_audit(&self, entry: TeamAuditEntry) {
        let Some(audit) = &self.audit else {
            return;
        };
        let (team, action) = (entry.team_id, entry.action.clone());
        if let Err(e) = audit.append_team_entry(entry).await {
            warn!(team = %team, action = %action, error = %e, "Failed to record team audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{InMemoryTeamDirectory, MockAuthorizer, MockTeamDirectory, TeamRole};
    use crate::events::InMemoryHistoryStore;
    use crate::workflows::InMemoryWorkflowStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use TaskStatus::*;

    /// Adds a network-like delay to every store call
    struct SlowWorkflowStore {
        inner: InMemoryWorkflowStore,
    }

    impl SlowWorkflowStore {
        async fn pause() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[async_trait]
    impl WorkflowStore for SlowWorkflowStore {
        async fn configuration(&self, team: TeamId) -> anyhow::Result<Option<WorkflowConfiguration>> {
            let configuration = self.inner.configuration(team).await;
            Self::pause().await;
            configuration
        }

        async fn save_configuration(&self, configuration: WorkflowConfiguration) -> anyhow::Result<()> {
            Self::pause().await;
            self.inner.save_configuration(configuration).await
        }

        async fn add_final_status(
            &self,
            team: TeamId,
            status: TaskStatus,
        ) -> anyhow::Result<WorkflowConfiguration> {
            Self::pause().await;
            self.inner.add_final_status(team, status).await
        }

        async fn transitions(&self, team: TeamId) -> anyhow::Result<Option<TransitionMatrix>> {
            let matrix = self.inner.transitions(team).await;
            Self::pause().await;
            matrix
        }

        async fn seed_transitions(
            &self,
            team: TeamId,
            matrix: TransitionMatrix,
        ) -> anyhow::Result<TransitionMatrix> {
            Self::pause().await;
            self.inner.seed_transitions(team, matrix).await
        }

        async fn set_transition(
            &self,
            team: TeamId,
            from: TaskStatus,
            to: TaskStatus,
            allowed: bool,
        ) -> anyhow::Result<()> {
            Self::pause().await;
            self.inner.set_transition(team, from, to, allowed).await
        }

        async fn close_transitions_from(&self, team: TeamId, from: TaskStatus) -> anyhow::Result<()> {
            Self::pause().await;
            self.inner.close_transitions_from(team, from).await
        }
    }

    async fn slow_engine() -> WorkflowEngine {
        let directory = Arc::new(InMemoryTeamDirectory::new());
        directory.create_team(TEAM, OWNER).await;
        WorkflowEngine::new(
            Arc::new(SlowWorkflowStore {
                inner: InMemoryWorkflowStore::new(),
            }),
            directory.clone(),
            directory,
        )
    }

    const TEAM: TeamId = TeamId(1);
    const OWNER: UserId = UserId(1);
    const DEV: UserId = UserId(2);

    async fn engine() -> WorkflowEngine {
        let directory = Arc::new(InMemoryTeamDirectory::new());
        directory.create_team(TEAM, OWNER).await;
        directory.define_role(TEAM, TeamRole::member("developer")).await;
        directory.define_role(TEAM, TeamRole::new("lead", [Permission::EditTask])).await;
        directory.add_member(TEAM, DEV, ["developer"]).await;
        WorkflowEngine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            directory.clone(),
            directory,
        )
    }

    fn finals<I: IntoIterator<Item = TaskStatus>>(statuses: I) -> WorkflowSettings {
        WorkflowSettings {
            final_statuses: statuses.into_iter().collect(),
            ..WorkflowSettings::default()
        }
    }

    #[tokio::test]
    async fn test_unconfigured_team_has_no_final_statuses() {
        let engine = engine().await;
        for status in TaskStatus::ALL {
            assert!(!engine.is_final_status(TEAM, status).await.unwrap());
        }
        assert!(engine.validate_transition(TEAM, Done, Archived).await.is_ok());
    }

    #[tokio::test]
    async fn test_final_status_blocks_forward_transition() {
        let engine = engine().await;
        engine
            .configure_workflow(TEAM, OWNER, finals([Done]))
            .await
            .unwrap();

        let err = engine
            .validate_transition(TEAM, Done, Archived)
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::WorkflowViolation { from: Done, to: Archived }));
    }

    #[tokio::test]
    async fn test_matrix_is_advisory_for_non_final_statuses() {
        let engine = engine().await;
        assert!(!engine.is_transition_allowed(TEAM, Todo, Done).await.unwrap());
        assert!(engine.validate_transition(TEAM, Todo, Done).await.is_ok());
    }

    #[tokio::test]
    async fn test_final_status_wins_over_matrix() {
        let engine = engine().await;
        engine.configure_workflow(TEAM, OWNER, finals([Review])).await.unwrap();

        assert!(engine.is_transition_allowed(TEAM, Review, Done).await.unwrap());
        assert!(engine.validate_transition(TEAM, Review, Done).await.is_err());
    }

    #[tokio::test]
    async fn test_configuring_requires_manage_workflow() {
        let engine = engine().await;
        let err = engine
            .configure_workflow(TEAM, DEV, finals([Done]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MutationError::Forbidden { permission: Permission::ManageWorkflow, .. }
        ));
        assert!(engine.workflow_configuration(TEAM).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_status_as_final_updates_both_policies() {
        let engine = engine().await;
        let configuration = engine.mark_status_as_final(TEAM, OWNER, Done).await.unwrap();

        assert!(configuration.final_statuses.contains(&Done));
        assert!(!engine.is_transition_allowed(TEAM, Done, InProgress).await.unwrap());
        assert!(engine.is_final_status(TEAM, Done).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_transition_and_listing() {
        let engine = engine().await;
        engine
            .update_transition(TEAM, OWNER, Todo, Done, true)
            .await
            .unwrap();

        let rules = engine.team_transitions(TEAM, DEV).await.unwrap();
        assert_eq!(rules.len(), 25);
        assert!(rules.contains(&TransitionRule { from: Todo, to: Done, allowed: true }));
    }

    #[tokio::test]
    async fn test_reversion_authorization_paths() {
        let engine = engine().await;
        engine
            .configure_workflow(
                TEAM,
                OWNER,
                WorkflowSettings {
                    final_statuses: [Done].into_iter().collect(),
                    allow_status_reversion: false,
                    status_reversion_roles: ["developer".to_string()].into_iter().collect(),
                },
            )
            .await
            .unwrap();

        assert!(engine.authorize_reversion(TEAM, DEV).await.is_ok());
        assert!(engine.authorize_reversion(TEAM, OWNER).await.is_ok());
        assert!(matches!(
            engine.authorize_reversion(TEAM, UserId(77)).await,
            Err(MutationError::Forbidden { permission: Permission::RevertStatus, .. })
        ));
    }

    #[tokio::test]
    async fn test_team_wide_reversion_skips_role_lookup() {
        let mut directory = MockTeamDirectory::new();
        directory.expect_member_roles().never();
        let authorizer = MockAuthorizer::new();

        let store = Arc::new(InMemoryWorkflowStore::new());
        let mut configuration = WorkflowConfiguration::new(TEAM);
        configuration.allow_status_reversion = true;
        store.save_configuration(configuration).await.unwrap();

        let engine = WorkflowEngine::new(store, Arc::new(authorizer), Arc::new(directory));
        assert!(engine.authorize_reversion(TEAM, UserId(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_final_status_marks_are_both_kept() {
        let engine = slow_engine().await;

        let (done, archived) = tokio::join!(
            engine.mark_status_as_final(TEAM, OWNER, Done),
            engine.mark_status_as_final(TEAM, OWNER, Archived),
        );
        done.unwrap();
        archived.unwrap();

        assert!(engine.is_final_status(TEAM, Done).await.unwrap());
        assert!(engine.is_final_status(TEAM, Archived).await.unwrap());
        assert!(engine.validate_transition(TEAM, Done, InProgress).await.is_err());
        assert!(engine.validate_transition(TEAM, Archived, Todo).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_rule_overrides_are_both_kept() {
        let engine = slow_engine().await;

        let (first, second, read) = tokio::join!(
            engine.update_transition(TEAM, OWNER, Todo, Done, true),
            engine.update_transition(TEAM, OWNER, Review, Todo, true),
            engine.is_transition_allowed(TEAM, Todo, InProgress),
        );
        first.unwrap();
        second.unwrap();
        assert!(read.unwrap());

        assert!(engine.is_transition_allowed(TEAM, Todo, Done).await.unwrap());
        assert!(engine.is_transition_allowed(TEAM, Review, Todo).await.unwrap());
        assert!(engine.is_transition_allowed(TEAM, Done, Archived).await.unwrap());
    }

    #[tokio::test]
    async fn test_configuring_records_team_audit_entry() {
        let directory = Arc::new(InMemoryTeamDirectory::new());
        directory.create_team(TEAM, OWNER).await;
        let history = Arc::new(InMemoryHistoryStore::new());
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            directory.clone(),
            directory,
        )
        .with_audit_log(history.clone());

        engine
            .configure_workflow(TEAM, OWNER, finals([Done, Archived]))
            .await
            .unwrap();

        let entries = history.team_entries(TEAM).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "WORKFLOW_CONFIGURED");
        assert_eq!(entries[0].user_id, OWNER);
        assert_eq!(entries[0].additional_info["teamId"], json!(1));
        assert_eq!(
            entries[0].additional_info["finalStatuses"],
            json!(["DONE", "ARCHIVED"])
        );
        assert_eq!(entries[0].additional_info["allowReversion"], json!(false));
    }
}
