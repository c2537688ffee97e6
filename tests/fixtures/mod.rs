/// Shared team setup for pipeline integration tests
use tasker::access::TeamRole;
use tasker::{InMemoryPipeline, Permission, TaskerConfig, TeamId, UserId};

pub const TEAM: TeamId = TeamId(10);
pub const LEAD: UserId = UserId(1);
pub const ALICE: UserId = UserId(2);
pub const BOB: UserId = UserId(3);
/// Member holding the explicit reversion permission
pub const REVIEWER: UserId = UserId(4);

/// Pipeline with one team: LEAD owns it, ALICE and BOB are developers, REVIEWER may revert
pub async fn seeded_pipeline() -> InMemoryPipeline {
    seed(InMemoryPipeline::new(&TaskerConfig::default())).await
}

pub async fn seed(pipeline: InMemoryPipeline) -> InMemoryPipeline {
    let directory = &pipeline.directory;
    directory.create_team(TEAM, LEAD).await;
    directory.define_role(TEAM, TeamRole::member("developer")).await;
    directory
        .define_role(
            TEAM,
            TeamRole::new(
                "reviewer",
                [Permission::ViewTask, Permission::EditTask, Permission::RevertStatus],
            ),
        )
        .await;
    directory.add_member(TEAM, ALICE, ["developer"]).await;
    directory.add_member(TEAM, BOB, ["developer"]).await;
    directory.add_member(TEAM, REVIEWER, ["reviewer"]).await;
    directory.add_labels(TEAM, ["bug", "feature", "docs"]).await;
    pipeline
}
