use super::Command;
use anyhow::{bail, ensure, Result};
use std::time::Duration;
use tasker::access::TeamRole;
use tasker::locking::{lock_owner_token, task_lock_name, LockManager};
use tasker::{
    mutation_metrics, InMemoryPipeline, MutationError, NewTask, ShutdownCoordinator, TaskId,
    TaskPatch, TaskStatus, TaskerConfig, TeamId, UserId, WorkflowSettings,
};

const TEAM: TeamId = TeamId(1);
const LEAD: UserId = UserId(1);
const ALICE: UserId = UserId(2);
const BOB: UserId = UserId(3);

/// Runs the four end-to-end scenarios. Expects a paused tokio clock so the lock expiry
/// scenario does not take half a minute.
pub struct DemoCommand {
    pub config: TaskerConfig,
}

impl Command for DemoCommand {
    async fn execute(&self) -> Result<()> {
        println!("🎬 Running task mutation scenarios (simulated clock)");
        println!();

        let pipeline = InMemoryPipeline::new(&self.config);
        seed_team(&pipeline).await;

        print!("1️⃣  Forward transition bumps the version... ");
        forward_transition(&pipeline).await?;
        println!("✅");

        print!("2️⃣  Final status blocks transitions... ");
        final_status_gate(&pipeline).await?;
        println!("✅");

        print!("3️⃣  Stale version is rejected... ");
        stale_write(&pipeline).await?;
        println!("✅");

        print!("4️⃣  Crashed holder's lock expires... ");
        lock_expiry(&pipeline, self.config.locking.ttl()).await?;
        println!("✅");

        pipeline.fanout.wait_idle().await;
        let stats = mutation_metrics().get_stats();
        println!();
        println!("📊 {} mutations committed, {} events published", stats.mutations_committed, stats.events_published);
        println!(
            "   {} stale writes, {} workflow violations, {} lock conflicts",
            stats.stale_writes, stats.workflow_violations, stats.lock_conflicts
        );
        println!("   {} history entries recorded", history_size(&pipeline).await?);

        ShutdownCoordinator::from_config(pipeline.fanout.clone(), &self.config.coordinator)
            .shutdown_all_services()
            .await?;
        println!();
        println!("🎯 All scenarios behaved as expected");
        Ok(())
    }
}

async fn seed_team(pipeline: &InMemoryPipeline) {
    pipeline.directory.create_team(TEAM, LEAD).await;
    pipeline.directory.define_role(TEAM, TeamRole::member("developer")).await;
    pipeline.directory.add_member(TEAM, ALICE, ["developer"]).await;
    pipeline.directory.add_member(TEAM, BOB, ["developer"]).await;
    pipeline.directory.add_labels(TEAM, ["bug", "feature"]).await;
}

async fn forward_transition(pipeline: &InMemoryPipeline) -> Result<()> {
    pipeline
        .workflow
        .configure_workflow(
            TEAM,
            LEAD,
            WorkflowSettings {
                final_statuses: [TaskStatus::Archived].into_iter().collect(),
                ..WorkflowSettings::default()
            },
        )
        .await?;

    let task = pipeline
        .coordinator
        .create_task(ALICE, NewTask::new(TEAM, "Wire up login form").with_labels(["feature"]))
        .await?;
    let updated = pipeline
        .coordinator
        .update_task(task.id, ALICE, TaskPatch::at_version(task.version).status(TaskStatus::InProgress))
        .await?;

    ensure!(updated.status == TaskStatus::InProgress, "status was not updated");
    ensure!(updated.version == 1, "expected version 1, got {}", updated.version);
    Ok(())
}

async fn final_status_gate(pipeline: &InMemoryPipeline) -> Result<()> {
    pipeline
        .workflow
        .mark_status_as_final(TEAM, LEAD, TaskStatus::Done)
        .await?;

    let task = pipeline
        .coordinator
        .create_task(BOB, NewTask::new(TEAM, "Ship release notes").with_status(TaskStatus::Done))
        .await?;
    ensure!(task.final_status, "task created in a final status should be flagged final");

    match pipeline
        .coordinator
        .update_task(task.id, BOB, TaskPatch::at_version(task.version).status(TaskStatus::Archived))
        .await
    {
        Err(MutationError::WorkflowViolation { .. }) => {}
        other => bail!("expected WorkflowViolation, got {:?}", other),
    }

    match pipeline
        .coordinator
        .revert_status(task.id, BOB, task.version, TaskStatus::InProgress, None)
        .await
    {
        Err(MutationError::Forbidden { .. }) => {}
        other => bail!("expected Forbidden for unauthorized reversion, got {:?}", other),
    }

    let reverted = pipeline
        .coordinator
        .revert_status(
            task.id,
            LEAD,
            task.version,
            TaskStatus::InProgress,
            Some("Notes need another pass".to_string()),
        )
        .await?;
    ensure!(!reverted.final_status, "reverted task should no longer be final");
    Ok(())
}

async fn stale_write(pipeline: &InMemoryPipeline) -> Result<()> {
    let mut task = pipeline
        .coordinator
        .create_task(ALICE, NewTask::new(TEAM, "Fix flaky test").with_labels(["bug"]))
        .await?;
    for round in 1..=3 {
        task = pipeline
            .coordinator
            .update_task(task.id, ALICE, TaskPatch::at_version(task.version).estimated_effort(Some(round)))
            .await?;
    }
    ensure!(task.version == 3, "expected version 3, got {}", task.version);

    let seen_by_alice = task.version;
    let by_bob = pipeline
        .coordinator
        .update_task(task.id, BOB, TaskPatch::at_version(task.version).assign(BOB))
        .await?;
    ensure!(by_bob.version == 4, "expected version 4, got {}", by_bob.version);

    match pipeline
        .coordinator
        .update_task(task.id, ALICE, TaskPatch::at_version(seen_by_alice).name("Fix flaky login test"))
        .await
    {
        Err(MutationError::StaleWriteConflict { current: 4, supplied: 3 }) => Ok(()),
        other => bail!("expected StaleWriteConflict, got {:?}", other),
    }
}

async fn lock_expiry(pipeline: &InMemoryPipeline, ttl: Duration) -> Result<()> {
    let lock_name = task_lock_name(TaskId(u64::MAX));
    let crashed = lock_owner_token(ALICE);
    ensure!(
        pipeline.locks.try_acquire(&lock_name, &crashed, ttl).await?,
        "first holder could not acquire"
    );
    // The holder never releases
    ensure!(
        !pipeline.locks.try_acquire(&lock_name, &lock_owner_token(BOB), ttl).await?,
        "lock was granted twice"
    );

    tokio::time::sleep(ttl + Duration::from_secs(1)).await;

    let successor = lock_owner_token(BOB);
    ensure!(
        pipeline.locks.try_acquire(&lock_name, &successor, ttl).await?,
        "expired lock was not taken over"
    );
    pipeline.locks.release(&lock_name, &successor).await?;
    Ok(())
}

async fn history_size(pipeline: &InMemoryPipeline) -> Result<usize> {
    use tasker::events::HistoryStore;

    let tasks = pipeline.coordinator.list_team_tasks(TEAM, LEAD).await?;
    let mut total = 0;
    for task in tasks.iter() {
        total += pipeline.history.entries_for(task.id).await?.len();
    }
    Ok(total)
}
