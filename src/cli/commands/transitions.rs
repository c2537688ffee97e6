use super::Command;
use anyhow::Result;
use tasker::workflows::TransitionMatrix;
use tasker::TaskStatus;

pub struct TransitionsCommand;

impl Command for TransitionsCommand {
    async fn execute(&self) -> Result<()> {
        let matrix = TransitionMatrix::default();

        println!("🔀 Default status transitions for new teams");
        println!();
        for from in TaskStatus::ALL {
            let targets: Vec<&str> = matrix
                .allowed_targets(from)
                .into_iter()
                .map(TaskStatus::as_str)
                .collect();
            if targets.is_empty() {
                println!("  {:<12} → (none)", from.as_str());
            } else {
                println!("  {:<12} → {}", from.as_str(), targets.join(", "));
            }
        }
        println!();
        println!("ℹ️  The matrix is advisory. Statuses marked final block every forward transition;");
        println!("   leaving a final status requires a status reversion.");
        Ok(())
    }
}
