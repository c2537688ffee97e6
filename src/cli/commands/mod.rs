use anyhow::Result;

pub mod config;
pub mod demo;
pub mod transitions;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub async fn show_how_to_get_started() -> Result<()> {
    println!("🗂️  Tasker - Concurrency-safe task mutation pipeline");
    println!();
    println!("To get started:");
    println!("  🎬 tasker demo           # Run the end-to-end scenarios");
    println!("  🔀 tasker transitions    # Show the default status transitions");
    println!();
    println!("Configuration:");
    println!("  ⚙️  tasker config show    # Effective configuration");
    println!("  📝 tasker config init    # Write tasker.toml with defaults");
    println!();
    println!("💡 Start with 'tasker demo' to see locking, versioning and workflow rules in action!");
    Ok(())
}
