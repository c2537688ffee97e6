use super::Command;
use anyhow::Result;
use std::path::PathBuf;
use tasker::TaskerConfig;

pub struct ConfigShowCommand;

impl Command for ConfigShowCommand {
    async fn execute(&self) -> Result<()> {
        let config = tasker::config()?;
        println!("⚙️  Effective configuration");
        println!();
        print!("{}", toml::to_string_pretty(config)?);
        Ok(())
    }
}

pub struct ConfigInitCommand {
    pub path: PathBuf,
    pub force: bool,
}

impl ConfigInitCommand {
    pub fn new(force: bool) -> Self {
        Self {
            path: PathBuf::from("tasker.toml"),
            force,
        }
    }
}

impl Command for ConfigInitCommand {
    async fn execute(&self) -> Result<()> {
        if self.path.exists() && !self.force {
            println!("⚠️  {} already exists", self.path.display());
            println!("   Use --force to overwrite it");
            anyhow::bail!("refusing to overwrite {}", self.path.display());
        }

        TaskerConfig::default().save_to_file(&self.path)?;
        println!("✅ Wrote default configuration to {}", self.path.display());
        println!("   Override any value with TASKER_<SECTION>__<KEY>, e.g. TASKER_LOCKING__TTL_SECONDS=10");
        Ok(())
    }
}
