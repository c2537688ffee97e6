use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser)]
#[command(name = "tasker")]
#[command(version)]
#[command(about = "Concurrency-safe task mutation pipeline")]
#[command(long_about = "Tasker serializes edits to shared tasks with a distributed lock and optimistic \
                       versioning, enforces per-team status workflows, and fans committed changes out to \
                       history, notification and search subscribers. Try 'tasker demo' to watch it work.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the end-to-end mutation scenarios against an in-memory pipeline
    Demo {
        /// Emit structured logs while the scenarios run
        #[arg(long, short = 'v', help = "Show pipeline logs while running")]
        verbose: bool,
    },
    /// Print the default status transition matrix seeded for new teams
    Transitions,
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration (defaults, tasker.toml, .tasker-rc, TASKER_* env)
    Show,
    /// Write a tasker.toml with default settings
    Init {
        /// Overwrite an existing tasker.toml
        #[arg(long, help = "Overwrite an existing tasker.toml")]
        force: bool,
    },
}
