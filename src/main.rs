use anyhow::Result;
use clap::Parser;

mod cli;

use cli::commands::{
    config::{ConfigInitCommand, ConfigShowCommand},
    demo::DemoCommand,
    show_how_to_get_started,
    transitions::TransitionsCommand,
    Command,
};
use cli::{Cli, Commands, ConfigAction};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => tokio::runtime::Runtime::new()?.block_on(show_how_to_get_started()),
        Some(Commands::Demo { verbose }) => {
            let config = tasker::config()?.clone();
            if verbose {
                tasker::init_telemetry(&config.observability)?;
            }
            // Simulated clock: timers complete as soon as every task is idle
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()?;
            let result = runtime.block_on(DemoCommand { config }.execute());
            if verbose {
                tasker::shutdown_telemetry();
            }
            result
        }
        Some(Commands::Transitions) => {
            tokio::runtime::Runtime::new()?.block_on(TransitionsCommand.execute())
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => tokio::runtime::Runtime::new()?.block_on(ConfigShowCommand.execute()),
            ConfigAction::Init { force } => {
                tokio::runtime::Runtime::new()?.block_on(ConfigInitCommand::new(force).execute())
            }
        },
    }
}
