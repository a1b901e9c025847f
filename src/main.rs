use anyhow::Result;
use clap::Parser;

use patchwork::agents::StrategyKind;
use patchwork::cli::commands::{
    ApplyCommand, Command, GetCommand, HistoryCommand, PinCommand, PutCommand, RollbackCommand,
    RunCommand, ShowCommand, StatusCommand,
};
use patchwork::cli::{Cli, Commands};
use patchwork::config::PatchworkConfig;
use patchwork::coordinator::Task;
use patchwork::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    PatchworkConfig::load_env_file()?;
    let config = PatchworkConfig::load(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Status => StatusCommand::new(config).execute().await,
            Commands::History { task } => HistoryCommand::new(config, task).execute().await,
            Commands::Show { patch_id } => ShowCommand::new(config, patch_id).execute().await,
            Commands::Apply { patch_id, target } => {
                ApplyCommand::new(config, patch_id, target).execute().await
            }
            Commands::Rollback { patch_id, target } => {
                RollbackCommand::new(config, patch_id, target).execute().await
            }
            Commands::Run {
                task_id,
                description,
                files,
                program,
                args,
                validator,
                strategy,
            } => {
                let task = Task::new(task_id, description).with_files(files);
                let strategy: StrategyKind = strategy.parse()?;
                RunCommand::new(config, task, program)
                    .with_args(args)
                    .with_validator(validator)
                    .with_strategy(strategy)
                    .execute()
                    .await
            }
            Commands::Put { file } => PutCommand::new(config, file).execute().await,
            Commands::Get { address, output } => {
                GetCommand::new(config, address, output).execute().await
            }
            Commands::Pin { address } => PinCommand::new(config, address).execute().await,
        }
    })
}
