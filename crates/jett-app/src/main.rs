mod cli;
mod commands;
mod setup;

use anyhow::Result;
use clap::Parser;
use jett_core::lifecycle;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    lifecycle::init_tracing();

    let cli = Cli::parse();
    let config = setup::load_config(cli.config.as_deref())?;
    lifecycle::log_startup(cli.command.name());

    let result = match cli.command {
        Commands::Run { text } => commands::run(&config, text).await,
        Commands::Ask { text } => commands::ask(&config, &text).await,
        Commands::Exec {
            kind,
            target,
            subject,
        } => commands::exec(&config, &kind, target, subject).await,
        Commands::Classify { text, json } => commands::classify(&config, &text, json),
        Commands::Audit {
            recent,
            verify,
            json,
        } => commands::audit(&config, recent, verify, json),
        Commands::CheckConfig => commands::check_config(&config),
    };

    lifecycle::log_shutdown();
    result
}
