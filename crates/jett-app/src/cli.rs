use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jett", about = "Jett: a voice assistant for your homelab")]
pub struct Cli {
    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the voice session loop
    Run {
        /// Read utterances from stdin and print responses instead of using audio
        #[arg(long)]
        text: bool,
    },

    /// Ask a single question and print the streamed answer
    Ask {
        text: String,
    },

    /// Request a container operation through the governor
    Exec {
        /// start, stop, restart, logs or status
        #[arg(long)]
        kind: String,
        #[arg(long)]
        target: String,
        /// Defaults to the configured session subject
        #[arg(long)]
        subject: Option<String>,
    },

    /// Show routing for an utterance without calling any backend
    Classify {
        text: String,
        /// Print the full explanation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the audit log
    Audit {
        #[arg(long, default_value_t = 20)]
        recent: usize,
        /// Re-check the hash chain instead of listing records
        #[arg(long)]
        verify: bool,
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Ask { .. } => "ask",
            Commands::Exec { .. } => "exec",
            Commands::Classify { .. } => "classify",
            Commands::Audit { .. } => "audit",
            Commands::CheckConfig => "check-config",
        }
    }
}
