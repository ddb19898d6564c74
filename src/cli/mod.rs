pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "custodian")]
#[command(about = "Custodian CLI - validate and inspect ownership access declarations")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Load and validate an access declarations file")]
    Validate(commands::validate::ValidateArgs),

    #[command(about = "Resolve one call site for a caller without touching a database")]
    Explain(commands::explain::ExplainArgs),

    #[command(about = "Issue a signed token for a caller")]
    Token(commands::token::TokenArgs),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Validate(args) => commands::validate::handle(args, output_format),
        Commands::Explain(args) => commands::explain::handle(args, output_format),
        Commands::Token(args) => commands::token::handle(args, output_format),
    }
}
