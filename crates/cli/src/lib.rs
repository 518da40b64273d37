pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "supportline",
    about = "Supportline operator CLI",
    long_about = "Inspect configuration, check provider readiness, and run single support turns.",
    after_help = "Examples:\n  supportline doctor --json\n  supportline config\n  supportline chat --offline \"show me monitors\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model credentials, and capability provider reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one support turn and print the assembled reply as JSON")]
    Chat {
        #[arg(help = "Customer message")]
        message: String,
        #[arg(long, help = "Customer email for verification")]
        email: Option<String>,
        #[arg(long, help = "Customer PIN for verification")]
        pin: Option<String>,
        #[arg(long, help = "Already verified customer id")]
        customer_id: Option<String>,
        #[arg(long, help = "Classify with keyword rules instead of the language model")]
        offline: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { message, email, pin, customer_id, offline } => {
            commands::chat::run(commands::chat::ChatArgs {
                message,
                email,
                pin,
                customer_id,
                offline,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
