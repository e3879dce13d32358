//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, OutputFlags};
use crate::commands;

/// Provision servers and deploy cataloged apps onto k3s
#[derive(Parser)]
#[command(
    name = "keel",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy and manage applications
    #[command(subcommand, name = "app")]
    App(commands::apps::AppCommand),

    /// Provision and manage servers
    #[command(subcommand)]
    Vps(commands::vps::VpsCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),

    /// Show version
    Version,
}

impl Cli {
    /// Log filter implied by `-v` when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "keel_cli=warn",
            1 => "keel_cli=debug",
            _ => "keel_cli=trace",
        }
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let flags = AppFlags {
            output: OutputFlags {
                no_color: self.no_color,
                quiet: self.quiet,
                json: self.json,
            },
            behaviour: BehaviourFlags { yes: self.yes },
        };
        let app = AppContext::new(&flags)?;
        match self.command {
            Command::App(cmd) => commands::apps::run(&app, cmd).await,
            Command::Vps(cmd) => commands::vps::run(&app, cmd).await,
            Command::Config(cmd) => commands::config::run(&app, cmd),
            Command::Version => commands::version::run(&app),
        }
    }
}
