use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flowbot")]
#[command(author, version, about = "Telegram bot with menus, an item catalog, AI chat mode and scheduled broadcasts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run,

    /// Apply database migrations and exit
    Migrate,

    /// Validate settings and print the non-secret ones
    CheckConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The subcommand to run; `run` when none is given.
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
