//! Command-line interface for inspecting bus objects.
//!
//! Each subcommand connects to one remote object through the same framework
//! that service wrappers use, so the tool doubles as a check that an object
//! introspects and dispatches the way a wrapper expects.

mod commands;
pub mod formatting;
mod types;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{CallCommand, IntrospectCommand, PropertiesCommand, WaitCommand, parse_arg};
pub use types::{CliError, Command, CommandContext, CommandResult, OutputFormat};

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "supervisor-bus")]
#[command(about = "Inspect and drive objects on the system or session bus")]
pub struct Cli {
    /// Use the session bus instead of the configured one
    #[arg(long, global = true)]
    pub session: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/supervisor-bus/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Also write logs to $XDG_STATE_HOME/supervisor-bus/logs
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List interfaces, members and children of an object
    Introspect(IntrospectCommand),
    /// Print every property of an interface
    Properties(PropertiesCommand),
    /// Call a method
    Call(CallCommand),
    /// Wait for one signal
    Wait(WaitCommand),
}

impl Cli {
    /// Output format selected by the flags.
    pub fn output(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

impl Commands {
    /// Runs the selected subcommand.
    ///
    /// # Errors
    /// Returns the subcommand's error.
    pub async fn run(&self, context: &CommandContext) -> CommandResult {
        match self {
            Commands::Introspect(command) => command.execute(context).await,
            Commands::Properties(command) => command.execute(context).await,
            Commands::Call(command) => command.execute(context).await,
            Commands::Wait(command) => command.execute(context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[test]
    fn parses_call_with_global_flags() {
        let cli = Cli::try_parse_from([
            "supervisor-bus",
            "call",
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Do",
            "u:1",
            "--json",
            "--session",
        ])
        .unwrap();

        assert!(cli.session);
        assert!(!cli.log_file);
        assert_eq!(cli.output(), OutputFormat::Json);
        let Commands::Call(call) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(call.method, "Do");
        assert_eq!(call.args, vec![String::from("u:1")]);
    }

    #[test]
    fn wait_has_default_timeout() {
        let cli = Cli::try_parse_from([
            "supervisor-bus",
            "wait",
            "org.example",
            "/",
            "org.example.Iface",
            "Done",
        ])
        .unwrap();

        let Commands::Wait(wait) = cli.command else {
            panic!("expected wait");
        };
        assert_eq!(wait.timeout_secs, 30);
        assert!(!cli.log_file);
    }
}
