use async_trait::async_trait;
use thiserror::Error;

use crate::{
    config::ConfigError,
    dbus::{DbusError, IntrospectPolicy, SharedTransport},
};

/// Errors that can occur during CLI command execution.
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid arguments were provided to a command.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The bus rejected or failed an operation.
    #[error("Bus error: {0}")]
    Bus(#[from] DbusError),

    /// The configuration file could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A signal wait ran out of time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Output could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Type alias for command execution results.
///
/// Commands return the text to print on success.
pub type CommandResult = Result<String, CliError>;

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable, colored text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Everything a command needs to reach the bus.
pub struct CommandContext {
    /// Transport to the selected bus.
    pub transport: SharedTransport,
    /// Introspection retry policy from the configuration.
    pub policy: IntrospectPolicy,
    /// Output rendering.
    pub output: OutputFormat,
}

/// Trait implemented by every subcommand.
#[async_trait]
pub trait Command: Send + Sync {
    /// Executes the command.
    ///
    /// # Errors
    ///
    /// Returns `CliError` for invalid arguments, bus failures or timeouts.
    async fn execute(&self, context: &CommandContext) -> CommandResult;
}
