use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Args;

use crate::{
    cli::{CliError, Command, CommandContext, CommandResult, OutputFormat, formatting::format_value},
    dbus::{ObjectAddress, RemoteObject, Value},
};

/// Blocks until one signal arrives and prints its body.
#[derive(Debug, Clone, Args)]
pub struct WaitCommand {
    /// Bus name
    pub destination: String,
    /// Object path
    pub path: String,
    /// Interface declaring the signal
    pub interface: String,
    /// Signal name
    pub member: String,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[async_trait]
impl Command for WaitCommand {
    async fn execute(&self, context: &CommandContext) -> CommandResult {
        let address = ObjectAddress::new(&self.destination, &self.path);
        let object =
            RemoteObject::connect(Arc::clone(&context.transport), address, &context.policy).await?;

        let mut wait = match object.interface(&self.interface) {
            Ok(dispatcher) => dispatcher.wait_for(&self.member).await,
            Err(err) => Err(err),
        }?;

        let body = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            wait.wait_for_signal(),
        )
        .await;
        wait.close().await?;
        object.disconnect().await;

        let body = body.map_err(|_| {
            CliError::Timeout(format!(
                "no {}.{} within {}s",
                self.interface, self.member, self.timeout_secs
            ))
        })??;

        match context.output {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(
                &body.iter().map(Value::to_json).collect::<Vec<_>>(),
            )?),
            OutputFormat::Text => Ok(body
                .iter()
                .map(format_value)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}
