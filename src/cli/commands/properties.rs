use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;

use crate::{
    cli::{
        Command, CommandContext, CommandResult, OutputFormat,
        formatting::{format_header, format_properties},
    },
    dbus::{DbusError, ObjectAddress, RemoteObject, Value},
};

/// Prints every property of one interface.
#[derive(Debug, Clone, Args)]
pub struct PropertiesCommand {
    /// Bus name
    pub destination: String,
    /// Object path
    pub path: String,
    /// Interface whose properties are read
    pub interface: String,
}

#[async_trait]
impl Command for PropertiesCommand {
    async fn execute(&self, context: &CommandContext) -> CommandResult {
        let address = ObjectAddress::new(&self.destination, &self.path);
        let object =
            RemoteObject::connect(Arc::clone(&context.transport), address, &context.policy).await?;

        if !object.has_interface(&self.interface) {
            object.disconnect().await;
            return Err(DbusError::Interface(format!(
                "{} does not implement {}",
                object.address(),
                self.interface
            ))
            .into());
        }

        let properties = object.get_all(&self.interface).await;
        object.disconnect().await;
        let properties = properties?;

        match context.output {
            OutputFormat::Json => {
                let json: serde_json::Map<_, _> = properties
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::to_json(value)))
                    .collect();
                Ok(serde_json::to_string_pretty(&json)?)
            }
            OutputFormat::Text => Ok(format!(
                "{}\n{}",
                format_header(&self.interface),
                format_properties(&properties)
            )),
        }
    }
}
