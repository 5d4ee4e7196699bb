use async_trait::async_trait;
use clap::Args;
use serde_json::json;

use crate::{
    cli::{
        Command, CommandContext, CommandResult, OutputFormat,
        formatting::{format_header, format_interface},
    },
    dbus::{ObjectAddress, RemoteObject},
};

/// Lists the interfaces, members and children of an object.
#[derive(Debug, Clone, Args)]
pub struct IntrospectCommand {
    /// Bus name, e.g. org.freedesktop.UDisks2
    pub destination: String,
    /// Object path, e.g. /org/freedesktop/UDisks2/Manager
    pub path: String,
}

#[async_trait]
impl Command for IntrospectCommand {
    async fn execute(&self, context: &CommandContext) -> CommandResult {
        let address = ObjectAddress::new(&self.destination, &self.path);
        let object = RemoteObject::connect(
            std::sync::Arc::clone(&context.transport),
            address,
            &context.policy,
        )
        .await?;
        let description = object.description();

        let output = match context.output {
            OutputFormat::Json => {
                let interfaces: serde_json::Map<_, _> = description
                    .interfaces
                    .values()
                    .map(|table| {
                        let methods: serde_json::Map<_, _> = table
                            .methods
                            .iter()
                            .map(|(name, info)| {
                                (name.clone(), json!({ "in": info.inputs, "out": info.outputs }))
                            })
                            .collect();
                        let properties: serde_json::Map<_, _> = table
                            .properties
                            .iter()
                            .map(|(name, info)| {
                                (
                                    name.clone(),
                                    json!({
                                        "type": info.signature,
                                        "readable": info.access.readable(),
                                        "writable": info.access.writable(),
                                    }),
                                )
                            })
                            .collect();
                        (
                            table.name.clone(),
                            json!({
                                "methods": methods,
                                "properties": properties,
                                "signals": table.signals,
                            }),
                        )
                    })
                    .collect();

                serde_json::to_string_pretty(&json!({
                    "destination": self.destination,
                    "path": self.path,
                    "interfaces": interfaces,
                    "children": object.child_paths(),
                }))?
            }
            OutputFormat::Text => {
                let mut output = format_header(&object.address().to_string());
                for table in description.interfaces.values() {
                    output.push_str("\n\n");
                    output.push_str(&format_interface(table));
                }
                let children = object.child_paths();
                if !children.is_empty() {
                    output.push_str("\n\nChildren:");
                    for child in children {
                        output.push_str(&format!("\n  {child}"));
                    }
                }
                output
            }
        };

        object.disconnect().await;
        Ok(output)
    }
}
