use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;

use crate::{
    cli::{CliError, Command, CommandContext, CommandResult, OutputFormat, formatting::format_value},
    dbus::{ObjectAddress, RemoteObject, Value},
};

/// Calls a method and prints the reply.
///
/// Arguments are strings unless prefixed with a type code: `u:5`, `i:-1`,
/// `t:10`, `x:-10`, `b:true`, `d:0.5`, `o:/org/example`, `s:text`.
#[derive(Debug, Clone, Args)]
pub struct CallCommand {
    /// Bus name
    pub destination: String,
    /// Object path
    pub path: String,
    /// Interface declaring the method
    pub interface: String,
    /// Method name
    pub method: String,
    /// Method arguments
    pub args: Vec<String>,
}

/// Parses one command-line argument into a bus value.
///
/// # Errors
/// Returns `CliError::InvalidArguments` if a typed argument does not parse.
pub fn parse_arg(arg: &str) -> Result<Value, CliError> {
    let Some((code, raw)) = arg.split_once(':') else {
        return Ok(Value::from(arg));
    };

    let invalid = |kind: &str| CliError::InvalidArguments(format!("'{raw}' is not a valid {kind}"));
    let value = match code {
        "s" => Value::from(raw),
        "o" => Value::ObjectPath(raw.to_owned()),
        "b" => Value::Bool(raw.parse().map_err(|_| invalid("boolean"))?),
        "u" => Value::U32(raw.parse().map_err(|_| invalid("u32"))?),
        "i" => Value::I32(raw.parse().map_err(|_| invalid("i32"))?),
        "t" => Value::U64(raw.parse().map_err(|_| invalid("u64"))?),
        "x" => Value::I64(raw.parse().map_err(|_| invalid("i64"))?),
        "d" => Value::F64(raw.parse().map_err(|_| invalid("double"))?),
        _ => Value::from(arg),
    };
    Ok(value)
}

#[async_trait]
impl Command for CallCommand {
    async fn execute(&self, context: &CommandContext) -> CommandResult {
        let args = self
            .args
            .iter()
            .map(|arg| parse_arg(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let address = ObjectAddress::new(&self.destination, &self.path);
        let object =
            RemoteObject::connect(Arc::clone(&context.transport), address, &context.policy).await?;
        let reply = match object.interface(&self.interface) {
            Ok(dispatcher) => dispatcher.call(&self.method, args).await,
            Err(err) => Err(err),
        };
        object.disconnect().await;
        let reply = reply?;

        match context.output {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(
                &reply.iter().map(Value::to_json).collect::<Vec<_>>(),
            )?),
            OutputFormat::Text => Ok(reply
                .iter()
                .map(format_value)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[test]
    fn untyped_arguments_are_strings() {
        assert_eq!(parse_arg("hello").unwrap(), Value::from("hello"));
        assert_eq!(parse_arg("q:odd").unwrap(), Value::from("q:odd"));
    }

    #[test]
    fn typed_arguments_parse() {
        assert_eq!(parse_arg("u:5").unwrap(), Value::U32(5));
        assert_eq!(parse_arg("b:true").unwrap(), Value::Bool(true));
        assert_eq!(
            parse_arg("o:/org/example").unwrap(),
            Value::ObjectPath(String::from("/org/example"))
        );
    }

    #[test]
    fn bad_typed_argument_is_rejected() {
        assert!(matches!(parse_arg("u:-1"), Err(CliError::InvalidArguments(_))));
    }
}
