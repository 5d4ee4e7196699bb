use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use zbus::{
    Connection, DBusError as _, MessageStream,
    fdo::DBusProxy,
    message::{Body, Type as MessageType},
    zvariant::{
        self, Array, Dict, ObjectPath, Signature as ZSignature, StructureBuilder,
        Value as ZValue,
    },
};

use super::{
    INTROSPECTABLE_INTERFACE, MatchRule, ObjectAddress, PROPERTIES_INTERFACE, SignalEvent,
    SignalMessage, Transport,
};
use crate::dbus::{DbusError, PropertyMap, Value, WireError, error::names};

/// [`Transport`] over a shared `zbus` connection.
#[derive(Debug, Clone)]
pub struct ZbusTransport {
    connection: Connection,
    call_timeout: Duration,
    bus: OnceCell<DBusProxy<'static>>,
}

impl ZbusTransport {
    /// Connects to the system bus.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the bus cannot be reached.
    pub async fn system(call_timeout: Duration) -> Result<Self, DbusError> {
        let connection = Connection::system()
            .await
            .map_err(|err| DbusError::NotConnected(format!("system bus: {err}")))?;
        Ok(Self::from_connection(connection, call_timeout))
    }

    /// Connects to the session bus.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the bus cannot be reached.
    pub async fn session(call_timeout: Duration) -> Result<Self, DbusError> {
        let connection = Connection::session()
            .await
            .map_err(|err| DbusError::NotConnected(format!("session bus: {err}")))?;
        Ok(Self::from_connection(connection, call_timeout))
    }

    /// Wraps an existing connection.
    pub fn from_connection(connection: Connection, call_timeout: Duration) -> Self {
        Self {
            connection,
            call_timeout,
            bus: OnceCell::new(),
        }
    }

    async fn bus(&self) -> Result<&DBusProxy<'static>, WireError> {
        self.bus
            .get_or_try_init(|| DBusProxy::new(&self.connection))
            .await
            .map_err(wire_error)
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T, WireError>
    where
        F: Future<Output = Result<T, WireError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(WireError::new(
                names::NO_REPLY,
                format!("no reply within {:?}", self.call_timeout),
            )),
        }
    }

    async fn raw_call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, WireError> {
        let call = async {
            let reply = if args.is_empty() {
                self.connection
                    .call_method(Some(destination), path, Some(interface), method, &())
                    .await
            } else {
                let body = encode_body(args)?;
                self.connection
                    .call_method(Some(destination), path, Some(interface), method, &body)
                    .await
            }
            .map_err(wire_error)?;

            decode_body(&reply.body()).map_err(wire_error)
        };

        self.with_timeout(call).await
    }
}

#[async_trait]
impl Transport for ZbusTransport {
    #[instrument(skip(self), fields(%address))]
    async fn introspect(&self, address: &ObjectAddress) -> Result<String, WireError> {
        let reply = self
            .raw_call(
                &address.destination,
                &address.path,
                INTROSPECTABLE_INTERFACE,
                "Introspect",
                &[],
            )
            .await?;

        reply
            .first()
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| WireError::new(names::FAILED, "introspection reply carried no XML"))
    }

    async fn call_method(
        &self,
        address: &ObjectAddress,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, WireError> {
        debug!("Calling {interface}.{method} on {address}");
        self.raw_call(&address.destination, &address.path, interface, method, &args)
            .await
    }

    async fn get_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
    ) -> Result<Value, WireError> {
        let reply = self
            .raw_call(
                &address.destination,
                &address.path,
                PROPERTIES_INTERFACE,
                "Get",
                &[Value::from(interface), Value::from(property)],
            )
            .await?;

        match reply.into_iter().next() {
            Some(Value::Variant(inner)) => Ok(*inner),
            Some(other) => Ok(other),
            None => Err(WireError::new(names::FAILED, "empty reply to Get")),
        }
    }

    async fn set_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
        value: Value,
    ) -> Result<(), WireError> {
        self.raw_call(
            &address.destination,
            &address.path,
            PROPERTIES_INTERFACE,
            "Set",
            &[
                Value::from(interface),
                Value::from(property),
                Value::Variant(Box::new(value)),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn get_all_properties(
        &self,
        address: &ObjectAddress,
        interface: &str,
    ) -> Result<PropertyMap, WireError> {
        let reply = self
            .raw_call(
                &address.destination,
                &address.path,
                PROPERTIES_INTERFACE,
                "GetAll",
                &[Value::from(interface)],
            )
            .await?;

        reply
            .into_iter()
            .next()
            .and_then(Value::into_property_map)
            .ok_or_else(|| WireError::new(names::FAILED, "GetAll reply was not a{sv}"))
    }

    async fn add_match(&self, rule: &MatchRule) -> Result<(), WireError> {
        debug!("AddMatch {rule}");
        let zbus_rule = zbus_rule(rule)?;
        let bus = self.bus().await?;
        self.with_timeout(async { bus.add_match_rule(zbus_rule).await.map_err(fdo_error) })
            .await
    }

    async fn remove_match(&self, rule: &MatchRule) -> Result<(), WireError> {
        debug!("RemoveMatch {rule}");
        let zbus_rule = zbus_rule(rule)?;
        let bus = self.bus().await?;
        self.with_timeout(async { bus.remove_match_rule(zbus_rule).await.map_err(fdo_error) })
            .await
    }

    fn signals(&self) -> BoxStream<'static, SignalEvent> {
        MessageStream::from(self.connection.clone())
            .filter_map(|message| async move {
                match message {
                    Ok(message) => signal_message(&message).map(SignalEvent::Message),
                    Err(err) => {
                        warn!("Signal stream dropped a message: {err}");
                        Some(SignalEvent::Lagged(0))
                    }
                }
            })
            .boxed()
    }
}

fn zbus_rule(rule: &MatchRule) -> Result<zbus::MatchRule<'static>, WireError> {
    let built = zbus::MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(rule.sender.clone())
        .and_then(|builder| builder.path(rule.path.clone()))
        .and_then(|builder| builder.interface(rule.interface.clone()))
        .and_then(|builder| builder.member(rule.member.clone()))
        .map_err(invalid_args)?
        .build();
    Ok(built)
}

fn signal_message(message: &zbus::Message) -> Option<SignalMessage> {
    let header = message.header();
    if header.message_type() != MessageType::Signal {
        return None;
    }

    Some(SignalMessage {
        sender: header.sender().map(|sender| sender.to_string()),
        path: header.path()?.to_string(),
        interface: header.interface()?.to_string(),
        member: header.member()?.to_string(),
        body: decode_body(&message.body()).ok()?,
    })
}

fn wire_error(err: zbus::Error) -> WireError {
    match err {
        zbus::Error::MethodError(name, detail, _) => {
            WireError::new(name.as_str(), detail.unwrap_or_default())
        }
        zbus::Error::FDO(fdo) => fdo_error(*fdo),
        zbus::Error::InputOutput(io) => WireError::new(names::DISCONNECTED, io.to_string()),
        other => WireError::new(names::FAILED, other.to_string()),
    }
}

fn fdo_error(err: zbus::fdo::Error) -> WireError {
    match err {
        zbus::fdo::Error::ZBus(inner) => wire_error(inner),
        other => WireError::new(
            other.name().as_str(),
            other.description().unwrap_or_default(),
        ),
    }
}

fn invalid_args(err: impl std::fmt::Display) -> WireError {
    WireError::new(names::INVALID_ARGS, err.to_string())
}

fn decode_body(body: &Body) -> Result<Vec<Value>, zbus::Error> {
    if body.signature().to_string().is_empty() {
        return Ok(Vec::new());
    }

    let structure: zvariant::Structure<'_> = body.deserialize()?;
    Ok(structure.fields().iter().map(from_zvariant).collect())
}

fn encode_body(args: &[Value]) -> Result<zvariant::Structure<'static>, WireError> {
    let mut builder = StructureBuilder::new();
    for arg in args {
        builder = builder.append_field(to_zvariant(arg)?);
    }
    builder.build().map_err(invalid_args)
}

/// Splits a container signature into the signatures of its parts.
fn container_parts(signature: &str) -> (String, String) {
    if let Some(inner) = signature
        .strip_prefix("a{")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        let (key, value) = inner.split_at(inner.len().min(1));
        return (key.to_owned(), value.to_owned());
    }

    let element = signature.strip_prefix('a').unwrap_or(signature);
    (element.to_owned(), String::new())
}

fn from_zvariant(value: &ZValue<'_>) -> Value {
    match value {
        ZValue::U8(v) => Value::Byte(*v),
        ZValue::Bool(v) => Value::Bool(*v),
        ZValue::I16(v) => Value::I16(*v),
        ZValue::U16(v) => Value::U16(*v),
        ZValue::I32(v) => Value::I32(*v),
        ZValue::U32(v) => Value::U32(*v),
        ZValue::I64(v) => Value::I64(*v),
        ZValue::U64(v) => Value::U64(*v),
        ZValue::F64(v) => Value::F64(*v),
        ZValue::Str(s) => Value::Str(s.to_string()),
        ZValue::Signature(s) => Value::Signature(s.to_string()),
        ZValue::ObjectPath(p) => Value::ObjectPath(p.to_string()),
        ZValue::Value(inner) => Value::Variant(Box::new(from_zvariant(inner))),
        ZValue::Array(array) => {
            let (element, _) = container_parts(&value.value_signature().to_string());
            Value::Array {
                element,
                items: array.iter().map(from_zvariant).collect(),
            }
        }
        ZValue::Dict(dict) => {
            let (key, value_signature) = container_parts(&value.value_signature().to_string());
            Value::Dict {
                key,
                value: value_signature,
                entries: dict
                    .iter()
                    .map(|(k, v)| (from_zvariant(k), from_zvariant(v)))
                    .collect(),
            }
        }
        ZValue::Structure(structure) => {
            Value::Struct(structure.fields().iter().map(from_zvariant).collect())
        }
        other => Value::Str(format!("{other:?}")),
    }
}

fn to_zvariant(value: &Value) -> Result<ZValue<'static>, WireError> {
    let converted = match value {
        Value::Bool(v) => ZValue::Bool(*v),
        Value::Byte(v) => ZValue::U8(*v),
        Value::I16(v) => ZValue::I16(*v),
        Value::U16(v) => ZValue::U16(*v),
        Value::I32(v) => ZValue::I32(*v),
        Value::U32(v) => ZValue::U32(*v),
        Value::I64(v) => ZValue::I64(*v),
        Value::U64(v) => ZValue::U64(*v),
        Value::F64(v) => ZValue::F64(*v),
        Value::Str(s) => ZValue::from(s.clone()),
        Value::ObjectPath(p) => {
            ZValue::ObjectPath(ObjectPath::try_from(p.clone()).map_err(invalid_args)?)
        }
        Value::Signature(s) => ZValue::Signature(s.parse::<ZSignature>().map_err(invalid_args)?),
        Value::Variant(inner) => ZValue::Value(Box::new(to_zvariant(inner)?)),
        Value::Array { element, items } => {
            let signature = element.parse::<ZSignature>().map_err(invalid_args)?;
            let mut array = Array::new(&signature);
            for item in items {
                array.append(to_zvariant(item)?).map_err(invalid_args)?;
            }
            ZValue::Array(array)
        }
        Value::Dict {
            key,
            value: value_signature,
            entries,
        } => {
            let key_signature = key.parse::<ZSignature>().map_err(invalid_args)?;
            let value_signature = value_signature.parse::<ZSignature>().map_err(invalid_args)?;
            let mut dict = Dict::new(&key_signature, &value_signature);
            for (k, v) in entries {
                dict.append(to_zvariant(k)?, to_zvariant(v)?)
                    .map_err(invalid_args)?;
            }
            ZValue::Dict(dict)
        }
        Value::Struct(fields) => {
            let mut builder = StructureBuilder::new();
            for field in fields {
                builder = builder.append_field(to_zvariant(field)?);
            }
            ZValue::Structure(builder.build().map_err(invalid_args)?)
        }
    };

    Ok(converted)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn container_signatures_are_split() {
        assert_eq!(
            container_parts("a{sa{sv}}"),
            (String::from("s"), String::from("a{sv}"))
        );
        assert_eq!(container_parts("aay"), (String::from("ay"), String::new()));
    }

    #[test]
    fn method_errors_keep_their_name() {
        let err = fdo_error(zbus::fdo::Error::UnknownMethod(String::from("nope")));
        assert_eq!(err.name, names::UNKNOWN_METHOD);
        assert_eq!(
            DbusError::from(err),
            DbusError::InterfaceMethod(String::from("nope"))
        );
    }

    #[test]
    fn match_rule_is_built_with_every_field() {
        let rule = MatchRule::signal(
            &ObjectAddress::new("de.pengutronix.rauc", "/"),
            "de.pengutronix.rauc.Installer",
            "Completed",
        );

        let built = zbus_rule(&rule).unwrap();

        assert_eq!(built.msg_type(), Some(MessageType::Signal));
        assert_eq!(built.sender().map(|s| s.to_string()), Some(rule.sender));
        assert!(built.path_spec().is_some());
        assert_eq!(built.interface().map(|i| i.to_string()), Some(rule.interface));
        assert_eq!(built.member().map(|m| m.to_string()), Some(rule.member));
    }

    #[test]
    fn malformed_match_rule_is_invalid_args() {
        let rule = MatchRule::signal(&ObjectAddress::new("com.example", "no-slash"), "com.example.Foo", "Ping");

        let err = zbus_rule(&rule).unwrap_err();

        assert_eq!(err.name, names::INVALID_ARGS);
    }

    #[test]
    fn scalar_values_survive_conversion() {
        let original = Value::Struct(vec![
            Value::from("eth0"),
            Value::U32(3),
            Value::Variant(Box::new(Value::Bool(true))),
        ]);

        let converted = to_zvariant(&original).map(|value| from_zvariant(&value));

        assert_eq!(converted, Ok(original));
    }
}
