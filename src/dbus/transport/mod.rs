//! The seam between the proxy framework and the message bus.

mod memory;
mod zbus_transport;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use memory::{InterfaceBuilder, MemoryBus, MethodHandler, ObjectBuilder};
pub use zbus_transport::ZbusTransport;

use super::{PropertyMap, Value, WireError};

/// Well-known meta interface for property access.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
/// Well-known meta interface for introspection.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
/// Signal emitted on [`PROPERTIES_INTERFACE`] when properties change.
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Identity of one remote object: the service that owns it and its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddress {
    /// Bus name of the owning service.
    pub destination: String,
    /// Object path inside that service.
    pub path: String,
}

impl ObjectAddress {
    /// Creates an address.
    pub fn new(destination: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.destination, self.path)
    }
}

/// A signal delivered by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique name of the sender, when the bus reports one.
    pub sender: Option<String>,
    /// Object path that emitted the signal.
    pub path: String,
    /// Interface of the signal.
    pub interface: String,
    /// Signal name.
    pub member: String,
    /// Signal arguments, variant wrappers intact.
    pub body: Vec<Value>,
}

/// What a signal stream yields.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// One received signal.
    Message(SignalMessage),
    /// The subscriber fell behind and signals were dropped. Carries the number
    /// of dropped messages, or 0 when the transport cannot tell.
    Lagged(u64),
}

/// A signal match rule: what the bus daemon should route to us and what the
/// local filter accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchRule {
    /// Well-known name the signal is expected from.
    pub sender: String,
    /// Emitting object path.
    pub path: String,
    /// Signal interface.
    pub interface: String,
    /// Signal name.
    pub member: String,
}

impl MatchRule {
    /// Rule for one signal of one remote object.
    pub fn signal(address: &ObjectAddress, interface: &str, member: &str) -> Self {
        Self {
            sender: address.destination.clone(),
            path: address.path.clone(),
            interface: interface.to_owned(),
            member: member.to_owned(),
        }
    }

    /// Local filter. The sender is not compared because signals carry the
    /// unique name of the owner rather than the well-known one.
    pub fn matches(&self, message: &SignalMessage) -> bool {
        message.path == self.path
            && message.interface == self.interface
            && message.member == self.member
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type='signal',sender='{}',path='{}',interface='{}',member='{}'",
            self.sender, self.path, self.interface, self.member
        )
    }
}

/// Operations the framework needs from a message bus connection.
///
/// Every method is a suspension point. Errors are reported unclassified;
/// callers convert them into [`DbusError`](super::DbusError).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the introspection XML of an object.
    async fn introspect(&self, address: &ObjectAddress) -> Result<String, WireError>;

    /// Invokes a method and returns the reply body with variants intact.
    async fn call_method(
        &self,
        address: &ObjectAddress,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, WireError>;

    /// Reads a single property.
    async fn get_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
    ) -> Result<Value, WireError>;

    /// Writes a single property.
    async fn set_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
        value: Value,
    ) -> Result<(), WireError>;

    /// Reads all properties of an interface.
    async fn get_all_properties(
        &self,
        address: &ObjectAddress,
        interface: &str,
    ) -> Result<PropertyMap, WireError>;

    /// Asks the bus daemon to route matching signals to this connection.
    async fn add_match(&self, rule: &MatchRule) -> Result<(), WireError>;

    /// Retracts a rule installed with [`Transport::add_match`].
    async fn remove_match(&self, rule: &MatchRule) -> Result<(), WireError>;

    /// Stream of every signal received from the moment of the call on.
    /// Overflow is reported as [`SignalEvent::Lagged`] rather than skipped.
    fn signals(&self) -> BoxStream<'static, SignalEvent>;
}

/// Transport shared between every remote object of a process.
pub type SharedTransport = Arc<dyn Transport>;

/// Splits a `PropertiesChanged` body into its three arguments.
pub(crate) fn parse_properties_changed(
    body: &[Value],
) -> Option<(String, PropertyMap, Vec<String>)> {
    let [interface, changed, invalidated] = body else {
        return None;
    };

    let interface = interface.as_str()?.to_owned();
    let changed = changed.clone().into_property_map()?;
    let invalidated = invalidated
        .as_array()?
        .iter()
        .filter_map(|key| key.as_str().map(str::to_owned))
        .collect();

    Some((interface, changed, invalidated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_rule_renders_bus_syntax() {
        let rule = MatchRule::signal(
            &ObjectAddress::new("de.pengutronix.rauc", "/"),
            "de.pengutronix.rauc.Installer",
            "Completed",
        );

        assert_eq!(
            rule.to_string(),
            "type='signal',sender='de.pengutronix.rauc',path='/',\
             interface='de.pengutronix.rauc.Installer',member='Completed'"
        );
    }

    #[test]
    fn match_rule_ignores_unique_sender() {
        let rule = MatchRule::signal(&ObjectAddress::new("com.example", "/a"), "com.example.Foo", "Ping");
        let message = SignalMessage {
            sender: Some(String::from(":1.42")),
            path: String::from("/a"),
            interface: String::from("com.example.Foo"),
            member: String::from("Ping"),
            body: vec![],
        };

        assert!(rule.matches(&message));
        assert!(!rule.matches(&SignalMessage {
            path: String::from("/b"),
            ..message
        }));
    }

    #[test]
    fn properties_changed_body_is_split() {
        let body = vec![
            Value::from("com.example.Foo"),
            Value::vardict([("Count", Value::U32(5))]),
            Value::array("s", vec![Value::from("Secret")]),
        ];

        let (interface, changed, invalidated) = parse_properties_changed(&body).unwrap_or_default();

        assert_eq!(interface, "com.example.Foo");
        assert_eq!(changed.get("Count"), Some(&Value::U32(5)));
        assert_eq!(invalidated, vec![String::from("Secret")]);
    }
}
