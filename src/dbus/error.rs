//! Bus error classification.
//!
//! Every failure reported by the transport arrives as a [`WireError`] (the
//! error name and message exactly as the bus delivered them) and is mapped
//! once, here, onto the closed [`DbusError`] taxonomy.

/// Well-known error names used by message bus daemons and services.
pub mod names {
    /// The requested service is not available on the bus.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// The requested name has no owner.
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    /// The object does not implement the interface.
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    /// The interface has no such method.
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// The arguments did not match the method.
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    /// The body signature did not match the method.
    pub const INVALID_SIGNATURE: &str = "org.freedesktop.DBus.Error.InvalidSignature";
    /// No object exists at the path.
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    /// The interface has no such property.
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    /// The property cannot be written.
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    /// The connection to the bus was lost.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
    /// The peer did not reply in time.
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    /// A timeout occurred.
    pub const TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
    /// A timeout occurred inside the peer.
    pub const TIMED_OUT: &str = "org.freedesktop.DBus.Error.TimedOut";
    /// Generic failure.
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
}

/// An error as it was received from the bus, before classification.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct WireError {
    /// Bus error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod`.
    pub name: String,
    /// Human readable detail supplied by the peer or the transport.
    pub message: String,
}

impl WireError {
    /// Creates a wire error from a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Classified bus errors.
///
/// Callers match on the kind: `Interface` and `InterfaceMethod` at connect
/// time mean the host lacks an integration, `Object` means the remote object
/// vanished, `NotConnected` may be retried after reconnecting.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DbusError {
    /// Service or interface is unknown to the host.
    #[error("Interface not available: {0}")]
    Interface(String),

    /// Unknown method, bad signature or bad arguments.
    #[error("Method call rejected: {0}")]
    InterfaceMethod(String),

    /// No object exists at the addressed path.
    #[error("Object not found: {0}")]
    Object(String),

    /// Unknown, read-only or write-only property.
    #[error("Property access rejected: {0}")]
    InterfaceProperty(String),

    /// Unknown signal.
    #[error("Signal not supported: {0}")]
    InterfaceSignal(String),

    /// Operation requires a connected object.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The peer did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Introspection data could not be parsed.
    #[error("Failed to parse introspection data: {0}")]
    Parse(String),

    /// Anything unexpected.
    #[error("Unexpected bus failure: {0}")]
    Fatal(String),

    /// A proxy was asked to attach to a connection for a different object.
    #[error("Connection for {actual} cannot back proxy for {expected}")]
    ObjectMismatch {
        /// Object the proxy describes.
        expected: String,
        /// Object the offered connection addresses.
        actual: String,
    },
}

impl DbusError {
    /// True when the host simply lacks the integration; callers disable the
    /// feature and warn instead of failing.
    pub fn is_feature_absent(&self) -> bool {
        matches!(self, Self::Interface(_) | Self::InterfaceMethod(_))
    }

    /// True for failures that may go away when the same request is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NotConnected(_))
    }
}

impl From<WireError> for DbusError {
    fn from(err: WireError) -> Self {
        let detail = if err.message.is_empty() {
            err.name.clone()
        } else {
            err.message.clone()
        };

        match err.name.as_str() {
            names::SERVICE_UNKNOWN | names::UNKNOWN_INTERFACE | names::NAME_HAS_NO_OWNER => {
                Self::Interface(detail)
            }
            names::UNKNOWN_METHOD | names::INVALID_ARGS | names::INVALID_SIGNATURE => {
                Self::InterfaceMethod(detail)
            }
            names::UNKNOWN_OBJECT => Self::Object(detail),
            names::UNKNOWN_PROPERTY | names::PROPERTY_READ_ONLY => {
                Self::InterfaceProperty(detail)
            }
            names::DISCONNECTED => Self::NotConnected(detail),
            names::NO_REPLY | names::TIMEOUT | names::TIMED_OUT => Self::Timeout(detail),
            _ => Self::Fatal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(name: &str) -> DbusError {
        DbusError::from(WireError::new(name, "detail"))
    }

    #[test]
    fn feature_absent_names() {
        assert!(matches!(classify(names::SERVICE_UNKNOWN), DbusError::Interface(_)));
        assert!(matches!(classify(names::UNKNOWN_INTERFACE), DbusError::Interface(_)));
        assert!(classify(names::UNKNOWN_METHOD).is_feature_absent());
        assert!(classify(names::INVALID_ARGS).is_feature_absent());
    }

    #[test]
    fn object_and_property_names() {
        assert!(matches!(classify(names::UNKNOWN_OBJECT), DbusError::Object(_)));
        assert!(matches!(
            classify(names::PROPERTY_READ_ONLY),
            DbusError::InterfaceProperty(_)
        ));
    }

    #[test]
    fn transient_names() {
        assert!(matches!(classify(names::DISCONNECTED), DbusError::NotConnected(_)));
        assert!(matches!(classify(names::NO_REPLY), DbusError::Timeout(_)));
        assert!(classify(names::TIMED_OUT).is_transient());
        assert!(!classify(names::UNKNOWN_OBJECT).is_transient());
    }

    #[test]
    fn unknown_names_are_fatal_and_keep_context() {
        let err = classify("org.example.Error.Exploded");
        assert_eq!(
            err,
            DbusError::Fatal(String::from("org.example.Error.Exploded: detail"))
        );
    }

    #[test]
    fn empty_message_falls_back_to_name() {
        let err = DbusError::from(WireError::new(names::UNKNOWN_OBJECT, ""));
        assert_eq!(err, DbusError::Object(String::from(names::UNKNOWN_OBJECT)));
    }
}
