//! Remote-object proxies for services on the system or session bus.
//!
//! A [`RemoteObject`] is an introspected connection to one object. Each
//! interface it advertises is reached through a [`Dispatcher`], which checks
//! every method, property and signal name against the introspection data
//! before anything is sent. [`DbusProxy`] layers a synchronised property
//! cache and a connect/disconnect/shutdown lifecycle on top, and is what
//! service wrappers hold as a field.
//!
//! All bus traffic goes through the [`Transport`] trait. [`ZbusTransport`]
//! talks to a real bus; [`MemoryBus`] hosts objects in-process for tests.

mod cache;
mod connection;
mod dispatcher;
mod enums;
mod error;
mod introspection;
mod macros;
mod property;
mod proxy;
mod signal;
mod transport;
mod value;

pub use cache::{CacheState, FetchOutcome, FetchTicket, PropertyCache};
pub use connection::{IntrospectPolicy, RemoteObject, SignalCallback, SignalHandle};
pub use dispatcher::{CallOptions, Dispatcher};
pub use enums::{Decoded, UnknownValueSink, WireEnum};
pub use error::{DbusError, WireError, names};
pub use introspection::{InterfaceTable, MethodInfo, ObjectDescription, PropertyAccess, PropertyInfo};
pub use property::Property;
pub use proxy::{DbusInterface, DbusProxy, ServiceDescriptor, connect_or_disable};
pub use signal::SignalWait;
pub use transport::{
    INTROSPECTABLE_INTERFACE, InterfaceBuilder, MatchRule, MemoryBus, MethodHandler,
    ObjectAddress, ObjectBuilder, PROPERTIES_CHANGED, PROPERTIES_INTERFACE, SharedTransport,
    SignalEvent, SignalMessage, Transport, ZbusTransport,
};
pub use value::{PropertyMap, Value};
