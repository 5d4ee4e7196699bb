//! Typed access to one interface of a remote object.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    DbusError, RemoteObject, SignalMessage, Value,
    connection::{EventCallback, SignalCallback, SignalHandle},
    introspection::{InterfaceTable, MethodInfo, PropertyInfo},
    signal::SignalWait,
    transport::SignalEvent,
};

/// Options for [`Dispatcher::call_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Keep variant wrappers in the reply, e.g. to pass a settings payload
    /// back to a later call unchanged.
    pub keep_variants: bool,
}

/// Routes calls, property access and signal subscriptions to one interface.
///
/// Every member is checked against the introspected table before anything is
/// sent, so an unsupported name fails with the error kind of what was
/// attempted: `InterfaceMethod`, `InterfaceProperty` or `InterfaceSignal`.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    object: RemoteObject,
    table: Arc<InterfaceTable>,
}

impl Dispatcher {
    pub(crate) fn new(object: RemoteObject, table: Arc<InterfaceTable>) -> Self {
        Self { object, table }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.table.name
    }

    /// Object this dispatcher belongs to.
    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    /// Lookup table built from introspection.
    pub fn table(&self) -> &InterfaceTable {
        &self.table
    }

    /// Dispatcher for a nested interface, e.g. `Wireless` below
    /// `org.freedesktop.NetworkManager.Device`.
    ///
    /// # Errors
    /// Returns `DbusError::Interface` if the object lacks the nested interface.
    pub fn child(&self, segment: &str) -> Result<Dispatcher, DbusError> {
        self.object
            .interface(&format!("{}.{segment}", self.table.name))
    }

    fn method(&self, method: &str) -> Result<&MethodInfo, DbusError> {
        self.table.methods.get(method).ok_or_else(|| {
            DbusError::InterfaceMethod(format!("{} has no method {method}", self.table.name))
        })
    }

    fn property(&self, property: &str) -> Result<&PropertyInfo, DbusError> {
        self.table.properties.get(property).ok_or_else(|| {
            DbusError::InterfaceProperty(format!(
                "{} has no property {property}",
                self.table.name
            ))
        })
    }

    fn signal(&self, signal: &str) -> Result<(), DbusError> {
        if self.table.signals.contains_key(signal) {
            Ok(())
        } else {
            Err(DbusError::InterfaceSignal(format!(
                "{} has no signal {signal}",
                self.table.name
            )))
        }
    }

    /// Calls `method` and returns the reply with variant wrappers stripped.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceMethod` for unknown methods, otherwise the
    /// classified bus error.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Vec<Value>, DbusError> {
        self.call_with(method, args, CallOptions::default()).await
    }

    /// Calls `method` with explicit reply handling.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceMethod` for unknown methods, otherwise the
    /// classified bus error.
    pub async fn call_with(
        &self,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Vec<Value>, DbusError> {
        self.method(method)?;
        debug!("{}.{method} on {}", self.table.name, self.object.address());

        let reply = self.object.call(&self.table.name, method, args).await?;
        if options.keep_variants {
            Ok(reply)
        } else {
            Ok(reply.into_iter().map(Value::strip_variants).collect())
        }
    }

    /// Reads one property directly from the object, bypassing any cache.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceProperty` for unknown or write-only
    /// properties, otherwise the classified bus error.
    pub async fn get(&self, property: &str) -> Result<Value, DbusError> {
        let info = self.property(property)?;
        if !info.access.readable() {
            return Err(DbusError::InterfaceProperty(format!(
                "{}.{property} is write-only",
                self.table.name
            )));
        }

        Ok(self
            .object
            .get_property(&self.table.name, property)
            .await?
            .strip_variants())
    }

    /// Writes one property directly.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceProperty` for unknown or read-only
    /// properties, otherwise the classified bus error.
    pub async fn set(&self, property: &str, value: Value) -> Result<(), DbusError> {
        let info = self.property(property)?;
        if !info.access.writable() {
            return Err(DbusError::InterfaceProperty(format!(
                "{}.{property} is read-only",
                self.table.name
            )));
        }

        self.object
            .set_property(&self.table.name, property, value)
            .await
    }

    /// Installs a persistent listener for `signal`. The listener is removed
    /// by [`Dispatcher::off`] or, at the latest, when the object disconnects.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceSignal` for unknown signals, otherwise the
    /// classified bus error.
    pub async fn on<F>(&self, signal: &str, callback: F) -> Result<SignalHandle, DbusError>
    where
        F: Fn(SignalMessage) + Send + Sync + 'static,
    {
        let callback: SignalCallback = Arc::new(callback);
        let name = format!("{}.{signal}", self.table.name);
        self.on_event(signal, move |event| match event {
            SignalEvent::Message(message) => callback(message),
            SignalEvent::Lagged(missed) => warn!("Listener for {name} missed {missed} signals"),
        })
        .await
    }

    /// Like [`Dispatcher::on`], but also told when the signal stream
    /// overflowed and messages may have been lost.
    pub(crate) async fn on_event<F>(&self, signal: &str, callback: F) -> Result<SignalHandle, DbusError>
    where
        F: Fn(SignalEvent) + Send + Sync + 'static,
    {
        self.signal(signal)?;
        let callback: EventCallback = Arc::new(callback);
        self.object
            .add_listener(&self.table.name, signal, callback)
            .await
    }

    /// Removes a listener installed with [`Dispatcher::on`].
    ///
    /// # Errors
    /// Returns the classified bus error if the match rule cannot be removed.
    pub async fn off(&self, handle: SignalHandle) -> Result<(), DbusError> {
        self.object.remove_listener(handle).await
    }

    /// Prepares a one-shot wait for `signal`.
    ///
    /// # Errors
    /// Returns `DbusError::InterfaceSignal` for unknown signals, otherwise the
    /// classified bus error.
    pub async fn wait_for(&self, signal: &str) -> Result<SignalWait, DbusError> {
        self.signal(signal)?;
        SignalWait::install(&self.object, &self.table.name, signal).await
    }
}
