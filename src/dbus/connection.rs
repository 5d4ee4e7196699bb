//! One introspected remote object.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{
    DbusError, Dispatcher, ObjectAddress, PropertyMap, SharedTransport, SignalMessage, Value,
    introspection::{InterfaceTable, ObjectDescription},
    transport::{MatchRule, SignalEvent},
};

/// Callback run for every matching signal.
pub type SignalCallback = Arc<dyn Fn(SignalMessage) + Send + Sync>;

/// Callback run for every matching signal and every overflow of the stream.
pub(crate) type EventCallback = Arc<dyn Fn(SignalEvent) + Send + Sync>;

/// Retry policy for introspection. Nothing else is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrospectPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for IntrospectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

/// Handle returned when a signal listener is installed; pass it back to
/// remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle(u64);

struct SignalRegistration {
    interface: String,
    member: String,
    rule: MatchRule,
    task: JoinHandle<()>,
}

struct RemoteInner {
    transport: SharedTransport,
    address: ObjectAddress,
    description: ObjectDescription,
    tables: BTreeMap<String, Arc<InterfaceTable>>,
    registrations: Mutex<BTreeMap<u64, SignalRegistration>>,
    next_handle: AtomicU64,
    closed: AtomicBool,
}

/// Connection to one remote object.
///
/// Only obtainable through [`RemoteObject::connect`], so every instance has
/// completed introspection. Interface lookup tables are built once, right
/// after introspection, and never change; an object whose interface set
/// changes is reconnected instead.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<RemoteInner>,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("address", &self.inner.address)
            .field("interfaces", &self.inner.tables.keys().collect::<Vec<_>>())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl RemoteObject {
    /// Introspects the object and builds one lookup table per interface.
    ///
    /// Timeouts and mid-flight disconnects are retried according to
    /// `policy`; any other failure is returned at once.
    ///
    /// # Errors
    /// Returns `DbusError::Parse` for malformed introspection data,
    /// `DbusError::Fatal` once all attempts are used up, or the classified
    /// error of a non-transient failure.
    #[instrument(skip(transport, policy), fields(%address))]
    pub async fn connect(
        transport: SharedTransport,
        address: ObjectAddress,
        policy: &IntrospectPolicy,
    ) -> Result<Self, DbusError> {
        let description = introspect(&transport, &address, policy).await?;

        let tables = description
            .interfaces
            .iter()
            .map(|(name, table)| (name.clone(), Arc::new(table.clone())))
            .collect();

        debug!(
            "Connected to {address} with {} interfaces",
            description.interfaces.len()
        );

        Ok(Self {
            inner: Arc::new(RemoteInner {
                transport,
                address,
                description,
                tables,
                registrations: Mutex::new(BTreeMap::new()),
                next_handle: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Destination and object path.
    pub fn address(&self) -> &ObjectAddress {
        &self.inner.address
    }

    /// Transport this object talks through.
    pub fn transport(&self) -> &SharedTransport {
        &self.inner.transport
    }

    /// Raw introspection result.
    pub fn description(&self) -> &ObjectDescription {
        &self.inner.description
    }

    /// True until [`RemoteObject::disconnect`] is called.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Names of every interface the object advertised.
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.inner.tables.keys().map(String::as_str)
    }

    /// True when the object advertised `interface`.
    pub fn has_interface(&self, interface: &str) -> bool {
        self.inner.tables.contains_key(interface)
    }

    /// Child object paths reported by introspection.
    pub fn child_paths(&self) -> Vec<String> {
        let base = self.inner.address.path.trim_end_matches('/');
        self.inner
            .description
            .children
            .iter()
            .map(|child| format!("{base}/{child}"))
            .collect()
    }

    /// Dispatcher for one interface.
    ///
    /// # Errors
    /// Returns `DbusError::Interface` if the object does not implement it.
    pub fn interface(&self, name: &str) -> Result<Dispatcher, DbusError> {
        let table = self.inner.tables.get(name).ok_or_else(|| {
            DbusError::Interface(format!("{} does not implement {name}", self.inner.address))
        })?;
        Ok(Dispatcher::new(self.clone(), Arc::clone(table)))
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), DbusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DbusError::NotConnected(self.inner.address.to_string()))
        }
    }

    /// Reads all properties of `interface`, bypassing any cache.
    ///
    /// # Errors
    /// Returns the classified bus error.
    pub async fn get_all(&self, interface: &str) -> Result<PropertyMap, DbusError> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .transport
            .get_all_properties(&self.inner.address, interface)
            .await?
            .into_iter()
            .map(|(name, value)| (name, value.strip_variants()))
            .collect())
    }

    pub(crate) async fn call(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, DbusError> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .transport
            .call_method(&self.inner.address, interface, method, args)
            .await?)
    }

    pub(crate) async fn get_property(
        &self,
        interface: &str,
        property: &str,
    ) -> Result<Value, DbusError> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .transport
            .get_property(&self.inner.address, interface, property)
            .await?)
    }

    pub(crate) async fn set_property(
        &self,
        interface: &str,
        property: &str,
        value: Value,
    ) -> Result<(), DbusError> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .transport
            .set_property(&self.inner.address, interface, property, value)
            .await?)
    }

    /// Installs a persistent listener for `interface.member`.
    ///
    /// The registration is remembered so [`RemoteObject::disconnect`] can
    /// remove it; callers only need the handle to remove it earlier. Lag on
    /// the signal stream is passed through, since any dropped message may
    /// have been one of ours.
    ///
    /// # Errors
    /// Returns the classified bus error if the match rule is refused.
    pub(crate) async fn add_listener(
        &self,
        interface: &str,
        member: &str,
        callback: EventCallback,
    ) -> Result<SignalHandle, DbusError> {
        self.ensure_connected()?;

        let rule = MatchRule::signal(&self.inner.address, interface, member);
        let mut stream = self.inner.transport.signals();
        self.inner.transport.add_match(&rule).await?;

        let filter = rule.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match &event {
                    SignalEvent::Message(message) if !filter.matches(message) => {}
                    _ => callback(event),
                }
            }
        });

        let id = self.inner.next_handle.fetch_add(1, Ordering::SeqCst);
        self.registrations().insert(
            id,
            SignalRegistration {
                interface: interface.to_owned(),
                member: member.to_owned(),
                rule,
                task,
            },
        );

        debug!("Listening for {interface}.{member} on {}", self.inner.address);
        Ok(SignalHandle(id))
    }

    /// Removes one listener. Unknown handles are ignored.
    ///
    /// # Errors
    /// Returns the classified bus error if the match rule cannot be removed.
    pub(crate) async fn remove_listener(&self, handle: SignalHandle) -> Result<(), DbusError> {
        let Some(registration) = self.registrations().remove(&handle.0) else {
            return Ok(());
        };

        registration.task.abort();
        self.inner
            .transport
            .remove_match(&registration.rule)
            .await?;
        Ok(())
    }

    /// Number of listeners currently installed.
    pub fn listener_count(&self) -> usize {
        self.registrations().len()
    }

    /// Removes every listener exactly once and marks the object closed.
    #[instrument(skip(self), fields(address = %self.inner.address))]
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let registrations: Vec<SignalRegistration> = {
            let mut registry = self.registrations();
            std::mem::take(&mut *registry).into_values().collect()
        };

        for registration in registrations {
            registration.task.abort();
            if let Err(err) = self.inner.transport.remove_match(&registration.rule).await {
                debug!(
                    "Failed to remove listener for {}.{}: {err}",
                    registration.interface, registration.member
                );
            }
        }

        info!("Disconnected from {}", self.inner.address);
    }

    fn registrations(&self) -> MutexGuard<'_, BTreeMap<u64, SignalRegistration>> {
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RemoteInner {
    fn drop(&mut self) {
        let registrations = match self.registrations.get_mut() {
            Ok(registrations) => registrations,
            Err(poisoned) => poisoned.into_inner(),
        };

        if registrations.is_empty() {
            return;
        }

        warn!(
            "{} dropped with {} signal listeners still installed",
            self.address,
            registrations.len()
        );
        for registration in registrations.values() {
            registration.task.abort();
        }
    }
}

async fn introspect(
    transport: &SharedTransport,
    address: &ObjectAddress,
    policy: &IntrospectPolicy,
) -> Result<ObjectDescription, DbusError> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match transport.introspect(address).await.map_err(DbusError::from) {
            Ok(xml) => return ObjectDescription::parse(&xml),
            Err(err) if err.is_transient() => {
                warn!("Introspection of {address} failed (attempt {attempt}/{attempts}): {err}");
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(DbusError::Fatal(format!(
        "Could not introspect {address} after {attempts} attempts"
    )))
}
