//! Consumer-facing proxy: a remote object plus a synchronised property cache.

use std::{pin::Pin, sync::Arc};

use async_stream::stream;
use async_trait::async_trait;
use futures::{StreamExt, pin_mut, stream::Stream};
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

use super::{
    DbusError, Dispatcher, ObjectAddress, PropertyMap, RemoteObject, SharedTransport, Value,
    cache::{CacheState, FetchOutcome, PropertyCache},
    connection::{IntrospectPolicy, SignalHandle},
    transport::{PROPERTIES_CHANGED, PROPERTIES_INTERFACE, SignalEvent, parse_properties_changed},
};

/// What a service wrapper declares about the object it proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Bus name of the service.
    pub destination: String,
    /// Object path.
    pub object_path: String,
    /// Interface whose properties are cached, if any.
    pub properties_interface: Option<String>,
    /// Keep the cache in step with `PropertiesChanged`.
    pub sync_properties: bool,
}

impl ServiceDescriptor {
    /// Descriptor with a synchronised properties interface.
    pub fn new(
        destination: impl Into<String>,
        object_path: impl Into<String>,
        properties_interface: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            object_path: object_path.into(),
            properties_interface: Some(properties_interface.into()),
            sync_properties: true,
        }
    }

    /// Descriptor for an object without cached properties.
    pub fn without_properties(
        destination: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            object_path: object_path.into(),
            properties_interface: None,
            sync_properties: false,
        }
    }

    /// Disables signal-driven synchronisation; the cache only changes on
    /// explicit [`DbusProxy::update`] calls.
    pub fn unsynced(mut self) -> Self {
        self.sync_properties = false;
        self
    }

    /// Object identity.
    pub fn address(&self) -> ObjectAddress {
        ObjectAddress::new(self.destination.clone(), self.object_path.clone())
    }
}

struct SyncTask {
    handle: SignalHandle,
    worker: JoinHandle<()>,
}

struct Attached {
    object: RemoteObject,
    sync: Option<SyncTask>,
}

enum Link {
    Idle,
    Connected(Attached),
    Disconnected,
    Shutdown,
}

impl Link {
    /// Moves to `next` if connected and hands back the attachment; any other
    /// state is left untouched.
    fn take_attached(&mut self, next: Link) -> Option<Attached> {
        if !matches!(self, Link::Connected(_)) {
            return None;
        }
        match std::mem::replace(self, next) {
            Link::Connected(attached) => Some(attached),
            _ => None,
        }
    }
}

enum PropertyEvent {
    Changed {
        changed: PropertyMap,
        invalidated: Vec<String>,
    },
    Lagged,
}

/// Local stand-in for one remote object.
///
/// Lifecycle: `Idle` until [`connect`](Self::connect) or
/// [`initialize`](Self::initialize), `Connected` afterwards,
/// `Disconnected` after [`disconnect`](Self::disconnect) and `Shutdown`
/// after [`shutdown`](Self::shutdown). Operations that need the connection
/// fail with `NotConnected` while `Idle` and return `Ok(None)` (or do
/// nothing) once disconnected or shut down.
pub struct DbusProxy {
    descriptor: ServiceDescriptor,
    policy: IntrospectPolicy,
    link: RwLock<Link>,
    cache: Arc<PropertyCache>,
}

impl DbusProxy {
    /// Creates an idle proxy.
    pub fn new(descriptor: ServiceDescriptor, policy: IntrospectPolicy) -> Self {
        Self {
            descriptor,
            policy,
            link: RwLock::new(Link::Idle),
            cache: Arc::new(PropertyCache::new()),
        }
    }

    /// The descriptor this proxy was built from.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Introspects the object and, when synchronisation is enabled, fetches
    /// every property and subscribes to changes. Connecting a proxy that was
    /// shut down does nothing.
    ///
    /// # Errors
    /// Returns the classified bus error of introspection or the first fetch.
    #[instrument(skip(self, transport), fields(destination = %self.descriptor.destination, path = %self.descriptor.object_path))]
    pub async fn connect(&self, transport: SharedTransport) -> Result<(), DbusError> {
        if self.is_shutdown().await {
            debug!("Ignoring connect after shutdown");
            return Ok(());
        }

        let object =
            RemoteObject::connect(transport, self.descriptor.address(), &self.policy).await?;
        let attached = self.attach(object).await?;
        self.install(attached).await;
        Ok(())
    }

    /// Attaches to a connection established elsewhere, without introspecting
    /// again.
    ///
    /// # Errors
    /// Returns `DbusError::ObjectMismatch` if `object` addresses a different
    /// destination or path than the descriptor, or the classified error of the
    /// first fetch.
    pub async fn initialize(&self, object: RemoteObject) -> Result<(), DbusError> {
        let expected = self.descriptor.address();
        if *object.address() != expected {
            return Err(DbusError::ObjectMismatch {
                expected: expected.to_string(),
                actual: object.address().to_string(),
            });
        }

        if self.is_shutdown().await {
            return Ok(());
        }

        let attached = self.attach(object).await?;
        self.install(attached).await;
        Ok(())
    }

    /// Swaps in a freshly attached connection. The link lock is only held for
    /// the swap; a shutdown that happened while attaching wins.
    async fn install(&self, attached: Attached) {
        let mut link = self.link.write().await;
        if matches!(*link, Link::Shutdown) {
            drop(link);
            debug!("Shut down while connecting to {}", attached.object.address());
            self.detach(attached).await;
            return;
        }

        let previous = link.take_attached(Link::Disconnected);
        *link = Link::Connected(attached);
        drop(link);

        if let Some(previous) = previous {
            self.detach(previous).await;
        }
    }

    async fn attach(&self, object: RemoteObject) -> Result<Attached, DbusError> {
        let sync = match (&self.descriptor.properties_interface, self.descriptor.sync_properties) {
            (Some(interface), true) => {
                refetch(&object, &self.cache, interface).await?;
                Some(self.start_sync(&object, interface).await?)
            }
            _ => None,
        };

        info!("Connected to {}", object.address());
        Ok(Attached { object, sync })
    }

    async fn start_sync(
        &self,
        object: &RemoteObject,
        interface: &str,
    ) -> Result<SyncTask, DbusError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watched = interface.to_owned();

        let handle = object
            .interface(PROPERTIES_INTERFACE)?
            .on_event(PROPERTIES_CHANGED, move |event| match event {
                SignalEvent::Message(message) => {
                    let Some((interface, changed, invalidated)) =
                        parse_properties_changed(&message.body)
                    else {
                        return;
                    };
                    if interface == watched {
                        let _ = tx.send(PropertyEvent::Changed {
                            changed,
                            invalidated,
                        });
                    }
                }
                SignalEvent::Lagged(_) => {
                    let _ = tx.send(PropertyEvent::Lagged);
                }
            })
            .await?;

        let cache = Arc::clone(&self.cache);
        let worker_object = object.clone();
        let interface = interface.to_owned();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                apply_event(&worker_object, &cache, &interface, event).await;
            }
        });

        Ok(SyncTask { handle, worker })
    }

    async fn stop_sync(object: &RemoteObject, sync: SyncTask) {
        sync.worker.abort();
        if let Err(err) = object.remove_listener(sync.handle).await {
            debug!("Failed to remove property listener: {err}");
        }
    }

    async fn detach(&self, attached: Attached) {
        if let Some(sync) = attached.sync {
            Self::stop_sync(&attached.object, sync).await;
        }
        attached.object.disconnect().await;
    }

    /// Returns the connected object.
    ///
    /// `Ok(None)` after disconnect or shutdown.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the proxy was never connected.
    pub async fn connected(&self) -> Result<Option<RemoteObject>, DbusError> {
        match &*self.link.read().await {
            Link::Connected(attached) => Ok(Some(attached.object.clone())),
            Link::Disconnected | Link::Shutdown => Ok(None),
            Link::Idle => Err(DbusError::NotConnected(self.descriptor.address().to_string())),
        }
    }

    /// Refreshes the cache.
    ///
    /// A non-empty `changed` map is merged as a patch; `None` or an empty map
    /// triggers a full fetch. Does nothing after disconnect or shutdown.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the proxy was never connected, or
    /// the classified error of the fetch.
    pub async fn update(&self, changed: Option<PropertyMap>) -> Result<(), DbusError> {
        let Some(object) = self.connected().await? else {
            return Ok(());
        };
        let Some(interface) = &self.descriptor.properties_interface else {
            return Ok(());
        };

        match changed {
            Some(changed) if !changed.is_empty() => {
                self.cache.apply_changes(changed);
                Ok(())
            }
            _ => refetch(&object, &self.cache, interface).await,
        }
    }

    /// Calls a method on any interface of the object.
    ///
    /// `Ok(None)` after disconnect or shutdown.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the proxy was never connected, or
    /// the classified error of the call.
    pub async fn call(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Vec<Value>>, DbusError> {
        match self.connected().await? {
            Some(object) => object.interface(interface)?.call(method, args).await.map(Some),
            None => Ok(None),
        }
    }

    /// Dispatcher for one interface of the object.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the proxy was never connected or
    /// `DbusError::Interface` if the interface is absent.
    pub async fn interface(&self, name: &str) -> Result<Option<Dispatcher>, DbusError> {
        match self.connected().await? {
            Some(object) => object.interface(name).map(Some),
            None => Ok(None),
        }
    }

    /// Removes the change listener and disconnects the object.
    #[instrument(skip(self), fields(destination = %self.descriptor.destination, path = %self.descriptor.object_path))]
    pub async fn disconnect(&self) {
        let mut link = self.link.write().await;
        if let Some(attached) = link.take_attached(Link::Disconnected) {
            self.detach(attached).await;
        }
    }

    /// Disconnects for good. Later connected-only calls are no-ops.
    pub async fn shutdown(&self) {
        let mut link = self.link.write().await;
        let attached = link.take_attached(Link::Shutdown);
        *link = Link::Shutdown;
        if let Some(attached) = attached {
            self.detach(attached).await;
        }
        debug!("Proxy for {} shut down", self.descriptor.address());
    }

    /// Detaches the change listener while keeping the object connected, so
    /// the cache stays readable but frozen.
    pub async fn stop_sync_property_changes(&self) {
        let mut link = self.link.write().await;
        if let Link::Connected(attached) = &mut *link {
            if let Some(sync) = attached.sync.take() {
                Self::stop_sync(&attached.object, sync).await;
                debug!("Stopped property sync for {}", attached.object.address());
            }
        }
    }

    /// Rebuilds the connection after the object's interface set changed.
    ///
    /// The old connection tears down its listeners before the new one is
    /// introspected.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the proxy was never connected, or
    /// the classified error of the new connection.
    pub async fn reintrospect(&self) -> Result<(), DbusError> {
        let mut link = self.link.write().await;
        if matches!(*link, Link::Idle) {
            return Err(DbusError::NotConnected(self.descriptor.address().to_string()));
        }
        let Some(attached) = link.take_attached(Link::Disconnected) else {
            return Ok(());
        };

        let transport = SharedTransport::clone(attached.object.transport());
        self.detach(attached).await;

        let object =
            RemoteObject::connect(transport, self.descriptor.address(), &self.policy).await?;
        *link = Link::Connected(self.attach(object).await?);
        info!("Re-introspected {}", self.descriptor.address());
        Ok(())
    }

    /// True while connected.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.link.read().await, Link::Connected(_))
    }

    /// True once [`DbusProxy::shutdown`] was called.
    pub async fn is_shutdown(&self) -> bool {
        matches!(*self.link.read().await, Link::Shutdown)
    }

    /// True while change notifications are being applied.
    pub async fn is_syncing(&self) -> bool {
        matches!(&*self.link.read().await, Link::Connected(Attached { sync: Some(_), .. }))
    }

    /// Copy of every cached property.
    pub fn properties(&self) -> PropertyMap {
        self.cache.snapshot()
    }

    /// One cached property.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.cache.get(name)
    }

    /// Consistency state of the cache.
    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    /// Stream of cache snapshots: the current one first, then one per change.
    pub fn watch(&self) -> impl Stream<Item = PropertyMap> + Send + use<> {
        self.cache.property().watch()
    }

    /// Stream of one property's value. Yields the current value first and
    /// then only when that property changes, ignoring changes to others.
    pub fn watch_property(&self, name: &str) -> Pin<Box<dyn Stream<Item = Option<Value>> + Send>> {
        let snapshots = self.watch();
        let name = name.to_owned();

        Box::pin(stream! {
            pin_mut!(snapshots);
            let mut last: Option<Option<Value>> = None;
            while let Some(snapshot) = snapshots.next().await {
                let current = snapshot.get(&name).cloned();
                if last.as_ref() != Some(&current) {
                    last = Some(current.clone());
                    yield current;
                }
            }
        })
    }

    /// Receiver notified on every cache change.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<PropertyMap> {
        self.cache.property().subscribe()
    }
}

async fn refetch(
    object: &RemoteObject,
    cache: &PropertyCache,
    interface: &str,
) -> Result<(), DbusError> {
    loop {
        let ticket = cache.begin_fetch();
        match object.get_all(interface).await {
            Ok(properties) => {
                match cache.complete_fetch(ticket, properties) {
                    FetchOutcome::Applied | FetchOutcome::Superseded => return Ok(()),
                    FetchOutcome::StillStale => {}
                }
            }
            Err(err) => {
                cache.fail_fetch(ticket);
                return Err(err);
            }
        }
    }
}

async fn apply_event(
    object: &RemoteObject,
    cache: &PropertyCache,
    interface: &str,
    event: PropertyEvent,
) {
    let changed = match event {
        PropertyEvent::Changed {
            changed,
            invalidated,
        } => {
            if !invalidated.is_empty() {
                cache.invalidate(invalidated);
            }
            changed
        }
        PropertyEvent::Lagged => {
            warn!("Missed property changes of {interface} on {}", object.address());
            cache.invalidate_all();
            PropertyMap::new()
        }
    };

    if cache.state() == CacheState::Invalidated || changed.is_empty() {
        cache.apply_changes(changed);
        if let Err(err) = refetch(object, cache, interface).await {
            warn!("Failed to refresh {interface} on {}: {err}", object.address());
        }
    } else {
        cache.apply_changes(changed);
    }
}

/// Contract a service wrapper implements on top of [`DbusProxy`].
///
/// Wrappers own a proxy (and any other components they need) as fields and
/// delegate to it.
#[async_trait]
pub trait DbusInterface: Send + Sync {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Connects to the remote object.
    async fn connect(&self, transport: SharedTransport) -> Result<(), DbusError>;

    /// Refreshes cached state; see [`DbusProxy::update`].
    async fn update(&self, changed: Option<PropertyMap>) -> Result<(), DbusError>;

    /// Disconnects from the remote object.
    async fn disconnect(&self);

    /// Called when the object's interface set changed on the host.
    async fn reintrospect(&self) -> Result<(), DbusError> {
        Ok(())
    }
}

#[async_trait]
impl DbusInterface for DbusProxy {
    fn name(&self) -> &str {
        &self.descriptor.destination
    }

    async fn connect(&self, transport: SharedTransport) -> Result<(), DbusError> {
        DbusProxy::connect(self, transport).await
    }

    async fn update(&self, changed: Option<PropertyMap>) -> Result<(), DbusError> {
        DbusProxy::update(self, changed).await
    }

    async fn disconnect(&self) {
        DbusProxy::disconnect(self).await;
    }

    async fn reintrospect(&self) -> Result<(), DbusError> {
        DbusProxy::reintrospect(self).await
    }
}

/// Connects `interface`, downgrading "not available on this host" to a
/// warning. Returns whether the feature is usable.
///
/// # Errors
/// Returns every error other than `Interface`/`InterfaceMethod`.
pub async fn connect_or_disable(
    interface: &dyn DbusInterface,
    transport: SharedTransport,
) -> Result<bool, DbusError> {
    match interface.connect(transport).await {
        Ok(()) => Ok(true),
        Err(err) if err.is_feature_absent() => {
            warn!("{} not available on this host, disabling: {err}", interface.name());
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
