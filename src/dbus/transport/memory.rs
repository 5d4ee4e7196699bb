use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    fmt::Write as _,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::debug;

use super::{
    INTROSPECTABLE_INTERFACE, MatchRule, ObjectAddress, PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
    SignalEvent, SignalMessage, Transport,
};
use crate::dbus::{PropertyMap, Value, WireError, error::names};

/// Handler invoked for a method call on a [`MemoryBus`] object.
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) -> Result<Vec<Value>, WireError> + Send + Sync>;

const SIGNAL_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryInterface {
    methods: BTreeMap<String, MethodHandler>,
    properties: BTreeMap<String, (Value, bool)>,
    signals: BTreeSet<String>,
}

#[derive(Default)]
struct MemoryObject {
    interfaces: BTreeMap<String, MemoryInterface>,
    children: BTreeSet<String>,
    xml_override: Option<String>,
}

#[derive(Default)]
struct BusState {
    objects: HashMap<ObjectAddress, MemoryObject>,
    introspect_failures: VecDeque<WireError>,
    active_matches: Vec<MatchRule>,
}

#[derive(Default)]
struct Counters {
    introspect: AtomicUsize,
    get_all: AtomicUsize,
    add_match: AtomicUsize,
    remove_match: AtomicUsize,
}

/// In-process message bus.
///
/// Objects are registered with [`MemoryBus::object`]; introspection XML is
/// generated from what was registered. Signals are only delivered while a
/// matching rule is installed, like a real bus daemon does.
pub struct MemoryBus {
    state: Mutex<BusState>,
    signal_tx: broadcast::Sender<SignalMessage>,
    counters: Counters,
}

/// Registers interfaces and children on a [`MemoryBus`] object.
pub struct ObjectBuilder<'a> {
    object: &'a mut MemoryObject,
}

/// Registers members on one interface of a [`MemoryBus`] object.
pub struct InterfaceBuilder<'a> {
    interface: &'a mut MemoryInterface,
}

impl ObjectBuilder<'_> {
    /// Adds (or reopens) an interface.
    pub fn interface(&mut self, name: &str) -> InterfaceBuilder<'_> {
        InterfaceBuilder {
            interface: self.object.interfaces.entry(name.to_owned()).or_default(),
        }
    }

    /// Removes an interface, as when a device loses a capability.
    pub fn remove_interface(&mut self, name: &str) -> &mut Self {
        self.object.interfaces.remove(name);
        self
    }

    /// Announces a child node in the introspection data.
    pub fn child(&mut self, name: &str) -> &mut Self {
        self.object.children.insert(name.to_owned());
        self
    }

    /// Serves the given XML instead of the generated introspection data.
    pub fn introspection_xml(&mut self, xml: &str) -> &mut Self {
        self.object.xml_override = Some(xml.to_owned());
        self
    }
}

impl InterfaceBuilder<'_> {
    /// Adds a method.
    pub fn method<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>, WireError> + Send + Sync + 'static,
    {
        self.interface
            .methods
            .insert(name.to_owned(), Arc::new(handler));
        self
    }

    /// Adds a read-write property.
    pub fn property(&mut self, name: &str, value: Value) -> &mut Self {
        self.interface
            .properties
            .insert(name.to_owned(), (value, true));
        self
    }

    /// Adds a read-only property.
    pub fn read_only_property(&mut self, name: &str, value: Value) -> &mut Self {
        self.interface
            .properties
            .insert(name.to_owned(), (value, false));
        self
    }

    /// Adds a signal.
    pub fn signal(&mut self, name: &str) -> &mut Self {
        self.interface.signals.insert(name.to_owned());
        self
    }
}

impl MemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Arc<Self> {
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(BusState::default()),
            signal_tx,
            counters: Counters::default(),
        })
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates or edits the object at `address`.
    pub fn object<F>(&self, address: &ObjectAddress, build: F)
    where
        F: FnOnce(&mut ObjectBuilder<'_>),
    {
        let mut state = self.state();
        let object = state.objects.entry(address.clone()).or_default();
        build(&mut ObjectBuilder { object });
    }

    /// Removes an object, as when a device is unplugged.
    pub fn remove_object(&self, address: &ObjectAddress) {
        self.state().objects.remove(address);
    }

    /// Changes a property value without emitting any signal.
    pub fn set_value(&self, address: &ObjectAddress, interface: &str, property: &str, value: Value) {
        let mut state = self.state();
        if let Some(slot) = state
            .objects
            .get_mut(address)
            .and_then(|object| object.interfaces.get_mut(interface))
            .and_then(|iface| iface.properties.get_mut(property))
        {
            slot.0 = value;
        }
    }

    /// Makes the next introspection request fail with `error`. Queued
    /// failures are consumed in order.
    pub fn fail_next_introspect(&self, error: WireError) {
        self.state().introspect_failures.push_back(error);
    }

    /// Delivers a signal to every subscriber if a matching rule is installed.
    /// Returns whether the signal was routed.
    pub fn emit(&self, message: SignalMessage) -> bool {
        let routed = self
            .state()
            .active_matches
            .iter()
            .any(|rule| rule.matches(&message));

        if routed {
            let _ = self.signal_tx.send(message);
        } else {
            debug!(
                "Dropping {}.{} from {}: no match rule",
                message.interface, message.member, message.path
            );
        }
        routed
    }

    /// Emits `PropertiesChanged` for `interface`. Changed values are also
    /// written into the object so a later `GetAll` agrees with the signal.
    pub fn emit_properties_changed(
        &self,
        address: &ObjectAddress,
        interface: &str,
        changed: PropertyMap,
        invalidated: &[&str],
    ) -> bool {
        for (name, value) in &changed {
            self.set_value(address, interface, name, value.clone());
        }

        self.emit(SignalMessage {
            sender: Some(address.destination.clone()),
            path: address.path.clone(),
            interface: PROPERTIES_INTERFACE.to_owned(),
            member: PROPERTIES_CHANGED.to_owned(),
            body: vec![
                Value::from(interface),
                Value::vardict(changed),
                Value::array(
                    "s",
                    invalidated.iter().map(|key| Value::from(*key)).collect(),
                ),
            ],
        })
    }

    /// Number of introspection requests served or failed.
    pub fn introspect_count(&self) -> usize {
        self.counters.introspect.load(Ordering::SeqCst)
    }

    /// Number of `GetAll` requests.
    pub fn get_all_count(&self) -> usize {
        self.counters.get_all.load(Ordering::SeqCst)
    }

    /// Number of `AddMatch` requests.
    pub fn add_match_count(&self) -> usize {
        self.counters.add_match.load(Ordering::SeqCst)
    }

    /// Number of `RemoveMatch` requests.
    pub fn remove_match_count(&self) -> usize {
        self.counters.remove_match.load(Ordering::SeqCst)
    }

    /// Match rules currently installed.
    pub fn active_matches(&self) -> Vec<MatchRule> {
        self.state().active_matches.clone()
    }

    fn with_interface<T>(
        &self,
        address: &ObjectAddress,
        interface: &str,
        access: impl FnOnce(&mut MemoryInterface) -> Result<T, WireError>,
    ) -> Result<T, WireError> {
        let mut state = self.state();

        if !state
            .objects
            .keys()
            .any(|known| known.destination == address.destination)
        {
            return Err(WireError::new(
                names::SERVICE_UNKNOWN,
                format!("The name {} was not provided by any service", address.destination),
            ));
        }

        let object = state.objects.get_mut(address).ok_or_else(|| {
            WireError::new(names::UNKNOWN_OBJECT, format!("No object at {}", address.path))
        })?;

        let iface = object.interfaces.get_mut(interface).ok_or_else(|| {
            WireError::new(
                names::UNKNOWN_INTERFACE,
                format!("No interface {interface} at {}", address.path),
            )
        })?;

        access(iface)
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn introspect(&self, address: &ObjectAddress) -> Result<String, WireError> {
        self.counters.introspect.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if let Some(failure) = state.introspect_failures.pop_front() {
            return Err(failure);
        }

        let object = state.objects.get(address).ok_or_else(|| {
            WireError::new(
                names::SERVICE_UNKNOWN,
                format!("Nothing registered at {address}"),
            )
        })?;

        Ok(object
            .xml_override
            .clone()
            .unwrap_or_else(|| render_introspection(object)))
    }

    async fn call_method(
        &self,
        address: &ObjectAddress,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, WireError> {
        let handler = self.with_interface(address, interface, |iface| {
            iface.methods.get(method).cloned().ok_or_else(|| {
                WireError::new(
                    names::UNKNOWN_METHOD,
                    format!("No method {method} on {interface}"),
                )
            })
        })?;

        handler(args)
    }

    async fn get_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
    ) -> Result<Value, WireError> {
        self.with_interface(address, interface, |iface| {
            iface
                .properties
                .get(property)
                .map(|(value, _)| value.clone())
                .ok_or_else(|| unknown_property(interface, property))
        })
    }

    async fn set_property(
        &self,
        address: &ObjectAddress,
        interface: &str,
        property: &str,
        value: Value,
    ) -> Result<(), WireError> {
        self.with_interface(address, interface, |iface| {
            match iface.properties.get_mut(property) {
                Some((slot, true)) => {
                    *slot = value;
                    Ok(())
                }
                Some((_, false)) => Err(WireError::new(
                    names::PROPERTY_READ_ONLY,
                    format!("{interface}.{property} is read-only"),
                )),
                None => Err(unknown_property(interface, property)),
            }
        })
    }

    async fn get_all_properties(
        &self,
        address: &ObjectAddress,
        interface: &str,
    ) -> Result<PropertyMap, WireError> {
        self.counters.get_all.fetch_add(1, Ordering::SeqCst);
        self.with_interface(address, interface, |iface| {
            Ok(iface
                .properties
                .iter()
                .map(|(name, (value, _))| (name.clone(), value.clone()))
                .collect())
        })
    }

    async fn add_match(&self, rule: &MatchRule) -> Result<(), WireError> {
        self.counters.add_match.fetch_add(1, Ordering::SeqCst);
        self.state().active_matches.push(rule.clone());
        Ok(())
    }

    async fn remove_match(&self, rule: &MatchRule) -> Result<(), WireError> {
        self.counters.remove_match.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        match state.active_matches.iter().position(|active| active == rule) {
            Some(idx) => {
                state.active_matches.remove(idx);
                Ok(())
            }
            None => Err(WireError::new(
                "org.freedesktop.DBus.Error.MatchRuleNotFound",
                format!("No rule {rule}"),
            )),
        }
    }

    fn signals(&self) -> BoxStream<'static, SignalEvent> {
        BroadcastStream::new(self.signal_tx.subscribe())
            .map(|message| match message {
                Ok(message) => SignalEvent::Message(message),
                Err(BroadcastStreamRecvError::Lagged(missed)) => SignalEvent::Lagged(missed),
            })
            .boxed()
    }
}

fn unknown_property(interface: &str, property: &str) -> WireError {
    WireError::new(
        names::UNKNOWN_PROPERTY,
        format!("No property {property} on {interface}"),
    )
}

fn render_introspection(object: &MemoryObject) -> String {
    let mut xml = String::from("<node>\n");

    let _ = writeln!(
        xml,
        "  <interface name=\"{INTROSPECTABLE_INTERFACE}\">\n    <method name=\"Introspect\">\n      \
         <arg name=\"xml_data\" type=\"s\" direction=\"out\"/>\n    </method>\n  </interface>"
    );
    let _ = writeln!(
        xml,
        "  <interface name=\"{PROPERTIES_INTERFACE}\">\n    <method name=\"Get\"/>\n    \
         <method name=\"GetAll\"/>\n    <method name=\"Set\"/>\n    \
         <signal name=\"{PROPERTIES_CHANGED}\"/>\n  </interface>"
    );

    for (name, iface) in &object.interfaces {
        let _ = writeln!(xml, "  <interface name=\"{name}\">");
        for method in iface.methods.keys() {
            let _ = writeln!(xml, "    <method name=\"{method}\"/>");
        }
        for (property, (value, writable)) in &iface.properties {
            let access = if *writable { "readwrite" } else { "read" };
            let _ = writeln!(
                xml,
                "    <property name=\"{property}\" type=\"{}\" access=\"{access}\"/>",
                value.signature()
            );
        }
        for signal in &iface.signals {
            let _ = writeln!(xml, "    <signal name=\"{signal}\"/>");
        }
        let _ = writeln!(xml, "  </interface>");
    }

    for child in &object.children {
        let _ = writeln!(xml, "  <node name=\"{child}\"/>");
    }

    xml.push_str("</node>\n");
    xml
}
