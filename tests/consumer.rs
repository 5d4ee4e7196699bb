//! A service wrapper built by composition: configuration plus proxy as
//! fields, with tolerant enum decoding of its properties.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod common;

use std::{collections::HashSet, fs, sync::Arc};

use async_trait::async_trait;
use common::*;
use supervisor_bus::{
    config::BusConfig,
    dbus::{
        DbusError, DbusInterface, DbusProxy, Decoded, MemoryBus, ObjectAddress, PropertyMap,
        ServiceDescriptor, SharedTransport, UnknownValueSink, Value, WireEnum, connect_or_disable,
    },
    wire_enum,
};
use tempfile::TempDir;

wire_enum! {
    /// Power state of a drive.
    pub enum DriveState: u32 {
        Idle = 0,
        Active = 1,
        Standby = 2,
    }
}

wire_enum! {
    /// Connection medium.
    pub enum Medium: str {
        Usb = "usb",
        Sata = "sata",
    }
}

const DRIVE_SERVICE: &str = "org.example.Storage";
const DRIVE_PATH: &str = "/org/example/Storage/drives/disk0";
const DRIVE_INTERFACE: &str = "org.example.Storage.Drive";

struct DriveService {
    config: BusConfig,
    proxy: DbusProxy,
    sink: Arc<UnknownValueSink>,
}

impl DriveService {
    fn new(config: BusConfig, sink: Arc<UnknownValueSink>) -> Self {
        let proxy = DbusProxy::new(
            ServiceDescriptor::new(DRIVE_SERVICE, DRIVE_PATH, DRIVE_INTERFACE),
            config.introspect_policy(),
        );
        Self {
            config,
            proxy,
            sink,
        }
    }

    fn state(&self) -> Option<Decoded<DriveState>> {
        DriveState::decode_value(&self.proxy.property("State")?, &self.sink)
    }

    fn medium(&self) -> Option<Decoded<Medium>> {
        Medium::decode_value(&self.proxy.property("Medium")?, &self.sink)
    }
}

#[async_trait]
impl DbusInterface for DriveService {
    fn name(&self) -> &str {
        "drive"
    }

    async fn connect(&self, transport: SharedTransport) -> Result<(), DbusError> {
        self.proxy.connect(transport).await
    }

    async fn update(&self, changed: Option<PropertyMap>) -> Result<(), DbusError> {
        self.proxy.update(changed).await
    }

    async fn disconnect(&self) {
        self.proxy.disconnect().await;
    }

    async fn reintrospect(&self) -> Result<(), DbusError> {
        self.proxy.reintrospect().await
    }
}

fn drive_bus(state: u32, medium: &str) -> Arc<MemoryBus> {
    let bus = MemoryBus::new();
    bus.object(&ObjectAddress::new(DRIVE_SERVICE, DRIVE_PATH), |object| {
        object
            .interface(DRIVE_INTERFACE)
            .read_only_property("State", Value::U32(state))
            .read_only_property("Medium", Value::from(medium));
    });
    bus
}

#[tokio::test]
async fn wrapper_decodes_known_states() {
    let bus = drive_bus(1, "usb");
    let drive = DriveService::new(BusConfig::default(), Arc::new(UnknownValueSink::new()));

    assert!(connect_or_disable(&drive, transport(&bus)).await.unwrap());

    assert_eq!(drive.state().unwrap(), DriveState::Active);
    assert_eq!(drive.medium().unwrap(), Medium::Usb);
    assert_eq!(drive.sink.reported(), 0);
}

#[tokio::test]
async fn unknown_values_are_kept_and_reported_once() {
    let bus = drive_bus(9, "nvme-of");
    let sink = Arc::new(UnknownValueSink::new());
    let drive = DriveService::new(BusConfig::default(), Arc::clone(&sink));
    drive.connect(transport(&bus)).await.unwrap();

    let first = drive.state().unwrap();
    let second = drive.state().unwrap();

    assert!(!first.is_known());
    assert_eq!(first, 9u32);
    assert_eq!(first, second);
    assert!(!DriveState::members().iter().any(|member| first == *member));

    let mut set = HashSet::new();
    set.insert(first);
    assert!(set.contains(&second));

    assert_eq!(drive.medium().unwrap(), "nvme-of");
    assert_eq!(sink.reported(), 2);
}

#[tokio::test]
async fn wrapper_reads_its_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "introspect_attempts = 1\nintrospect_delay_ms = 0\ncall_timeout_ms = 500\n",
    )
    .unwrap();

    let config = BusConfig::load(&path).unwrap();
    let drive = DriveService::new(config, Arc::new(UnknownValueSink::new()));
    assert_eq!(drive.config.introspect_policy().attempts, 1);

    let bus = drive_bus(0, "sata");
    bus.fail_next_introspect(supervisor_bus::dbus::WireError::new(
        supervisor_bus::dbus::names::NO_REPLY,
        "busy",
    ));

    let err = drive.connect(transport(&bus)).await.unwrap_err();
    assert!(matches!(err, DbusError::Fatal(_)));
    assert_eq!(bus.introspect_count(), 1);
}

#[tokio::test]
async fn missing_config_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = BusConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, BusConfig::default());
}

#[tokio::test]
async fn broken_config_file_names_its_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "introspect_attempts = \"three\"").unwrap();

    let err = BusConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("config.toml"));
}
