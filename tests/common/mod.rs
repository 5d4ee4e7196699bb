//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use supervisor_bus::dbus::{
    IntrospectPolicy, MemoryBus, ObjectAddress, PropertyMap, ServiceDescriptor, SharedTransport,
    Value,
};

pub const FOO_SERVICE: &str = "com.example";
pub const FOO_PATH: &str = "/com/example/Foo";
pub const FOO_INTERFACE: &str = "com.example.Foo";

pub fn foo_address() -> ObjectAddress {
    ObjectAddress::new(FOO_SERVICE, FOO_PATH)
}

/// Bus hosting `com.example.Foo` with method `Bar`, properties `Count`
/// (read-write) and `Label` (read-only), and signal `Done`.
pub fn foo_bus() -> Arc<MemoryBus> {
    let bus = MemoryBus::new();
    bus.object(&foo_address(), |object| {
        object
            .interface(FOO_INTERFACE)
            .method("Bar", |_| Ok(vec![Value::from("bar reply")]))
            .method("Echo", |args| Ok(args))
            .property("Count", Value::U32(1))
            .read_only_property("Label", Value::from("foo"))
            .signal("Done");
    });
    bus
}

pub fn transport(bus: &Arc<MemoryBus>) -> SharedTransport {
    Arc::clone(bus) as SharedTransport
}

pub fn foo_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(FOO_SERVICE, FOO_PATH, FOO_INTERFACE)
}

pub fn fast_policy() -> IntrospectPolicy {
    IntrospectPolicy {
        attempts: 3,
        delay: Duration::ZERO,
    }
}

pub fn props(entries: &[(&str, Value)]) -> PropertyMap {
    entries
        .iter()
        .map(|(name, value)| (String::from(*name), value.clone()))
        .collect()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `future`, failing the test after two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap()
}
