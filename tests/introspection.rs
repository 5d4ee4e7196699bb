//! Introspection retry policy.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod common;

use std::time::Duration;

use common::*;
use supervisor_bus::dbus::{
    DbusError, IntrospectPolicy, ObjectAddress, RemoteObject, WireError, names,
};

#[tokio::test]
async fn transient_failures_are_retried() {
    let bus = foo_bus();
    bus.fail_next_introspect(WireError::new(names::NO_REPLY, "busy"));
    bus.fail_next_introspect(WireError::new(names::DISCONNECTED, "restarting"));

    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();

    assert!(object.has_interface(FOO_INTERFACE));
    assert_eq!(bus.introspect_count(), 3);
}

#[tokio::test]
async fn exhausted_retries_are_fatal() {
    let bus = foo_bus();
    for _ in 0..3 {
        bus.fail_next_introspect(WireError::new(names::TIMEOUT, "busy"));
    }

    let err = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap_err();

    assert!(matches!(err, DbusError::Fatal(ref detail) if detail.contains("after 3 attempts")));
    assert_eq!(bus.introspect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_wait_between_attempts() {
    let bus = foo_bus();
    bus.fail_next_introspect(WireError::new(names::NO_REPLY, "busy"));
    let policy = IntrospectPolicy {
        attempts: 2,
        delay: Duration::from_secs(3),
    };

    let started = tokio::time::Instant::now();
    RemoteObject::connect(transport(&bus), foo_address(), &policy)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn malformed_xml_is_not_retried() {
    let bus = foo_bus();
    bus.object(&foo_address(), |object| {
        object.introspection_xml("<node><interface name=");
    });

    let err = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap_err();

    assert!(matches!(err, DbusError::Parse(_)));
    assert_eq!(bus.introspect_count(), 1);
}

#[tokio::test]
async fn absent_service_is_not_retried() {
    let bus = foo_bus();
    let address = ObjectAddress::new("org.example.Absent", "/");

    let err = RemoteObject::connect(transport(&bus), address, &fast_policy())
        .await
        .unwrap_err();

    assert!(err.is_feature_absent());
    assert_eq!(bus.introspect_count(), 1);
}
