//! One-shot signal waits never leave match rules behind.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod common;

use std::time::Duration;

use common::*;
use supervisor_bus::dbus::{DbusError, RemoteObject, SignalMessage, Value};

fn done_signal(code: u32) -> SignalMessage {
    SignalMessage {
        sender: Some(String::from(FOO_SERVICE)),
        path: String::from(FOO_PATH),
        interface: String::from(FOO_INTERFACE),
        member: String::from("Done"),
        body: vec![Value::Variant(Box::new(Value::U32(code)))],
    }
}

#[tokio::test]
async fn wait_returns_first_matching_signal() {
    let bus = foo_bus();
    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();
    let foo = object.interface(FOO_INTERFACE).unwrap();

    let mut wait = foo.wait_for("Done").await.unwrap();
    assert_eq!(bus.active_matches().len(), 1);

    let mut elsewhere = done_signal(1);
    elsewhere.path = String::from("/com/example/Other");
    bus.emit(elsewhere);
    assert!(bus.emit(done_signal(7)));

    assert_eq!(within(wait.wait_for_signal()).await.unwrap(), vec![Value::U32(7)]);
    wait.close().await.unwrap();

    assert!(bus.active_matches().is_empty());
    assert_eq!(bus.add_match_count(), 1);
    assert_eq!(bus.remove_match_count(), 1);
}

#[tokio::test]
async fn hundred_cancel_retry_cycles_leak_nothing() {
    let bus = foo_bus();
    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();
    let foo = object.interface(FOO_INTERFACE).unwrap();

    for round in 0..100u32 {
        let mut wait = foo.wait_for("Done").await.unwrap();

        if round % 2 == 0 {
            let cancelled =
                tokio::time::timeout(Duration::from_millis(1), wait.wait_for_signal()).await;
            assert!(cancelled.is_err());
            drop(wait);
        } else {
            assert!(bus.emit(done_signal(round)));
            let body = within(wait.wait_for_signal()).await.unwrap();
            assert_eq!(body, vec![Value::U32(round)]);
            wait.close().await.unwrap();
        }
    }

    eventually(|| bus.add_match_count() == bus.remove_match_count()).await;
    assert_eq!(bus.add_match_count(), 100);
    assert!(bus.active_matches().is_empty());
}

#[tokio::test]
async fn aborted_waiter_retracts_its_rule() {
    let bus = foo_bus();
    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();
    let foo = object.interface(FOO_INTERFACE).unwrap();

    let task = tokio::spawn(async move {
        let mut wait = foo.wait_for("Done").await?;
        wait.wait_for_signal().await
    });

    eventually(|| bus.active_matches().len() == 1).await;
    task.abort();

    eventually(|| bus.active_matches().is_empty()).await;
    assert_eq!(bus.add_match_count(), bus.remove_match_count());
}

#[tokio::test]
async fn wait_on_disconnected_object_fails_fast() {
    let bus = foo_bus();
    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();
    let foo = object.interface(FOO_INTERFACE).unwrap();
    object.disconnect().await;

    assert!(matches!(
        foo.wait_for("Done").await,
        Err(DbusError::NotConnected(_))
    ));
    assert_eq!(bus.add_match_count(), 0);
}

#[tokio::test]
async fn waits_and_listeners_coexist() {
    let bus = foo_bus();
    let object = RemoteObject::connect(transport(&bus), foo_address(), &fast_policy())
        .await
        .unwrap();
    let foo = object.interface(FOO_INTERFACE).unwrap();

    foo.on("Done", |_| {}).await.unwrap();
    let mut wait = foo.wait_for("Done").await.unwrap();
    assert_eq!(bus.active_matches().len(), 2);

    bus.emit(done_signal(3));
    within(wait.wait_for_signal()).await.unwrap();
    wait.close().await.unwrap();

    assert_eq!(bus.active_matches().len(), 1);
    object.disconnect().await;
    assert!(bus.active_matches().is_empty());
}
