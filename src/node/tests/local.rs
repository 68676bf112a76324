//! Local round trips: connect, operate, observe notifications.

use super::*;
use crate::proxy::Proxy;
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_local_round_trip() {
    let node = make_node();
    node.register(
        "test-device-id",
        TestDevice::with_property("prop", json!({"Iam": "a property value"})),
    )
    .await
    .unwrap();

    let proxy = node.connect("test-device-id").await.unwrap();
    assert!(matches!(proxy, Proxy::Local(_)));
    assert_eq!(
        proxy.get("prop").await.unwrap(),
        json!({"Iam": "a property value"})
    );
}

#[tokio::test]
async fn test_upstream_notification_fan_out() {
    let node = make_node();
    let device = TestDevice::new();
    node.register("test-device-id", device.clone()).await.unwrap();

    let proxy = node.connect("test-device-id").await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_l = seen.clone();
    proxy.hub().on_notify(Arc::new(move |event, params| {
        seen_l
            .lock()
            .unwrap()
            .push((event.to_string(), params.to_vec()));
    }));

    device.emit_notify("event", vec![json!("a1"), json!("a2")]);
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "event");
    assert_eq!(seen[0].1, vec![json!("a1"), json!("a2")]);
}

#[tokio::test]
async fn test_put_notifications_reach_proxies() {
    let node = make_node();
    let device = TestDevice::new();
    node.register("dev", device.clone()).await.unwrap();

    let proxy = node.connect("dev").await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_l = seen.clone();
    proxy.hub().on_put(Arc::new(move |metric, value| {
        seen_l
            .lock()
            .unwrap()
            .push((metric.to_string(), value.clone()));
    }));

    device.emit_put("temperature", json!(21.5));
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("temperature".to_string(), json!(21.5))]
    );
}

#[tokio::test]
async fn test_connect_then_disconnect_restores_proxy_registry() {
    let node = make_node();
    node.register("dev", TestDevice::new()).await.unwrap();
    assert_eq!(node.proxy_count("dev"), 0);

    let proxy = node.connect("dev").await.unwrap();
    assert_eq!(node.proxy_count("dev"), 1);

    node.disconnect(&proxy).await.unwrap();
    assert_eq!(node.proxy_count("dev"), 0);

    let err = node.disconnect(&proxy).await.unwrap_err();
    assert!(matches!(err, Error::UnknownProxy(_)));
}

#[tokio::test]
async fn test_connect_unregistered_device_fails() {
    let node = make_node();
    let err = node.connect("ghost").await.unwrap_err();
    assert_eq!(err.to_string(), "Device '.:ghost' is not connected");
}

#[tokio::test]
async fn test_fan_out_reaches_each_proxy_once_in_order() {
    let node = make_node();
    let device = TestDevice::new();
    node.register("dev", device.clone()).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut proxies = Vec::new();
    for tag in ["p1", "p2", "p3"] {
        let proxy = node.connect("dev").await.unwrap();
        let order_l = order.clone();
        proxy.hub().on_put(Arc::new(move |_, _| {
            order_l.lock().unwrap().push(tag);
        }));
        proxies.push(proxy);
    }

    device.emit_put("metric", json!(1));
    settle().await;
    assert_eq!(*order.lock().unwrap(), vec!["p1", "p2", "p3"]);

    // Detaching the middle proxy narrows the fan-out.
    node.disconnect(&proxies[1]).await.unwrap();
    order.lock().unwrap().clear();

    device.emit_put("metric", json!(2));
    settle().await;
    assert_eq!(*order.lock().unwrap(), vec!["p1", "p3"]);
}

#[tokio::test]
async fn test_deregister_detaches_notification_flow() {
    let node = make_node();
    let device = TestDevice::new();
    node.register("dev", device.clone()).await.unwrap();

    let proxy = node.connect("dev").await.unwrap();
    let hits = Arc::new(Mutex::new(0u32));
    let hits_l = hits.clone();
    proxy.hub().on_put(Arc::new(move |_, _| {
        *hits_l.lock().unwrap() += 1;
    }));

    node.deregister("dev").await.unwrap();
    device.emit_put("metric", json!(1));
    settle().await;

    assert_eq!(*hits.lock().unwrap(), 0);
}
