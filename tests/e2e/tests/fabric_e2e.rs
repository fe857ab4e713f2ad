//! End-to-end scenarios across a real host, node, and api clients over TLS.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use weave_e2e::{connect_api, start_host, start_node, TestCerts, API_KEY};
use weave_node::Service;

#[tokio::test]
async fn auth_call_and_respond_round_trip() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let service = Service::new().provide("test", |_args| Ok(json!([])));
    let _node = start_node(&certs, host.node_addr.port(), service).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(api.authenticate(API_KEY).await.expect("auth exchange"));

    // The node's handler result comes back correlated to this exact call.
    let result = api.call("test", None).await.expect("call test");
    assert_eq!(result, json!([]));

    api.close().await;
}

#[tokio::test]
async fn call_arguments_reach_the_method_handler() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let service = Service::new().provide("echo", |args| Ok(args.unwrap_or(json!(null))));
    let _node = start_node(&certs, host.node_addr.port(), service).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(api.authenticate(API_KEY).await.expect("auth exchange"));

    let result = api
        .call("echo", Some(json!({"a": 1, "b": [2, 3]})))
        .await
        .expect("call echo");
    assert_eq!(result, json!({"a": 1, "b": [2, 3]}));

    api.close().await;
}

#[tokio::test]
async fn handler_errors_come_back_as_task_errors() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let service = Service::new().provide("fails", |_| Err("deliberate failure".to_string()));
    let _node = start_node(&certs, host.node_addr.port(), service).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(api.authenticate(API_KEY).await.expect("auth exchange"));

    let err = api.call("fails", None).await.unwrap_err();
    assert!(err.to_string().contains("deliberate failure"), "{err}");

    api.close().await;
}

#[tokio::test]
async fn unprovided_method_is_refused() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(api.authenticate(API_KEY).await.expect("auth exchange"));

    let err = api.call("nobody-serves-this", None).await.unwrap_err();
    assert!(err.to_string().contains("method not provided"), "{err}");

    api.close().await;
}

#[tokio::test]
async fn bad_auth_key_gets_one_refusal_then_close() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(!api.authenticate("wrong-key").await.expect("auth exchange"));

    // The host closes after the single refusal; wait for the teardown to
    // reach this side, then confirm gated traffic can no longer go through.
    timeout(Duration::from_secs(5), async {
        while !api.connection().is_closed() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("host should close a refused connection");

    let err = api.call("test", None).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn events_fan_out_to_subscribers_only() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let node = start_node(&certs, host.node_addr.port(), Service::new()).await;

    let api1 = connect_api(&certs, host.api_addr.port()).await;
    let api2 = connect_api(&certs, host.api_addr.port()).await;
    let api3 = connect_api(&certs, host.api_addr.port()).await;
    for api in [&api1, &api2, &api3] {
        assert!(api.authenticate(API_KEY).await.expect("auth exchange"));
    }

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    let (tx3, mut rx3) = mpsc::unbounded_channel();

    api1.subscribe("flare", move |data| {
        let _ = tx1.send(data);
    })
    .await
    .expect("subscribe api1");
    api2.subscribe("flare", move |data| {
        let _ = tx2.send(data);
    })
    .await
    .expect("subscribe api2");
    // api3 subscribes to something else entirely.
    api3.subscribe("other", move |data| {
        let _ = tx3.send(data);
    })
    .await
    .expect("subscribe api3");

    node.emit("flare", Some(json!({"seq": 1})))
        .await
        .expect("emit flare");

    // Exactly one delivery to each subscriber.
    let got1 = timeout(Duration::from_secs(5), rx1.recv())
        .await
        .expect("api1 delivery")
        .expect("api1 channel");
    let got2 = timeout(Duration::from_secs(5), rx2.recv())
        .await
        .expect("api2 delivery")
        .expect("api2 channel");
    assert_eq!(got1, Some(json!({"seq": 1})));
    assert_eq!(got2, Some(json!({"seq": 1})));

    // The non-subscriber hears nothing.
    assert!(
        timeout(Duration::from_millis(500), rx3.recv()).await.is_err(),
        "api3 must not receive the broadcast"
    );

    // After api1 departs, the broadcast reaches only api2.
    api1.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    node.emit("flare", Some(json!({"seq": 2})))
        .await
        .expect("emit flare again");

    let got2 = timeout(Duration::from_secs(5), rx2.recv())
        .await
        .expect("api2 second delivery")
        .expect("api2 channel");
    assert_eq!(got2, Some(json!({"seq": 2})));
    assert!(
        timeout(Duration::from_millis(500), rx1.recv())
            .await
            .map(|v| v.is_none())
            .unwrap_or(true),
        "api1 must not receive after close"
    );

    api2.close().await;
    api3.close().await;
}

#[tokio::test]
async fn send_after_close_fails_loudly() {
    let certs = TestCerts::generate();
    let host = start_host(&certs).await;

    let api = connect_api(&certs, host.api_addr.port()).await;
    assert!(api.authenticate(API_KEY).await.expect("auth exchange"));

    api.close().await;

    let err = api
        .connection()
        .send(&codec::envelope::heartbeat_request())
        .await
        .unwrap_err();
    assert!(matches!(err, network::NetworkError::ConnectionClosed));
}
