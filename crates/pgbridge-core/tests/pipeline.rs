mod common;

use std::sync::Arc;

use common::{fast_policy, notify, wait_until, RecordingSink, RecordingTopics, ScriptedSource};
use pgbridge_core::{
    Bridge, BridgeConfig, ConfigError, DestinationKind, ListenerError, ListenerState, RouteTable,
    SinkFamily, SinkSet, TopicSink, WebhookSink,
};
use tokio::sync::oneshot;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(batch: usize) -> BridgeConfig {
    BridgeConfig::default()
        .with_batch_capacity(batch)
        .with_reconnect(fast_policy(2))
}

fn routes(spec: &str) -> Arc<RouteTable> {
    Arc::new(RouteTable::parse(spec, SinkFamily::Topic).unwrap())
}

fn spawn_bridge(
    bridge: Bridge,
) -> (
    oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<(), ListenerError>>,
) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(bridge.run(async move {
        let _ = stop_rx.await;
    }));
    (stop_tx, handle)
}

#[tokio::test]
async fn topic_and_webhook_routes_deliver_to_their_destinations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"user":7}"#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let topics = Arc::new(RecordingTopics::default());
    let sinks = SinkSet::new()
        .with(Arc::new(TopicSink::new(topics.clone())))
        .with(Arc::new(WebhookSink::new(std::time::Duration::from_secs(5))));

    let table = routes(&format!("orders|arn:topic:orders;users|{}/hook", server.uri()));
    let source = ScriptedSource::new();
    let feed = source.session();
    let bridge = Bridge::start(source.clone(), table, sinks, &config(0)).await.unwrap();
    let stats = bridge.stats();
    let (stop, handle) = spawn_bridge(bridge);

    notify(&feed, "orders", r#"{"id":1}"#);
    notify(&feed, "users", r#"{"user":7}"#);

    wait_until("both deliveries", || stats.snapshot().delivered == 2).await;
    assert_eq!(
        *topics.published.lock().unwrap(),
        vec![("arn:topic:orders".to_string(), r#"{"id":1}"#.to_string())]
    );

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
    server.verify().await;
}

#[tokio::test]
async fn malformed_entry_is_dropped_and_valid_ones_are_subscribed() {
    let table = routes("a|t1;broken;b|t2");
    assert_eq!(table.len(), 2);

    let source = ScriptedSource::new();
    let _feed = source.session();
    let sink = RecordingSink::new(DestinationKind::Topic);
    let bridge = Bridge::start(source.clone(), table, SinkSet::new().with(sink), &config(0))
        .await
        .unwrap();

    assert_eq!(source.listened(), vec!["a", "b"]);
    assert_eq!(bridge.probe().state().await, ListenerState::Subscribed);
}

#[test]
fn spec_without_valid_entries_is_fatal() {
    assert_eq!(
        RouteTable::parse("", SinkFamily::Topic).unwrap_err(),
        ConfigError::MissingRoutes
    );
    assert!(matches!(
        RouteTable::parse("only-one-field;a|b|c", SinkFamily::Stream),
        Err(ConfigError::NoValidRoutes { dropped: 2 })
    ));
}

#[tokio::test]
async fn unknown_channel_produces_no_sink_calls() {
    let source = ScriptedSource::new();
    let feed = source.session();
    let sink = RecordingSink::new(DestinationKind::Topic);
    let bridge = Bridge::start(
        source.clone(),
        routes("orders|t"),
        SinkSet::new().with(sink.clone()),
        &config(0),
    )
    .await
    .unwrap();
    let stats = bridge.stats();
    let (stop, handle) = spawn_bridge(bridge);

    notify(&feed, "unknown", "{}");
    notify(&feed, "orders", "{}");

    wait_until("routed delivery", || sink.count() == 1).await;
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 2);
    assert_eq!(snapshot.unrouted, 1);
    assert_eq!(snapshot.dispatched, 1);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn failing_webhook_does_not_stop_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let topic = RecordingSink::new(DestinationKind::Topic);
    let sinks = SinkSet::new()
        .with(topic.clone())
        .with(Arc::new(WebhookSink::new(std::time::Duration::from_secs(5))));
    let table = routes(&format!("users|{}/hook;orders|t", server.uri()));

    let source = ScriptedSource::new();
    let feed = source.session();
    let bridge = Bridge::start(source.clone(), table, sinks, &config(0)).await.unwrap();
    let stats = bridge.stats();
    let (stop, handle) = spawn_bridge(bridge);

    notify(&feed, "users", "{}");
    wait_until("webhook failure", || stats.snapshot().failed == 1).await;

    notify(&feed, "orders", "next");
    wait_until("following delivery", || topic.count() == 1).await;
    assert_eq!(topic.payloads(), vec!["next"]);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn batch_releases_events_in_arrival_order() {
    let source = ScriptedSource::new();
    let feed = source.session();
    let sink = RecordingSink::new(DestinationKind::Topic);
    let bridge = Bridge::start(
        source.clone(),
        routes("orders|t"),
        SinkSet::new().with(sink.clone()),
        &config(3),
    )
    .await
    .unwrap();
    let stats = bridge.stats();
    let (stop, handle) = spawn_bridge(bridge);

    notify(&feed, "orders", "1");
    notify(&feed, "orders", "2");
    wait_until("two received", || stats.snapshot().received == 2).await;
    assert_eq!(sink.count(), 0);

    notify(&feed, "orders", "3");
    wait_until("batch delivered", || sink.count() == 3).await;
    assert_eq!(sink.payloads(), vec!["1", "2", "3"]);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_dispatches_partially_filled_batch() {
    let source = ScriptedSource::new();
    let feed = source.session();
    let sink = RecordingSink::new(DestinationKind::Topic);
    let bridge = Bridge::start(
        source.clone(),
        routes("orders|t"),
        SinkSet::new().with(sink.clone()),
        &config(10),
    )
    .await
    .unwrap();
    let stats = bridge.stats();
    let probe = bridge.probe();
    let (stop, handle) = spawn_bridge(bridge);

    notify(&feed, "orders", "a");
    notify(&feed, "orders", "b");
    wait_until("two received", || stats.snapshot().received == 2).await;

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();

    wait_until("drained batch", || sink.count() == 2).await;
    assert_eq!(probe.state().await, ListenerState::Closed);
}

#[tokio::test]
async fn run_returns_error_when_reconnects_run_out() {
    let source = ScriptedSource::new();
    let feed = source.session();
    let sink = RecordingSink::new(DestinationKind::Topic);
    let bridge = Bridge::start(
        source.clone(),
        routes("orders|t"),
        SinkSet::new().with(sink),
        &config(0),
    )
    .await
    .unwrap();
    let probe = bridge.probe();
    let (_stop, handle) = spawn_bridge(bridge);

    drop(feed);
    let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("bridge should stop")
        .unwrap();
    assert!(matches!(result, Err(ListenerError::ReconnectExhausted { .. })));
    assert_eq!(probe.state().await, ListenerState::Failed);
}

#[tokio::test]
async fn startup_fails_on_refused_subscription() {
    let source = ScriptedSource::new();
    let _feed = source.session();
    source.refuse("orders");

    let result = Bridge::start(
        source.clone(),
        routes("orders|t"),
        SinkSet::new().with(RecordingSink::new(DestinationKind::Topic)),
        &config(0),
    )
    .await;
    assert!(matches!(result, Err(ListenerError::Subscription { .. })));
}
