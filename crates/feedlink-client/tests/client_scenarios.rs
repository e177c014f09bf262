//! End-to-end client scenarios, driven through the mock transport.
//!
//! These tests play the server's half of the conversation over a
//! [`MockTransport`] and assert the documented ordering of callbacks and
//! events at the application surface.

use feedlink_client::transport::mock::{MockHandle, MockTransport};
use feedlink_client::{
    ClientError, ClientEvent, ClientOptions, ClientState, FeedEvent, FeedHandle, FeedIdentity,
    FeedObjectState, FeedlinkClient, ServerMessageViolation,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn client() -> (FeedlinkClient, MockHandle) {
    let (transport, handle) = MockTransport::new();
    (
        FeedlinkClient::new(Box::new(transport), ClientOptions::default()),
        handle,
    )
}

/// Lets the driver task and any woken futures run to quiescence.
async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

fn handshake_ok() -> Value {
    json!({"MessageType": "HandshakeResponse", "Success": true, "Version": "0.1"})
}

async fn connect(client: &FeedlinkClient, handle: &MockHandle) {
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    settle().await;
    handle.push_message_value(&handshake_ok());
    pending.await.expect("join").expect("connect should succeed");
    // Let the connected announcement run before the test proceeds.
    settle().await;
    handle.take_sent();
}

async fn open_feed(
    client: &FeedlinkClient,
    handle: &MockHandle,
    feed: &FeedIdentity,
    data: Value,
) -> FeedHandle {
    let pending = tokio::spawn({
        let client = client.clone();
        let feed = feed.clone();
        async move { client.feed(feed).await }
    });
    settle().await;
    let sent = handle.take_sent();
    if let Some(frame) = sent.first() {
        assert_eq!(frame["MessageType"], "FeedOpen");
        handle.push_message_value(&json!({
            "MessageType": "FeedOpenResponse",
            "FeedName": feed.name(),
            "FeedArgs": feed.args(),
            "Success": true,
            "FeedData": data
        }));
    }
    pending.await.expect("join").expect("feed should open")
}

/// Spawns a recorder of client-level events into the shared log.
fn record_events(client: &FeedlinkClient, log: Arc<Mutex<Vec<String>>>) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let label = match event {
                ClientEvent::Connecting => "connecting".to_string(),
                ClientEvent::Connected => "connected".to_string(),
                ClientEvent::Disconnecting(None) => "disconnecting(null)".to_string(),
                ClientEvent::Disconnecting(Some(error)) => {
                    format!("disconnecting({})", error_label(&error))
                }
                ClientEvent::Disconnected => "disconnected".to_string(),
                ClientEvent::Failed(_) => "failed".to_string(),
            };
            log.lock().unwrap().push(label);
        }
    });
}

fn error_label(error: &ClientError) -> &'static str {
    match error {
        ClientError::Argument { .. } => "argument",
        ClientError::State { .. } => "state",
        ClientError::Transport { .. } => "transport",
        ClientError::Connection { .. } => "connection",
        ClientError::Handshake => "handshake",
        ClientError::ServerMessage { .. } => "server-message",
        ClientError::ResponseTimeout { .. } => "response-timeout",
        ClientError::ViolationResponse { .. } => "violation-response",
        ClientError::Rejection { .. } => "rejection",
        ClientError::Termination { .. } => "termination",
    }
}

// =============================================================================
// S1 - Happy handshake
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s1_happy_handshake() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record_events(&client, Arc::clone(&log));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    settle().await;

    // The client offered exactly the supported version.
    let sent = handle.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0],
        json!({"MessageType": "Handshake", "Versions": ["0.1"]})
    );

    handle.push_message_value(&handshake_ok());
    pending.await.expect("join").expect("connect");
    settle().await;

    assert_eq!(client.state().await, ClientState::Connected);
    assert_eq!(*log.lock().unwrap(), vec!["connecting", "connected"]);
}

// =============================================================================
// S2 - Handshake version mismatch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s2_handshake_version_mismatch() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record_events(&client, Arc::clone(&log));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    settle().await;
    handle.push_message_value(
        &json!({"MessageType": "HandshakeResponse", "Success": true, "Version": "0.2"}),
    );

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ClientError::ServerMessage { .. })));
    settle().await;

    assert_eq!(client.state().await, ClientState::Disconnected);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["connecting", "disconnecting(server-message)", "disconnected"]
    );
}

// =============================================================================
// S3 - Action round trip
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s3_action_round_trip() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.action("do", json!({"x": 1})).await }
    });
    settle().await;

    let sent = handle.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["MessageType"], "Action");
    assert_eq!(sent[0]["ActionName"], "do");
    assert_eq!(sent[0]["ActionArgs"], json!({"x": 1}));
    let callback_id = sent[0]["CallbackId"].as_str().expect("opaque id").to_string();

    handle.push_message_value(&json!({
        "MessageType": "ActionResponse",
        "CallbackId": callback_id,
        "Success": true,
        "ActionData": {"y": 2}
    }));

    let result = pending.await.expect("join").expect("action");
    assert_eq!(*result, json!({"y": 2}));

    // No further emissions follow.
    settle().await;
    assert_eq!(client.state().await, ClientState::Connected);
}

#[tokio::test(start_paused = true)]
async fn s3b_action_rejection() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.action("do", json!({})).await }
    });
    settle().await;
    let sent = handle.take_sent();
    let callback_id = sent[0]["CallbackId"].as_str().unwrap().to_string();

    handle.push_message_value(&json!({
        "MessageType": "ActionResponse",
        "CallbackId": callback_id,
        "Success": false,
        "ErrorCode": "DENIED",
        "ErrorData": {"why": "because"}
    }));

    match pending.await.expect("join") {
        Err(ClientError::Rejection { code, data }) => {
            assert_eq!(code, "DENIED");
            assert_eq!(*data, json!({"why": "because"}));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

// =============================================================================
// S4 - Feed delta with hash mismatch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s4_feed_delta_hash_mismatch() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    connect(&client, &handle).await;
    record_events(&client, Arc::clone(&log));

    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let mut first = open_feed(&client, &handle, &feed, json!({"users": []})).await;
    let mut second = open_feed(&client, &handle, &feed, json!({})).await;

    // The delta applies cleanly but the advertised hash is for other data.
    handle.push_message_value(&json!({
        "MessageType": "FeedAction",
        "FeedName": "chat",
        "FeedArgs": {"room": "a"},
        "ActionName": "join",
        "ActionData": {},
        "FeedDeltas": [{"Operation": "InsertLast", "Path": ["users"], "Value": "alice"}],
        "FeedMd5": "AAAAAAAAAAAAAAAAAAAAAA=="
    }));
    settle().await;

    // Both feed objects observe the failure, and the connection dies.
    for feed_object in [&mut first, &mut second] {
        match feed_object.try_next_event() {
            Some(FeedEvent::Closed(Some(ClientError::ServerMessage { violation, .. }))) => {
                assert!(matches!(violation, ServerMessageViolation::FeedIntegrity { .. }));
            }
            other => panic!("unexpected feed event: {:?}", other),
        }
        assert_eq!(feed_object.state().await, FeedObjectState::Closed);
        assert!(feed_object.data().await.is_none());
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec!["disconnecting(server-message)", "disconnected"]
    );
    assert_eq!(client.state().await, ClientState::Disconnected);
}

// =============================================================================
// S5 - Termination racing a concurrent close
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s5_termination_vs_concurrent_close() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let feed = FeedIdentity::new("x", Vec::<(String, String)>::new());
    let mut feed_object = open_feed(&client, &handle, &feed, json!({})).await;

    // Close, and before the response arrives, the server terminates.
    let close = tokio::spawn(async move {
        feed_object.close().await.expect("close");
        feed_object
    });
    settle().await;
    let sent = handle.take_sent();
    assert_eq!(sent[0]["MessageType"], "FeedClose");

    handle.push_message_value(&json!({
        "MessageType": "FeedTermination",
        "FeedName": "x",
        "FeedArgs": {},
        "ErrorCode": "GONE",
        "ErrorData": {}
    }));
    handle.push_message_value(&json!({
        "MessageType": "FeedCloseResponse",
        "FeedName": "x",
        "FeedArgs": {}
    }));

    let mut feed_object = close.await.expect("join");
    settle().await;

    // The close completes cleanly; the termination never surfaces.
    match feed_object.try_next_event() {
        Some(FeedEvent::Closed(None)) => {}
        other => panic!("unexpected feed event: {:?}", other),
    }
    assert!(feed_object.try_next_event().is_none());
    assert_eq!(client.state().await, ClientState::Connected);
}

// =============================================================================
// S6 - Disconnect during in-flight work
// =============================================================================

#[tokio::test(start_paused = true)]
async fn s6_disconnect_during_in_flight_work() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    connect(&client, &handle).await;
    record_events(&client, Arc::clone(&log));

    // One pending action.
    let action = tokio::spawn({
        let client = client.clone();
        let log = Arc::clone(&log);
        async move {
            let result = client.action("do", json!({})).await;
            log.lock().unwrap().push(format!(
                "action:{}",
                error_label(&result.expect_err("aborted"))
            ));
        }
    });
    settle().await;

    // Two feed objects stuck opening (the server never responds).
    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let mut opens = Vec::new();
    for index in 1..=2 {
        let pending = tokio::spawn({
            let client = client.clone();
            let feed = feed.clone();
            let log = Arc::clone(&log);
            async move {
                let result = client.feed(feed).await;
                log.lock().unwrap().push(format!(
                    "open{}:{}",
                    index,
                    error_label(&result.expect_err("aborted"))
                ));
            }
        });
        settle().await;
        opens.push(pending);
    }

    let disconnect = tokio::spawn({
        let client = client.clone();
        let log = Arc::clone(&log);
        async move {
            client.disconnect().await.expect("disconnect");
            log.lock().unwrap().push("disconnect:ok".to_string());
        }
    });
    disconnect.await.expect("join");
    action.await.expect("join");
    for pending in opens {
        pending.await.expect("join");
    }
    settle().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "action:connection",
            "open1:connection",
            "open2:connection",
            "disconnecting(null)",
            "disconnect:ok",
            "disconnected",
        ]
    );
    assert_eq!(client.state().await, ClientState::Disconnected);
}

// =============================================================================
// Universal properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn feed_actions_update_shared_objects_in_order() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let mut first = open_feed(&client, &handle, &feed, json!({"n": 0})).await;
    let mut second = open_feed(&client, &handle, &feed, json!({})).await;

    for _ in 0..2 {
        handle.push_message_value(&json!({
            "MessageType": "FeedAction",
            "FeedName": "chat",
            "FeedArgs": {"room": "a"},
            "ActionName": "tick",
            "ActionData": {},
            "FeedDeltas": [{"Operation": "Increment", "Path": ["n"], "Value": 1}]
        }));
    }
    settle().await;

    for feed_object in [&mut first, &mut second] {
        let mut seen = Vec::new();
        while let Some(FeedEvent::Action {
            action_name,
            new_data,
            old_data,
            ..
        }) = feed_object.try_next_event()
        {
            assert_eq!(action_name, "tick");
            seen.push((old_data["n"].clone(), new_data["n"].clone()));
        }
        assert_eq!(seen, vec![(json!(0), json!(1)), (json!(1), json!(2))]);
        assert_eq!(*feed_object.data().await.expect("open"), json!({"n": 2}));
    }
}

#[tokio::test(start_paused = true)]
async fn snapshots_are_immutable_across_revelations() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let feed_object = open_feed(&client, &handle, &feed, json!({"users": []})).await;
    let before = feed_object.data().await.expect("open");

    handle.push_message_value(&json!({
        "MessageType": "FeedAction",
        "FeedName": "chat",
        "FeedArgs": {"room": "a"},
        "ActionName": "join",
        "ActionData": {},
        "FeedDeltas": [{"Operation": "InsertLast", "Path": ["users"], "Value": "alice"}]
    }));
    settle().await;

    // The earlier snapshot is untouched; the new one is a distinct value.
    assert_eq!(*before, json!({"users": []}));
    assert_eq!(
        *feed_object.data().await.expect("open"),
        json!({"users": ["alice"]})
    );
}

#[tokio::test(start_paused = true)]
async fn action_timeout_resolves_once_and_tears_down() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    connect(&client, &handle).await;
    record_events(&client, Arc::clone(&log));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.action("slow", json!({})).await }
    });
    settle().await;
    assert_eq!(handle.sent_count(), 1);

    // Nothing answers; the response window elapses.
    tokio::time::sleep(Duration::from_secs(11)).await;
    settle().await;

    match pending.await.expect("join") {
        Err(ClientError::ResponseTimeout { request, .. }) => {
            assert_eq!(request["MessageType"], "Action");
            assert_eq!(request["ActionName"], "slow");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec!["disconnecting(response-timeout)", "disconnected"]
    );
    assert_eq!(client.state().await, ClientState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn termination_closes_every_open_object() {
    let (client, handle) = client();
    connect(&client, &handle).await;

    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let mut first = open_feed(&client, &handle, &feed, json!({})).await;
    let mut second = open_feed(&client, &handle, &feed, json!({})).await;

    handle.push_message_value(&json!({
        "MessageType": "FeedTermination",
        "FeedName": "chat",
        "FeedArgs": {"room": "a"},
        "ErrorCode": "GONE",
        "ErrorData": {}
    }));
    settle().await;

    for feed_object in [&mut first, &mut second] {
        match feed_object.try_next_event() {
            Some(FeedEvent::Closed(Some(ClientError::Termination { code, .. }))) => {
                assert_eq!(code, "GONE");
            }
            other => panic!("unexpected feed event: {:?}", other),
        }
        assert_eq!(feed_object.state().await, FeedObjectState::Closed);
    }
    // The connection itself survives a termination.
    assert_eq!(client.state().await, ClientState::Connected);
}

#[tokio::test(start_paused = true)]
async fn spontaneous_connection_loss_closes_feeds_and_fails_actions() {
    let (client, handle) = client();
    let log = Arc::new(Mutex::new(Vec::new()));
    connect(&client, &handle).await;
    record_events(&client, Arc::clone(&log));

    let feed = FeedIdentity::new("chat", [("room", "a")]);
    let mut feed_object = open_feed(&client, &handle, &feed, json!({})).await;
    let action = tokio::spawn({
        let client = client.clone();
        async move { client.action("do", json!({})).await }
    });
    settle().await;

    handle.fail_connection("wire cut");
    settle().await;

    assert!(matches!(
        action.await.expect("join"),
        Err(ClientError::Connection { .. })
    ));
    match feed_object.try_next_event() {
        Some(FeedEvent::Closed(Some(ClientError::Connection { .. }))) => {}
        other => panic!("unexpected feed event: {:?}", other),
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec!["disconnecting(connection)", "disconnected"]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_clean_disconnect() {
    let (client, handle) = client();
    connect(&client, &handle).await;
    client.disconnect().await.expect("disconnect");
    settle().await;
    assert_eq!(client.state().await, ClientState::Disconnected);

    // A fresh session works over the same client.
    connect(&client, &handle).await;
    assert_eq!(client.state().await, ClientState::Connected);
}
