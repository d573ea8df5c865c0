//! One-shot `get` requests: correlation, cache write-through, timeouts and
//! failure on connection loss.

mod common;

use common::{next_get, next_notification, q, recorder, Harness};
use lab_link::{ConnectionState, LabLinkError, Query, RequestContext, ServerMessage};
use serde_json::{json, Value};
use std::time::Duration;

fn spawn_get(
    h: &Harness,
    query: Query,
    use_cache: bool,
    ctx: Option<RequestContext>,
) -> tokio::task::JoinHandle<lab_link::Result<Value>> {
    let client = h.client.clone();
    tokio::spawn(async move { client.get(&query, use_cache, ctx.as_ref()).await })
}

#[tokio::test]
async fn test_get_answer_is_written_through() {
    let mut h = Harness::connected().await;
    let query = q(json!({"meta": {"sources": {"42": {"params": 0}}}}));
    let (callback, mut rx) = recorder();
    h.client.watch(query.clone(), callback);

    let task = spawn_get(&h, query.clone(), true, None);
    let (request_id, sent_query, session) = next_get(&h.transport).await;
    assert_eq!(sent_query, query);
    assert_eq!(session, None);

    let answer = json!({"meta": {"sources": {"42": {"params": {"gain": 4}}}}});
    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: answer.clone(),
    });
    assert_eq!(task.await.unwrap().unwrap(), answer);
    assert_eq!(h.client.get_cached(&query), answer);

    h.settle().await;
    assert!(rx.try_recv().is_err(), "write-through does not notify watchers");

    // A later push still notifies as usual
    h.transport.push(
        common::p(&["meta", "sources", "42", "params"]),
        json!({"gain": 5}),
    );
    next_notification(&mut rx).await;
}

#[tokio::test]
async fn test_get_without_cache() {
    let h = Harness::connected().await;
    let query = q(json!({"status": 0}));

    let task = spawn_get(&h, query.clone(), false, None);
    let (request_id, _, _) = next_get(&h.transport).await;
    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: json!({"status": "idle"}),
    });
    assert_eq!(task.await.unwrap().unwrap(), json!({"status": "idle"}));
    assert_eq!(h.client.get_cached(&query), json!({}));
}

#[tokio::test]
async fn test_get_forwards_session() {
    let h = Harness::connected().await;
    let ctx = RequestContext::new().with_session("page-7");

    let task = spawn_get(&h, q(json!({"status": 0})), false, Some(ctx));
    let (request_id, _, session) = next_get(&h.transport).await;
    assert_eq!(session.as_deref(), Some("page-7"));

    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: json!({}),
    });
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_gets_are_correlated() {
    let h = Harness::connected().await;
    let first = spawn_get(&h, q(json!({"a": 0})), false, None);
    let (first_id, _, _) = next_get(&h.transport).await;
    let second = spawn_get(&h, q(json!({"b": 0})), false, None);
    let (second_id, _, _) = next_get(&h.transport).await;
    assert_ne!(first_id, second_id);

    h.transport.deliver(ServerMessage::GetResult {
        request_id: second_id,
        value: json!({"b": 2}),
    });
    h.transport.deliver(ServerMessage::GetResult {
        request_id: first_id,
        value: json!({"a": 1}),
    });
    assert_eq!(first.await.unwrap().unwrap(), json!({"a": 1}));
    assert_eq!(second.await.unwrap().unwrap(), json!({"b": 2}));
}

#[tokio::test]
async fn test_get_rejected() {
    let h = Harness::connected().await;
    let task = spawn_get(&h, q(json!({"secret": 0})), true, None);
    let (request_id, _, _) = next_get(&h.transport).await;
    h.transport.deliver(ServerMessage::GetError {
        request_id,
        code: "forbidden".to_string(),
        message: "not allowed".to_string(),
    });

    match task.await.unwrap() {
        Err(LabLinkError::RequestRejected { code, message }) => {
            assert_eq!(code, "forbidden");
            assert_eq!(message, "not allowed");
        },
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(h.client.get_cached(&Query::Leaf), json!({}));
}

#[tokio::test]
async fn test_get_times_out() {
    let mut h = Harness::with_request_timeout(100).await;
    h.transport.connect();
    h.client.wait_for_connection(common::WAIT).await.unwrap();

    let task = spawn_get(&h, q(json!({"status": 0})), true, None);
    let (request_id, _, _) = next_get(&h.transport).await;
    let result = task.await.unwrap();
    assert!(matches!(result, Err(LabLinkError::TimeoutError(_))), "{:?}", result);

    // A late answer is dropped quietly
    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: json!({"status": "late"}),
    });
    h.settle().await;
    assert_eq!(h.client.get_cached(&Query::Leaf), json!({}));
}

#[tokio::test]
async fn test_get_waits_for_connection() {
    let h = Harness::disconnected().await;
    let task = spawn_get(&h, q(json!({"status": 0})), false, None);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.transport.sent().is_empty());

    h.transport.connect();
    let (request_id, _, _) = next_get(&h.transport).await;
    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: json!({"status": "idle"}),
    });
    assert_eq!(task.await.unwrap().unwrap(), json!({"status": "idle"}));
}

#[tokio::test]
async fn test_get_never_connected_times_out() {
    let h = Harness::with_request_timeout(100).await;
    let result = h.client.get(&q(json!({"status": 0})), false, None).await;
    assert!(matches!(result, Err(LabLinkError::TimeoutError(_))), "{:?}", result);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_get() {
    let h = Harness::connected().await;
    let task = spawn_get(&h, q(json!({"status": 0})), true, None);
    next_get(&h.transport).await;

    h.transport.disconnect("server restarted");
    let result = task.await.unwrap();
    assert!(matches!(result, Err(LabLinkError::ConnectionLost(_))), "{:?}", result);
    assert!(result.unwrap_err().is_unavailable());
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_get() {
    let h = Harness::connected().await;
    h.client.watch(q(json!({"status": 0})), |_| {});
    let task = spawn_get(&h, q(json!({"status": 0})), true, None);
    next_get(&h.transport).await;

    h.client.shutdown();
    h.client.shutdown();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(LabLinkError::ConnectionLost(_))), "{:?}", result);
    assert!(h.transport.is_closed());
    assert_eq!(h.client.state(), ConnectionState::Disconnected);

    // Events after shutdown are not dispatched
    h.transport.push(common::p(&["status"]), json!("idle"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.client.get_cached(&Query::Leaf), json!({}));
}

#[tokio::test]
async fn test_push_after_answer_wins_in_cache() {
    let mut h = Harness::connected().await;
    let query = q(json!({"status": 0}));
    let (callback, mut rx) = recorder();
    h.client.watch(query.clone(), callback);

    let task = spawn_get(&h, query.clone(), true, None);
    let (request_id, _, _) = next_get(&h.transport).await;
    h.transport.deliver(ServerMessage::GetResult {
        request_id,
        value: json!({"status": "old"}),
    });
    h.transport.push(common::p(&["status"]), json!("new"));
    h.settle().await;

    assert_eq!(next_notification(&mut rx).await.value, json!({"status": "new"}));
    assert_eq!(task.await.unwrap().unwrap(), json!({"status": "old"}));
    assert_eq!(h.client.get_cached(&query), json!({"status": "new"}));
}

#[tokio::test]
async fn test_send_after_drop_reports_connection_lost() {
    let h = Harness::connected().await;
    // The client has not seen the Disconnected event yet
    h.transport.disconnect("socket reset");
    assert!(h.client.is_connected());

    let result = h.client.get(&q(json!({"status": 0})), true, None).await;
    assert!(matches!(result, Err(LabLinkError::ConnectionLost(_))), "{:?}", result);
    assert!(h.transport.sent().iter().all(|m| !matches!(m, lab_link::ClientMessage::Get { .. })));
}
