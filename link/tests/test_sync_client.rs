//! Watch multiplexing, cache and reconnection behavior of `LabLinkClient`,
//! driven through a `MemoryTransport`.

mod common;

use common::{next_notification, p, q, recorder, subscribes, unsubscribes, Harness};
use lab_link::{
    ClientMessage, LinkEvent, LinkEventKind, PushMode, ServerMessage, WatchId,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_watch_push_then_read_cached() {
    let mut h = Harness::connected().await;
    let query = q(json!({"meta": {"sources": {"42": {"params": 0}}}}));
    let params = p(&["meta", "sources", "42", "params"]);

    let (callback, mut rx) = recorder();
    let id = h.client.watch(query.clone(), callback);
    assert_eq!(subscribes(&h.transport.sent()), vec![vec![params.clone()]]);
    assert_eq!(h.client.get_cached(&query), json!({}));

    h.transport.push(params.clone(), json!({"backgroundColor": "#fff"}));
    let expected = json!({"meta": {"sources": {"42": {"params": {"backgroundColor": "#fff"}}}}});

    let notification = next_notification(&mut rx).await;
    assert_eq!(notification.id, id);
    assert_eq!(notification.path, params);
    assert_eq!(notification.value, expected);
    assert_eq!(h.client.get_cached(&query), expected);

    h.settle().await;
    assert!(rx.try_recv().is_err(), "exactly one notification per push");
}

#[tokio::test]
async fn test_covered_watch_sends_nothing() {
    let h = Harness::connected().await;
    h.client.watch(q(json!({"meta": {"sources": 0}})), |_| {});
    h.transport.take_sent();

    h.client.watch(q(json!({"meta": {"sources": {"42": {"params": 0}}}})), |_| {});
    h.client.watch(q(json!({"meta": {"sources": {"7": 0}}})), |_| {});
    assert!(h.transport.sent().is_empty());

    h.client.watch(q(json!({"status": 0})), |_| {});
    assert_eq!(
        h.transport.take_sent(),
        vec![ClientMessage::Subscribe {
            paths: vec![p(&["status"])]
        }]
    );
    assert_eq!(h.client.server_paths(), vec![p(&["meta", "sources"]), p(&["status"])]);
}

#[tokio::test]
async fn test_widening_and_narrowing() {
    let h = Harness::connected().await;
    let narrow = p(&["meta", "sources", "42"]);
    let wide = p(&["meta", "sources"]);

    h.client.watch(q(json!({"meta": {"sources": {"42": 0}}})), |_| {});
    h.transport.take_sent();

    let wide_id = h.client.watch(q(json!({"meta": {"sources": 0}})), |_| {});
    assert_eq!(
        h.transport.take_sent(),
        vec![
            ClientMessage::Subscribe {
                paths: vec![wide.clone()]
            },
            ClientMessage::Unsubscribe {
                paths: vec![narrow.clone()]
            },
        ]
    );

    h.client.unwatch(wide_id);
    assert_eq!(
        h.transport.take_sent(),
        vec![
            ClientMessage::Subscribe {
                paths: vec![narrow.clone()]
            },
            ClientMessage::Unsubscribe { paths: vec![wide] },
        ]
    );
    assert_eq!(h.client.server_paths(), vec![narrow]);
}

#[tokio::test]
async fn test_unwatch_is_idempotent() {
    let mut h = Harness::connected().await;
    let query = q(json!({"status": 0}));
    let (first_cb, mut first) = recorder();
    let (second_cb, mut second) = recorder();
    let a = h.client.watch(query.clone(), first_cb);
    let b = h.client.watch(query, second_cb);
    h.transport.take_sent();

    h.client.unwatch(a);
    h.client.unwatch(a);
    assert!(h.transport.sent().is_empty(), "b still covers the path");

    h.transport.push(p(&["status"]), json!("running"));
    assert_eq!(next_notification(&mut second).await.value, json!({"status": "running"}));
    h.settle().await;
    assert!(first.try_recv().is_err());

    h.client.unwatch(b);
    h.client.unwatch(b);
    let sent = h.transport.take_sent();
    assert_eq!(subscribes(&sent), Vec::<Vec<_>>::new());
    assert_eq!(unsubscribes(&sent), vec![vec![p(&["status"])]]);
    assert!(h.client.subscriptions().is_empty());
}

#[tokio::test]
async fn test_unwatch_unknown_handle_is_ignored() {
    let h = Harness::connected().await;
    let id = h.client.watch(q(json!({"status": 0})), |_| {});
    h.client.unwatch(id);
    h.transport.take_sent();

    let other: WatchId = serde_json::from_value(json!(999)).unwrap();
    h.client.unwatch(other);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_reconnect_replays_union_once() {
    let mut h = Harness::connected().await;
    let (callback, mut rx) = recorder();
    h.client.watch(q(json!({"a": 0})), callback);
    h.client.watch(q(json!({"b": {"c": 0}})), |_| {});
    h.client.watch(q(json!({"b": {"c": {"d": 0}}})), |_| {});
    h.transport.take_sent();

    h.transport.disconnect("server restarted");
    h.transport.connect();
    h.settle().await;

    assert_eq!(
        h.transport.take_sent(),
        vec![ClientMessage::Subscribe {
            paths: vec![p(&["a"]), p(&["b", "c"])]
        }]
    );
    assert!(rx.try_recv().is_err(), "reconnecting alone notifies nobody");
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_watch_while_disconnected_is_sent_on_connect() {
    let h = Harness::disconnected().await;
    h.client.watch(q(json!({"status": 0})), |_| {});
    h.client.watch(q(json!({"meta": {"name": 0}})), |_| {});
    assert!(h.transport.sent().is_empty());
    assert!(h.client.server_paths().is_empty());

    h.transport.connect();
    h.client.wait_for_connection(common::WAIT).await.unwrap();
    assert_eq!(
        h.transport.take_sent(),
        vec![ClientMessage::Subscribe {
            paths: vec![p(&["meta", "name"]), p(&["status"])]
        }]
    );
}

#[tokio::test]
async fn test_unwatched_push_is_ignored() {
    let mut h = Harness::connected().await;
    h.client.watch(q(json!({"status": 0})), |_| {});

    h.transport.push(p(&["meta", "name"]), json!("spectrometer"));
    h.settle().await;
    assert_eq!(h.client.get_cached(&q(json!({"meta": 0}))), json!({}));
}

#[tokio::test]
async fn test_overlapping_watches_each_notified_once() {
    let mut h = Harness::connected().await;
    let (params_cb, mut params) = recorder();
    let (sources_cb, mut sources) = recorder();
    let (status_cb, mut status) = recorder();
    h.client.watch(
        q(json!({"meta": {"sources": {"42": {"params": 0, "name": 0}}}})),
        params_cb,
    );
    h.client.watch(q(json!({"meta": {"sources": 0}})), sources_cb);
    h.client.watch(q(json!({"status": 0})), status_cb);

    h.transport.push(
        p(&["meta", "sources", "42"]),
        json!({"params": {"gain": 3}, "name": "laser"}),
    );

    let first = next_notification(&mut params).await;
    assert_eq!(
        first.value,
        json!({"meta": {"sources": {"42": {"params": {"gain": 3}, "name": "laser"}}}})
    );
    next_notification(&mut sources).await;

    h.settle().await;
    assert!(params.try_recv().is_err(), "two overlapping paths, one notification");
    assert!(sources.try_recv().is_err());
    assert!(status.try_recv().is_err());
}

#[tokio::test]
async fn test_merge_mode_push() {
    let mut h = Harness::connected().await;
    let query = q(json!({"meta": {"sources": {"42": {"params": 0}}}}));
    let params = p(&["meta", "sources", "42", "params"]);
    let (callback, mut rx) = recorder();
    h.client.watch(query.clone(), callback);

    h.transport.push(params.clone(), json!({"gain": 1, "offset": 0}));
    h.transport.deliver(ServerMessage::Push {
        path: params,
        value: json!({"gain": 2}),
        mode: PushMode::Merge,
    });
    next_notification(&mut rx).await;
    let second = next_notification(&mut rx).await;
    assert_eq!(
        second.value,
        json!({"meta": {"sources": {"42": {"params": {"gain": 2, "offset": 0}}}}})
    );
    h.settle().await;
    assert_eq!(h.client.get_cached(&query), second.value);
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_others() {
    let mut h = Harness::connected().await;
    h.client.watch(q(json!({"status": 0})), |_| panic!("broken page"));
    let (callback, mut rx) = recorder();
    h.client.watch(q(json!({"status": 0})), callback);

    h.transport.push(p(&["status"]), json!("idle"));
    assert_eq!(next_notification(&mut rx).await.value, json!({"status": "idle"}));

    h.transport.push(p(&["status"]), json!("busy"));
    assert_eq!(next_notification(&mut rx).await.value, json!({"status": "busy"}));
    h.settle().await;
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_callback_unwatching_later_watch_skips_it() {
    let mut h = Harness::connected().await;
    let victim: Arc<Mutex<Option<WatchId>>> = Arc::new(Mutex::new(None));

    let client = h.client.clone();
    let target = victim.clone();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    h.client.watch(q(json!({"status": 0})), move |_| {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
        if let Some(id) = target.lock().take() {
            client.unwatch(id);
        }
    });
    let (callback, mut rx) = recorder();
    let later = h.client.watch(q(json!({"status": 0})), callback);
    *victim.lock() = Some(later);

    h.transport.push(p(&["status"]), json!("idle"));
    h.settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err(), "removed before its turn");
    assert_eq!(h.client.subscriptions().len(), 1);
}

#[tokio::test]
async fn test_watch_added_in_callback_waits_for_next_push() {
    let mut h = Harness::connected().await;
    let (late_cb, mut late) = recorder();
    let late_cb = Arc::new(Mutex::new(Some(late_cb)));

    let client = h.client.clone();
    h.client.watch(q(json!({"status": 0})), move |_| {
        if let Some(cb) = late_cb.lock().take() {
            client.watch(q(json!({"status": 0})), cb);
        }
    });

    h.transport.push(p(&["status"]), json!("idle"));
    h.settle().await;
    assert!(late.try_recv().is_err());
    assert_eq!(h.client.subscriptions().len(), 2);

    h.transport.push(p(&["status"]), json!("busy"));
    assert_eq!(next_notification(&mut late).await.value, json!({"status": "busy"}));
}

#[tokio::test]
async fn test_connect_and_disconnect_listeners() {
    let mut h = Harness::disconnected().await;
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = connects.clone();
    let connect_id = h.client.on(LinkEventKind::Connect, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (tx, mut reasons) = mpsc::unbounded_channel();
    h.client.on(LinkEventKind::Disconnect, move |event| {
        if let LinkEvent::Disconnect(reason) = event {
            let _ = tx.send(reason.message.clone());
        }
    });

    h.transport.connect();
    h.settle().await;
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    h.transport.disconnect("cable pulled");
    h.settle().await;
    assert_eq!(reasons.try_recv().unwrap(), "cable pulled");
    assert!(!h.client.is_connected());

    assert!(h.client.off(connect_id));
    assert!(!h.client.off(connect_id));
    h.transport.connect();
    h.settle().await;
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_survives_disconnect() {
    let mut h = Harness::connected().await;
    let query = q(json!({"status": 0}));
    h.client.watch(query.clone(), |_| {});
    h.transport.push(p(&["status"]), json!("idle"));
    h.settle().await;

    h.transport.disconnect("gone");
    h.settle().await;
    assert_eq!(h.client.get_cached(&query), json!({"status": "idle"}));

    assert!(h.client.invalidate(&p(&["status"])));
    assert_eq!(h.client.get_cached(&query), json!({}));
}

#[tokio::test]
async fn test_subscriptions_snapshot() {
    let mut h = Harness::connected().await;
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let id = h.client.watch(q(json!({"status": 0})), move |_| {
        flag.store(true, Ordering::SeqCst);
    });
    h.transport.push(p(&["status"]), json!(1));
    h.transport.push(p(&["status"]), json!(2));
    h.settle().await;

    assert!(fired.load(Ordering::SeqCst));
    let snapshot = h.client.subscriptions();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, id.as_u64());
    assert_eq!(snapshot[0].notify_count, 2);
    assert_eq!(snapshot[0].paths, vec![p(&["status"])]);
}
