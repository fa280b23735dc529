//! Request/response correlation against the fake engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lib_wineing::control::{Command, Response, Status, callback, default_callback};
use project_tests::{Harness, within};
use tokio::sync::mpsc;

#[tokio::test]
async fn start_invokes_its_callback_exactly_once() {
    let harness = Harness::start().await.unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let counter = Arc::clone(&hits);
    let id = harness
        .api
        .start(
            Some("tape-A"),
            Some(callback(move |response| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(response);
            })),
        )
        .await
        .unwrap();
    assert_eq!(id, 1);

    let response = within(rx.recv()).await.unwrap();
    assert_eq!(response, Response::ok(1));
    assert!(!harness.router.table().contains_key(1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn unsolicited_response_reaches_the_default_callback() {
    let mut harness = Harness::with_engine(|mut config| {
        config.auto_reply = false;
        config
    })
    .await
    .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .api
        .set_default_response_processor(Some(default_callback(move |response| {
            let _ = tx.send(response);
        })));

    harness.api.stop(None).await.unwrap();
    let request = within(harness.engine.next_request()).await.unwrap();
    assert_eq!(request.command(), Command::Stop);

    harness.engine.send_response(&Response::ok(999));
    let response = within(rx.recv()).await.unwrap();
    assert_eq!(response.id, Some(999));
    assert_eq!(response.status, Status::Ok);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_response_falls_through_to_default() {
    let mut harness = Harness::with_engine(|mut config| {
        config.auto_reply = false;
        config
    })
    .await
    .unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, mut defaults) = mpsc::unbounded_channel();
    harness
        .api
        .set_default_response_processor(Some(default_callback(move |response| {
            let _ = tx.send(response);
        })));

    let counter = Arc::clone(&hits);
    let id = harness
        .api
        .start(
            None,
            Some(callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();
    let request = within(harness.engine.next_request()).await.unwrap();
    assert_eq!(request.id(), id);

    harness.engine.send_response(&Response::ok(id));
    harness.engine.send_response(&Response::ok(id));

    let fallthrough = within(defaults.recv()).await.unwrap();
    assert_eq!(fallthrough.id, Some(id));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_frame_does_not_stop_dispatch() {
    let harness = Harness::start().await.unwrap();
    harness.engine.send_raw(vec![0x0a, 0x7f]);
    harness.engine.send_raw(Vec::new());

    let rx = harness.api.request(Command::Start, None).await.unwrap();
    let response = within(rx).await.unwrap();
    assert!(response.is_ok());
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_each_get_their_own_response() {
    let harness = Harness::start().await.unwrap();
    let api = harness.api.clone();

    let calls: Vec<_> = (0..50)
        .map(|_| {
            let api = api.clone();
            tokio::spawn(async move {
                let (tx, rx) = tokio::sync::oneshot::channel();
                let id = api
                    .stop(Some(callback(move |response| {
                        let _ = tx.send(response);
                    })))
                    .await
                    .unwrap();
                (id, rx.await.unwrap())
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for call in calls {
        let (id, response) = within(call).await.unwrap();
        assert_eq!(response.id, Some(id));
        assert!(ids.insert(id));
    }
    assert_eq!(ids.len(), 50);
    assert!(harness.router.table().is_empty());
    harness.stop().await.unwrap();
}
