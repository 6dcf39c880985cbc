//! Remote callback delivery: happy path, bounded retry and give-up.

mod common;

use common::{engine_builder, test_cred, wait_for_terminal, TestObject};
use parking_lot::Mutex;
use serde_json::json;
use stagehand::{RemoteNotifier, TaskRequest, TaskStore, TaskType, STAGE_COMPLETE};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct MiniServer {
    url: String,
    hits: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<String>>>,
}

/// Minimal HTTP/1.1 endpoint that records every request and answers 200.
async fn start_server() -> MiniServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/notify", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicU32::new(0));
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            accept_hits.fetch_add(1, Ordering::SeqCst);
            let requests = accept_requests.clone();
            tokio::spawn(handle_connection(socket, requests));
        }
    });

    MiniServer {
        url,
        hits,
        requests,
    }
}

async fn handle_connection(mut socket: TcpStream, requests: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let (head_end, content_length) = loop {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break (buf.len(), 0);
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            break (pos + 4, content_length);
        }
    };

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    requests
        .lock()
        .push(String::from_utf8_lossy(&buf).to_string());
    let _ = socket
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await;
}

#[tokio::test]
async fn first_attempt_delivery_with_task_id_header() {
    let server = start_server().await;
    let notifier = RemoteNotifier::new(5, 2000).unwrap();

    let report = notifier
        .notify(&server.url, "task-123", &json!({ "result": "done" }))
        .await;
    assert!(report.delivered);
    assert_eq!(report.attempts, 1);
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);

    let request = server.requests.lock()[0].to_ascii_lowercase();
    assert!(request.contains("x-task-id: task-123"), "{request}");
    assert!(request.contains("\"result\":\"done\""), "{request}");
}

#[tokio::test]
async fn unreachable_url_gets_six_attempts_then_gives_up() {
    // Nothing listens on port 1; every attempt is refused.
    let notifier = RemoteNotifier::new(5, 1000).unwrap();
    let report = notifier
        .notify("http://127.0.0.1:1/notify", "task-123", &json!({}))
        .await;
    assert!(!report.delivered);
    assert_eq!(report.attempts, 6);
}

#[tokio::test]
async fn completed_task_notifies_its_remote_parent() {
    let server = start_server().await;

    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(TaskType::new("NoopTask").stage("on_init", |task, _objects, _body| {
            Box::pin(async move {
                task.set_stage_complete(None).await?;
                Ok(())
            })
        }))
        .build()
        .unwrap();
    let store = engine.store();

    let guest = TestObject::new("g-1");
    let task = engine
        .new_task(
            &TaskRequest::new("NoopTask", test_cred()).with_notify_url(server.url.clone()),
            &guest,
        )
        .await
        .unwrap();
    engine.schedule_run(&task.id, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &task.id).await, STAGE_COMPLETE);

    // Delivery runs on the aux pool; wait for it.
    for _ in 0..300 {
        if server.hits.load(Ordering::SeqCst) >= 1 {
            let request = server.requests.lock()[0].to_ascii_lowercase();
            assert!(
                request.contains(&format!("x-task-id: {}", task.id)),
                "{request}"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("remote parent was never notified");
}

#[tokio::test]
async fn failed_delivery_leaves_task_state_untouched() {
    let (builder, _manager) = engine_builder();
    let engine = builder
        .register(TaskType::new("NoopTask").stage("on_init", |task, _objects, _body| {
            Box::pin(async move {
                task.set_stage_complete(None).await?;
                Ok(())
            })
        }))
        .build()
        .unwrap();
    let store = engine.store();

    let guest = TestObject::new("g-1");
    let task = engine
        .new_task(
            &TaskRequest::new("NoopTask", test_cred())
                .with_notify_url("http://127.0.0.1:1/notify"),
            &guest,
        )
        .await
        .unwrap();
    engine.schedule_run(&task.id, json!({})).await.unwrap();
    assert_eq!(wait_for_terminal(&store, &task.id).await, STAGE_COMPLETE);

    // Give the doomed delivery time to exhaust its attempts; the task is
    // unaffected.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let fresh = store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(fresh.stage, STAGE_COMPLETE);
    assert!(fresh.params.engine.failure_reasons.is_empty());
}
