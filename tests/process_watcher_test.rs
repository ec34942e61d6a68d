mod common;

use common::{MockApi, StatusReply, client, status_path};
use futures::StreamExt;
use rust_upload_client::api::client::HttpClient;
use rust_upload_client::models::RemoteStatus;
use rust_upload_client::services::process_watcher::{PollPolicy, ProcessWatcher, WatchEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
        grace_period: Duration::from_secs(2),
        interval: Duration::from_secs(1),
        max_attempts,
    }
}

fn authed(mock: &Arc<MockApi>) -> Arc<dyn HttpClient> {
    client(mock, MockApi::session(), 5).http
}

#[tokio::test(start_paused = true)]
async fn test_completes_after_pending_checks() {
    let mock = MockApi::new();
    mock.script_status(
        "d1",
        vec![
            StatusReply::Status(RemoteStatus::Pending),
            StatusReply::Status(RemoteStatus::Processing),
            StatusReply::Status(RemoteStatus::Completed),
        ],
    );

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(10), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(
        events,
        vec![
            WatchEvent::Waiting { attempt: 1, status: RemoteStatus::Pending },
            WatchEvent::Waiting { attempt: 2, status: RemoteStatus::Processing },
            WatchEvent::Completed { attempt: 3 },
        ]
    );
    assert_eq!(mock.calls_to(&status_path("d1")), 3);
}

#[tokio::test(start_paused = true)]
async fn test_first_check_waits_for_grace_period() {
    let mock = MockApi::new();
    mock.script_status("d1", vec![StatusReply::Status(RemoteStatus::Completed)]);

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(3), CancellationToken::new());
    let mut events = std::pin::pin!(watcher.watch());

    // Lazy: nothing is sent before the stream is polled
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(mock.calls().is_empty());

    let started = Instant::now();
    assert_eq!(events.next().await, Some(WatchEvent::Completed { attempt: 1 }));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(events.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_cap_yields_timeout_and_stops() {
    let mock = MockApi::new();

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(4), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(events.len(), 5);
    assert_eq!(events.last(), Some(&WatchEvent::TimedOut { attempts: 4 }));
    assert_eq!(mock.calls_to(&status_path("d1")), 4);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.calls_to(&status_path("d1")), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_count_as_missed_attempts() {
    let mock = MockApi::new();
    mock.script_status(
        "d1",
        vec![
            StatusReply::TransportError,
            StatusReply::ServerError,
            StatusReply::Status(RemoteStatus::Completed),
        ],
    );

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(5), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], WatchEvent::Missed { attempt: 1, .. }));
    assert!(matches!(events[1], WatchEvent::Missed { attempt: 2, .. }));
    assert_eq!(events[2], WatchEvent::Completed { attempt: 3 });
}

#[tokio::test(start_paused = true)]
async fn test_missed_attempts_still_hit_the_cap() {
    let mock = MockApi::new();
    mock.script_status("d1", vec![StatusReply::TransportError; 3]);

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(3), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(events.last(), Some(&WatchEvent::TimedOut { attempts: 3 }));
    assert_eq!(mock.calls_to(&status_path("d1")), 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_failure_carries_reason() {
    let mock = MockApi::new();
    mock.script_status(
        "d1",
        vec![
            StatusReply::Status(RemoteStatus::Processing),
            StatusReply::Failed("Spreadsheet has no readable sheets".to_string()),
        ],
    );

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(5), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(
        events.last(),
        Some(&WatchEvent::Failed {
            attempt: 2,
            reason: "Spreadsheet has no readable sheets".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_check_sends_nothing() {
    let mock = MockApi::new();
    let cancel = CancellationToken::new();
    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(5), cancel.clone());
    let mut events = std::pin::pin!(watcher.watch());

    cancel.cancel();
    assert_eq!(events.next().await, None);
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_checks_stops_polling() {
    let mock = MockApi::new();
    let cancel = CancellationToken::new();
    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(10), cancel.clone());
    let mut events = std::pin::pin!(watcher.watch());

    assert!(matches!(events.next().await, Some(WatchEvent::Waiting { attempt: 1, .. })));
    cancel.cancel();
    assert_eq!(events.next().await, None);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.calls_to(&status_path("d1")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_ends_watch() {
    let mock = MockApi::new();
    mock.expire_access();
    mock.revoke_refresh();

    let watcher = ProcessWatcher::new(authed(&mock), "d1", policy(10), CancellationToken::new());
    let events: Vec<WatchEvent> = watcher.watch().collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], WatchEvent::Unauthorized { .. }));
}
