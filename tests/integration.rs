//! End-to-end integration tests against the mock daemon
//!
//! Each test spawns `mock_relayd` over the stdio transport and drives
//! the full stack: process supervision, correlation, routing, events,
//! and reconnection.

use std::path::PathBuf;
use std::time::Duration;

use relaybot::common::config::Config;
use relaybot::rpc::{ClientEvent, ErrorEventKind, ReceiptKind};
use relaybot::{Client, ConnectionState, Error};

fn stdio_config() -> Config {
    let mut config = Config::default();
    config.transport.daemon_path = Some(PathBuf::from(env!("CARGO_BIN_EXE_mock_relayd")));
    config.timeouts.connect_grace_ms = 100;
    config.timeouts.request_secs = 2;
    config.timeouts.shutdown_grace_ms = 500;
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_attempts = 3;
    config
}

async fn connected() -> Client {
    let client = Client::new(stdio_config()).unwrap();
    client.connect().await.unwrap();
    client
}

/// Wait for an event matching the predicate, failing after a bound
async fn expect_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    mut predicate: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        if predicate(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_connect_and_call_version() {
    let client = connected().await;
    assert_eq!(client.state().await, ConnectionState::Connected);

    let version = client.version().await.unwrap();
    assert_eq!(version["version"], "0.1.0-mock");

    client.graceful_shutdown().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_send_resolves_with_daemon_result() {
    let client = connected().await;

    let result = client.send_message("+15550000000", "hi", &[]).await.unwrap();
    assert_eq!(result.timestamp, 123);
    assert!(result.results.is_empty());

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_call_after_shutdown_fails_without_timer() {
    let client = connected().await;
    client.graceful_shutdown().await.unwrap();

    let started = std::time::Instant::now();
    let err = client.call("version", None).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_reaction_notification_emits_both_events() {
    let client = connected().await;
    let mut events = client.subscribe();

    let push = serde_json::json!({
        "method": "receive",
        "params": {
            "envelope": {
                "source": "+1",
                "dataMessage": {
                    "reaction": {
                        "emoji": "👍",
                        "targetAuthor": "+1",
                        "targetSentTimestamp": 5
                    }
                }
            }
        }
    });
    client.call("emit", Some(push)).await.unwrap();

    expect_event(&mut events, |e| {
        matches!(e, ClientEvent::Notification { method, .. } if method == "receive")
    })
    .await;
    let reaction = expect_event(&mut events, |e| matches!(e, ClientEvent::Reaction(_))).await;
    let ClientEvent::Reaction(reaction) = reaction else {
        unreachable!()
    };
    assert_eq!(reaction.emoji, "👍");
    assert_eq!(reaction.target_author, "+1");
    assert_eq!(reaction.target_sent_timestamp, 5);

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_receipt_notification() {
    let client = connected().await;
    let mut events = client.subscribe();

    let push = serde_json::json!({
        "method": "receive",
        "params": {
            "envelope": {
                "source": "+2",
                "receiptMessage": { "isRead": true, "timestamps": [41, 42] }
            }
        }
    });
    client.call("emit", Some(push)).await.unwrap();

    let receipt = expect_event(&mut events, |e| matches!(e, ClientEvent::Receipt(_))).await;
    let ClientEvent::Receipt(receipt) = receipt else {
        unreachable!()
    };
    assert_eq!(receipt.kind, ReceiptKind::Read);
    assert_eq!(receipt.timestamps, vec![41, 42]);

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_garbage_line_does_not_break_call() {
    let client = connected().await;
    let mut events = client.subscribe();

    // The mock writes a non-JSON line immediately before the ack; the
    // ack must still resolve the call
    client.call("garbage", None).await.unwrap();

    expect_event(&mut events, |e| {
        matches!(
            e,
            ClientEvent::Error(err) if err.kind == ErrorEventKind::Parse
        )
    })
    .await;

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_daemon_error_and_rate_limit_mapping() {
    let client = connected().await;

    match client.call("fail", None).await {
        Err(Error::Daemon { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "mock failure");
        }
        other => panic!("expected daemon error, got {other:?}"),
    }

    match client.call("ratelimit", None).await {
        Err(Error::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(17)));
        }
        other => panic!("expected rate limit error, got {other:?}"),
    }

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let mut config = stdio_config();
    config.timeouts.request_secs = 1;
    let client = Client::new(config).unwrap();
    client.connect().await.unwrap();

    let err = client.call("sleep", None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    // The connection is still healthy afterwards
    client.version().await.unwrap();

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stderr_severity_routing() {
    let client = connected().await;
    let mut events = client.subscribe();

    client
        .call(
            "stderr",
            Some(serde_json::json!({ "line": "ERROR RelayAccount - decryption failed" })),
        )
        .await
        .unwrap();

    let error = expect_event(&mut events, |e| {
        matches!(e, ClientEvent::Error(err) if err.kind == ErrorEventKind::Daemon)
    })
    .await;
    let ClientEvent::Error(error) = error else {
        unreachable!()
    };
    assert!(error.message.contains("decryption failed"));

    // Non-error chatter arrives as log events
    client
        .call(
            "stderr",
            Some(serde_json::json!({ "line": "WARN ReceiveThread - something odd" })),
        )
        .await
        .unwrap();
    expect_event(&mut events, |e| {
        matches!(e, ClientEvent::Log(log) if log.line.contains("something odd"))
    })
    .await;

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_daemon_death_triggers_reconnect() {
    let client = connected().await;
    let mut events = client.subscribe();

    // The mock exits; the supervisor should respawn it
    let _ = client.call("exit", None).await;

    let closed = expect_event(&mut events, |e| matches!(e, ClientEvent::Closed { .. })).await;
    let ClientEvent::Closed { intentional } = closed else {
        unreachable!()
    };
    assert!(!intentional);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if client.state().await == ConnectionState::Connected {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "daemon was not respawned"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The respawned daemon answers calls
    client.version().await.unwrap();

    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_intentional_shutdown_emits_intentional_close() {
    let client = connected().await;
    let mut events = client.subscribe();

    client.graceful_shutdown().await.unwrap();

    let closed = expect_event(&mut events, |e| matches!(e, ClientEvent::Closed { .. })).await;
    let ClientEvent::Closed { intentional } = closed else {
        unreachable!()
    };
    assert!(intentional);

    // No reconnect follows an intentional shutdown
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_bot_runs_commands_from_daemon_pushes() {
    use async_trait::async_trait;
    use relaybot::{Bot, BotBuilder, Command, IncomingMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Ping {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Command for Ping {
        async fn execute(&self, bot: &Bot, msg: &IncomingMessage) -> relaybot::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            bot.reply(msg, "pong").await;
            Ok(())
        }
    }

    let client = connected().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let bot = BotBuilder::new(client.clone())
        .command("ping", Ping { calls: calls.clone() })
        .build();
    bot.run().await;

    let push = serde_json::json!({
        "method": "receive",
        "params": {
            "envelope": {
                "source": "+15550000000",
                "dataMessage": { "message": "!ping" }
            }
        }
    });
    client.call("emit", Some(push)).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while calls.load(Ordering::SeqCst) == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "command was not dispatched"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    bot.stop().await;
    client.graceful_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_over_one_process() {
    let client = connected().await;

    let (a, b, c) = tokio::join!(
        client.version(),
        client.send_message("+15550000000", "one", &[]),
        client.send_message("+15550000000", "two", &[]),
    );
    a.unwrap();
    assert_eq!(b.unwrap().timestamp, 123);
    assert_eq!(c.unwrap().timestamp, 123);

    client.graceful_shutdown().await.unwrap();
}
