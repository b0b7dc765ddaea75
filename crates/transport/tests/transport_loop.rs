//! Integration test: boots an in-process WebSocket server that plays the
//! agent side of the protocol, connects a real [`AgUiTransport`], and
//! exercises the full loop — connect, inbound validation and fan-out,
//! outbound sends, reconnection, and leak-free shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use agui_core::{Event, EventType, OverflowPolicy};
use agui_transport::{AgUiTransport, ErrorEvent, TransportBuilder};
use agui_validator::ValidationPolicy;

// ── Mini agent backend: in-process WS server ────────────────────────────

/// Handle to one accepted client connection.
struct AgentConn {
    /// Push a text frame to the client.
    send: mpsc::Sender<String>,
    /// Frames received from the client.
    recv: mpsc::Receiver<String>,
}

impl AgentConn {
    async fn push_event(&self, event: &Event) {
        let json = String::from_utf8(agui_core::encode_json(event).unwrap()).unwrap();
        self.send.send(json).await.unwrap();
    }
}

/// Boots a tiny WS server on an ephemeral port.  Each accepted
/// connection is handed to the test as an [`AgentConn`]; dropping it
/// closes the socket from the server side.
async fn start_mini_agent() -> (SocketAddr, mpsc::Receiver<AgentConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(8);

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            tokio::spawn(async move {
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let (mut sink, mut stream) = ws.split();

                let (msg_tx, mut msg_rx) = mpsc::channel::<String>(32);
                let (frame_tx, frame_rx) = mpsc::channel::<String>(32);
                let _ = conn_tx
                    .send(AgentConn {
                        send: msg_tx,
                        recv: frame_rx,
                    })
                    .await;

                let write_task = tokio::spawn(async move {
                    while let Some(text) = msg_rx.recv().await {
                        if sink.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    // Test dropped its handle: close the socket.
                    let _ = sink.send(Message::Close(None)).await;
                });

                while let Some(Ok(msg)) = stream.next().await {
                    if let Message::Text(text) = msg {
                        if frame_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                }
                write_task.abort();
            });
        }
    });

    (addr, conn_rx)
}

fn dev_transport(addr: SocketAddr) -> AgUiTransport {
    TransportBuilder::new(format!("ws://{addr}/"))
        .configure(|cfg| {
            cfg.validator.policy = ValidationPolicy::Development;
            cfg.backoff.initial_backoff = 10;
            cfg.backoff.max_backoff = 100;
            cfg.pool.drain_timeout = 1;
        })
        .build()
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_loop_roundtrip_and_clean_shutdown() {
    let (addr, mut conn_rx) = start_mini_agent().await;
    let transport = dev_transport(addr);
    let ctx = CancellationToken::new();

    transport.connect(&ctx).await.unwrap();
    let mut agent = tokio::time::timeout(Duration::from_secs(5), conn_rx.recv())
        .await
        .expect("timeout waiting for client connection")
        .expect("no connection");

    // Typed handler: count text deltas.
    let deltas = Arc::new(AtomicUsize::new(0));
    let deltas2 = deltas.clone();
    transport.add_event_handler(EventType::TextMessageContent, move |_| {
        deltas2.fetch_add(1, Ordering::SeqCst);
    });

    // Agent streams a happy run.
    let events = [
        Event::run_started("T1", "R1"),
        Event::text_message_start("M1"),
        Event::text_message_content("M1", "He"),
        Event::text_message_content("M1", "llo"),
        Event::text_message_end("M1"),
        Event::run_finished("T1", "R1"),
    ];
    for event in &events {
        agent.push_event(event).await;
    }

    // The receive() stream yields all six, in order.
    let mut stream = transport.receive();
    for expected in &events {
        let got = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timeout on receive stream")
            .expect("stream ended early");
        assert_eq!(&got, expected);
    }
    assert_eq!(deltas.load(Ordering::SeqCst), 2);

    // Outbound: the agent sees our event on the wire.
    transport
        .send(&ctx, &Event::custom("ping", serde_json::json!({"n": 1})))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), agent.recv.recv())
        .await
        .expect("timeout waiting for outbound frame")
        .expect("agent connection dropped");
    assert!(frame.contains("\"eventType\":\"CUSTOM\""));
    assert!(frame.contains("\"ping\""));

    let stats = transport.stats();
    assert_eq!(stats.events_sent, 1);
    assert!(stats.events_received >= 6);

    // Shutdown leaves no tasks behind.
    transport.close(&ctx).await.unwrap();
    assert_eq!(transport.active_tasks(), 0);
    // End-of-stream marker after close.
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn production_policy_withholds_orphan_end() {
    let (addr, mut conn_rx) = start_mini_agent().await;
    let transport = TransportBuilder::new(format!("ws://{addr}/"))
        .configure(|cfg| {
            cfg.validator.policy = ValidationPolicy::Production;
            cfg.pool.drain_timeout = 1;
        })
        .build()
        .unwrap();
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();
    let agent = conn_rx.recv().await.unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let handled2 = handled.clone();
    transport.add_event_handler(EventType::TextMessageEnd, move |_| {
        handled2.fetch_add(1, Ordering::SeqCst);
    });

    agent
        .push_event(&Event::text_message_end("M2").with_timestamp_ms(1))
        .await;

    // The violation surfaces on errors() with delivered=false...
    let mut errors = transport.errors();
    let error = tokio::time::timeout(Duration::from_secs(5), errors.next())
        .await
        .expect("timeout on error stream")
        .expect("error stream ended");
    match error {
        ErrorEvent::Sequence {
            event_type,
            delivered,
            errors,
        } => {
            assert_eq!(event_type, EventType::TextMessageEnd);
            assert!(!delivered);
            assert_eq!(errors[0].kind.as_str(), "orphan-end");
        }
        other => panic!("expected Sequence error, got {other:?}"),
    }
    // ...and the event never reached handlers or the receive stream.
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert!(transport.receive().try_next().is_none());

    transport.close(&ctx).await.unwrap();
}

#[tokio::test]
async fn reconnects_after_server_close_and_keeps_sending() {
    let (addr, mut conn_rx) = start_mini_agent().await;
    let transport = dev_transport(addr);
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();

    // Drop the first server-side connection: the client must reconnect.
    let first = conn_rx.recv().await.unwrap();
    drop(first);

    let mut second = tokio::time::timeout(Duration::from_secs(5), conn_rx.recv())
        .await
        .expect("client did not reconnect")
        .unwrap();

    // Wait until the pool reports healthy again, then send.
    transport.connect(&ctx).await.unwrap();
    transport
        .send(&ctx, &Event::custom("after-reconnect", serde_json::json!(true)))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), second.recv.recv())
        .await
        .expect("timeout waiting for frame")
        .unwrap();
    assert!(frame.contains("after-reconnect"));

    assert!(transport.stats().reconnect_count >= 1);
    transport.close(&ctx).await.unwrap();
    assert_eq!(transport.active_tasks(), 0);
}

#[tokio::test]
async fn queue_subscription_backpressure_drops_oldest() {
    let (addr, mut conn_rx) = start_mini_agent().await;
    let transport = dev_transport(addr);
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();
    let agent = conn_rx.recv().await.unwrap();

    let sub = transport.subscribe_events(
        &[EventType::Custom],
        Some(2),
        Some(OverflowPolicy::DropOldest),
    );

    for i in 1..=4 {
        agent
            .push_event(&Event::custom(format!("e{i}"), serde_json::json!(i)))
            .await;
    }

    // Give the event loop time to fan out all four before we read.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let Event::Custom { name, .. } = sub.recv().await.unwrap() else {
        panic!("expected custom event");
    };
    assert_eq!(name, "e3");
    let Event::Custom { name, .. } = sub.recv().await.unwrap() else {
        panic!("expected custom event");
    };
    assert_eq!(name, "e4");
    assert_eq!(sub.dropped_count(), 2);

    transport.close(&ctx).await.unwrap();
}

#[tokio::test]
async fn handler_subscription_unsubscribes_all_types() {
    let (addr, mut conn_rx) = start_mini_agent().await;
    let transport = dev_transport(addr);
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();
    let agent = conn_rx.recv().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = seen.clone();
    let sub = transport.subscribe(
        &[EventType::StepStarted, EventType::StepFinished],
        move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        },
    );

    agent.push_event(&Event::run_started("T", "R")).await;
    agent.push_event(&Event::step_started("plan")).await;
    agent.push_event(&Event::step_finished("plan")).await;

    // Wait for both step events to land.
    let mut stream = transport.receive();
    for _ in 0..3 {
        let _ = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    // After unsubscribe, further step events are ignored.
    transport.unsubscribe(sub);
    agent.push_event(&Event::step_started("again")).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    transport.close(&ctx).await.unwrap();
}

#[tokio::test]
async fn send_after_close_fails_fast() {
    let (addr, _conn_rx) = start_mini_agent().await;
    let transport = dev_transport(addr);
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();
    transport.close(&ctx).await.unwrap();

    let err = transport
        .send(&ctx, &Event::custom("late", serde_json::json!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, agui_transport::TransportError::Shutdown));
}

#[tokio::test]
async fn oversized_outbound_event_is_rejected() {
    let (addr, _conn_rx) = start_mini_agent().await;
    let transport = TransportBuilder::new(format!("ws://{addr}/"))
        .configure(|cfg| {
            cfg.validator.policy = ValidationPolicy::Development;
            cfg.max_message_size = 128;
            cfg.pool.drain_timeout = 1;
        })
        .build()
        .unwrap();
    let ctx = CancellationToken::new();
    transport.connect(&ctx).await.unwrap();

    let big = "x".repeat(4096);
    let err = transport
        .send(&ctx, &Event::custom("big", serde_json::json!(big)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        agui_transport::TransportError::MessageTooLarge { .. }
    ));

    transport.close(&ctx).await.unwrap();
}
