//! WebSocket connection session.
//!
//! One session spans one physical connection: a writer draining the
//! connection's outbound queue, a reader forwarding decoded frames to the
//! pool's inbound channel, and protocol-native ping/pong keepalive with
//! idle detection.  The pool's supervisor loop owns reconnection.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};

use agui_core::BoundedQueue;

use crate::config::TransportConfig;
use crate::connection::{ConnectionHandle, ConnectionState, InboundFrame, OutboundFrame};
use crate::error::{ErrorEvent, TransportError};

/// Run one WebSocket session to completion.  Returns `Ok(())` on a
/// graceful peer close and `Err` on any failure; either way the caller
/// decides whether to reconnect.
pub(crate) async fn run_session(
    handle: &Arc<ConnectionHandle>,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    config: &TransportConfig,
    inbound_tx: &mpsc::Sender<InboundFrame>,
    errors: &Arc<BoundedQueue<ErrorEvent>>,
) -> anyhow::Result<()> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    for (name, value) in &config.headers {
        request.headers_mut().insert(
            HeaderName::try_from(name.as_str())?,
            HeaderValue::from_str(value)?,
        );
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let (ws, _response) = tokio::time::timeout(
        config.op_timeout(),
        tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| anyhow::anyhow!("connect timed out"))??;

    handle.set_state(ConnectionState::Connected);
    tracing::info!(conn_id = %handle.id, endpoint = %config.endpoint, "websocket connected");

    let (mut sink, mut stream) = ws.split();
    let mut last_read = Instant::now();
    let mut pending_pings: u32 = 0;
    let mut idle = tokio::time::interval(config.idle());
    idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    idle.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame { bytes, binary, ack }) => {
                        if bytes.len() > config.max_message_size {
                            let _ = ack.send(Err(TransportError::MessageTooLarge {
                                size: bytes.len(),
                                max: config.max_message_size,
                            }));
                            continue;
                        }
                        let len = bytes.len();
                        let msg = if binary {
                            Message::Binary(bytes)
                        } else {
                            Message::Text(String::from_utf8_lossy(&bytes).into_owned())
                        };
                        match sink.send(msg).await {
                            Ok(()) => {
                                handle.stats.record_sent(len);
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(TransportError::ConnectionClosed(
                                    handle.id.clone(),
                                )));
                                return Err(e.into());
                            }
                        }
                    }
                    // The pool dropped its sender: shutdown.
                    None => return Ok(()),
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(m)) => {
                        last_read = Instant::now();
                        pending_pings = 0;
                        match m {
                            Message::Text(text) => {
                                deliver(handle, config, inbound_tx, errors, text.into_bytes(), false)
                                    .await;
                            }
                            Message::Binary(bytes) => {
                                deliver(handle, config, inbound_tx, errors, bytes, true).await;
                            }
                            Message::Ping(payload) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Message::Pong(_) => {}
                            Message::Close(_) => {
                                tracing::info!(conn_id = %handle.id, "peer closed websocket");
                                return Ok(());
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }

            _ = idle.tick() => {
                if last_read.elapsed() >= config.idle() {
                    if pending_pings >= 2 {
                        anyhow::bail!("peer unresponsive after 2 keepalive pings");
                    }
                    pending_pings += 1;
                    sink.send(Message::Ping(Vec::new())).await?;
                    tracing::debug!(conn_id = %handle.id, pending_pings, "idle keepalive ping");
                }
            }
        }
    }
}

/// Size-check an inbound frame and hand it to the pool's inbound channel.
async fn deliver(
    handle: &Arc<ConnectionHandle>,
    config: &TransportConfig,
    inbound_tx: &mpsc::Sender<InboundFrame>,
    errors: &Arc<BoundedQueue<ErrorEvent>>,
    bytes: Vec<u8>,
    binary: bool,
) {
    if !frame_within_limit(bytes.len(), config.max_message_size) {
        handle
            .stats
            .parse_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let _ = errors.try_push(
            ErrorEvent::Decode {
                conn_id: handle.id.clone(),
                detail: format!(
                    "inbound frame of {} bytes exceeds maxMessageSize {}",
                    bytes.len(),
                    config.max_message_size
                ),
            },
            agui_core::OverflowPolicy::DropOldest,
        );
        return;
    }
    handle.stats.record_received(bytes.len());
    let _ = inbound_tx
        .send(InboundFrame {
            conn_id: handle.id.clone(),
            bytes,
            binary,
        })
        .await;
}

/// Frames exactly at the limit pass; one byte over is rejected.
pub(crate) fn frame_within_limit(len: usize, max: usize) -> bool {
    len <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_inclusive() {
        assert!(frame_within_limit(1024, 1024));
        assert!(!frame_within_limit(1025, 1024));
        assert!(frame_within_limit(0, 1024));
    }
}
