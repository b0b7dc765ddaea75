//! Server-Sent Events connection session.
//!
//! Inbound-only HTTP stream: chunks are buffered and split on the blank
//! line between events, each event's `data:` payload is forwarded to the
//! pool, and the last seen `id:` is echoed as `Last-Event-ID` on
//! reconnect.  A server that no longer holds the requested ID signals a
//! gap with an `event: gap` frame, which surfaces on the transport error
//! stream.  Outbound sends go over a parallel HTTP POST channel when one
//! is configured.

use std::sync::Arc;

use tokio::sync::mpsc;

use agui_core::BoundedQueue;

use crate::config::TransportConfig;
use crate::connection::{ConnectionHandle, ConnectionState, InboundFrame, OutboundFrame};
use crate::error::{ErrorEvent, TransportError};
use crate::ws::frame_within_limit;

/// One parsed SSE event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Extract complete event blocks from the buffer.
///
/// Blocks are delimited by a blank line.  `data:` lines accumulate with
/// `\n` joins, `event:`/`id:`/`retry:` set their fields, `:` comment
/// lines are ignored.  The buffer is drained in place; a trailing partial
/// block stays for the next call.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // the \n\n delimiter

        let mut frame = SseFrame::default();
        let mut data_lines: Vec<String> = Vec::new();
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with(':') {
                continue; // comment / keepalive
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                frame.event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("id:") {
                frame.id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("retry:") {
                frame.retry = rest.trim().parse().ok();
            }
        }
        frame.data = data_lines.join("\n");
        if frame.event.is_some() || frame.id.is_some() || frame.retry.is_some() || !frame.data.is_empty()
        {
            frames.push(frame);
        }
    }

    frames
}

/// Run one SSE session to completion.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_session(
    handle: &Arc<ConnectionHandle>,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    config: &TransportConfig,
    inbound_tx: &mpsc::Sender<InboundFrame>,
    errors: &Arc<BoundedQueue<ErrorEvent>>,
    client: &reqwest::Client,
    last_event_id: &mut Option<String>,
    retry_hint_ms: &mut Option<u64>,
) -> anyhow::Result<()> {
    let mut request = client
        .get(&config.endpoint)
        .header("Accept", "text/event-stream");
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    let resuming_from = last_event_id.clone();
    if let Some(id) = &resuming_from {
        request = request.header("Last-Event-ID", id);
    }

    let mut response = tokio::time::timeout(config.op_timeout(), request.send())
        .await
        .map_err(|_| anyhow::anyhow!("connect timed out"))??
        .error_for_status()?;

    handle.set_state(ConnectionState::Connected);
    tracing::info!(conn_id = %handle.id, endpoint = %config.endpoint, "sse stream open");

    let mut buffer = String::new();
    loop {
        tokio::select! {
            chunk = response.chunk() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for frame in drain_frames(&mut buffer) {
                            handle_frame(
                                handle,
                                config,
                                inbound_tx,
                                errors,
                                frame,
                                last_event_id,
                                retry_hint_ms,
                                resuming_from.as_deref(),
                            )
                            .await;
                        }
                    }
                    Ok(None) => {
                        // Stream closed; flush a trailing partial block.
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                            for frame in drain_frames(&mut buffer) {
                                handle_frame(
                                    handle,
                                    config,
                                    inbound_tx,
                                    errors,
                                    frame,
                                    last_event_id,
                                    retry_hint_ms,
                                    resuming_from.as_deref(),
                                )
                                .await;
                            }
                        }
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame { bytes, ack, .. }) => {
                        let len = bytes.len();
                        let result = post_outbound(client, config, bytes).await;
                        if result.is_ok() {
                            handle.stats.record_sent(len);
                        }
                        let _ = ack.send(result);
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    handle: &Arc<ConnectionHandle>,
    config: &TransportConfig,
    inbound_tx: &mpsc::Sender<InboundFrame>,
    errors: &Arc<BoundedQueue<ErrorEvent>>,
    frame: SseFrame,
    last_event_id: &mut Option<String>,
    retry_hint_ms: &mut Option<u64>,
    resuming_from: Option<&str>,
) {
    if let Some(retry) = frame.retry {
        *retry_hint_ms = Some(retry);
    }
    if frame.event.as_deref() == Some("gap") {
        // The server resumed from its current tail instead of our
        // Last-Event-ID; events in between are gone.
        let _ = errors.try_push(
            ErrorEvent::ResumeGap {
                conn_id: handle.id.clone(),
                last_event_id: resuming_from.unwrap_or_default().to_string(),
            },
            agui_core::OverflowPolicy::DropOldest,
        );
        return;
    }
    if let Some(id) = frame.id {
        *last_event_id = Some(id);
    }
    if frame.data.is_empty() {
        return;
    }

    let bytes = frame.data.into_bytes();
    if !frame_within_limit(bytes.len(), config.max_message_size) {
        handle
            .stats
            .parse_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let _ = errors.try_push(
            ErrorEvent::Decode {
                conn_id: handle.id.clone(),
                detail: format!(
                    "sse event of {} bytes exceeds maxMessageSize {}",
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
            binary: false,
        })
        .await;
}

/// Outbound messages ride a parallel HTTP channel, never the SSE stream.
async fn post_outbound(
    client: &reqwest::Client,
    config: &TransportConfig,
    bytes: Vec<u8>,
) -> Result<(), TransportError> {
    let Some(endpoint) = &config.post_endpoint else {
        return Err(TransportError::SendUnsupported);
    };
    let mut request = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .body(bytes);
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    let response = tokio::time::timeout(config.op_timeout(), request.send())
        .await
        .map_err(|_| TransportError::SendTimeout)?
        .map_err(|e| TransportError::Config(e.to_string()))?;
    response
        .error_for_status()
        .map_err(|e| TransportError::Config(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\nid: 42\ndata: {\"x\":1}\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message"));
        assert_eq!(frames[0].id.as_deref(), Some("42"));
        assert_eq!(frames[0].data, "{\"x\":1}");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "first");
        assert_eq!(frames[1].data, "second");
    }

    #[test]
    fn partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut buf = String::from("data: line1\ndata: line2\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn comments_are_ignored() {
        let mut buf = String::from(": keepalive\n\n: another\ndata: real\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
    }

    #[test]
    fn retry_parses_as_millis() {
        let mut buf = String::from("retry: 5000\ndata: x\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].retry, Some(5000));
    }

    #[test]
    fn gap_event_has_no_data_requirement() {
        let mut buf = String::from("event: gap\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("gap"));
        assert!(frames[0].data.is_empty());
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut buf = String::from("data: payload\r\n\ndata: x\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].data, "payload");
    }
}
