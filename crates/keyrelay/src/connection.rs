//! WebSocket connection driver.
//!
//! Each upgraded socket is split into a reader, which feeds text frames to a
//! [`Session`] in arrival order, and a writer task, which drains the
//! connection's bounded outbound queue onto the socket. A per-connection
//! [`CancellationToken`] ties the two halves together so that a failure on
//! either side unblocks the other immediately.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::metrics;
use crate::registry::{ConnectionRegistry, OutboundFrame};
use crate::session::{Flow, Session};
use crate::ConnectionId;

static ACTIVE_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Depth of the outbound queue; envelopes to a full queue are refused
    pub outbound_queue: usize,
    /// How long the writer may keep flushing after the reader has stopped
    pub close_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            close_grace: Duration::from_secs(2),
        }
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    TransportError,
    WriterFailed,
    Protocol,
}

/// Drive one relay connection until it closes.
///
/// Teardown (releasing the identity) happens exactly once whichever side
/// ends the connection first.
#[instrument(
    name = "relay.connection",
    skip_all,
    fields(conn_id = %conn_id, identity = tracing::field::Empty)
)]
pub async fn handle_socket(
    socket: WebSocket,
    conn_id: ConnectionId,
    connection_registry: Arc<ConnectionRegistry>,
    config: ConnectionConfig,
) {
    let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::record_connection_count(active);
    info!("Connection opened");

    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
    let cancel = CancellationToken::new();

    let mut writer = tokio::spawn(
        write_loop(sink, outbound_rx, cancel.clone()).instrument(tracing::Span::current()),
    );

    let mut session = Session::new(conn_id, outbound_tx, connection_registry);

    let reason = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::WriterFailed,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if session.handle_frame(&text).await == Flow::Close {
                    break CloseReason::Protocol;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(len = data.len(), "Ignoring binary frame");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
            Some(Err(e)) => {
                debug!(error = %e, "WebSocket read error");
                break CloseReason::TransportError;
            }
        }
    };

    // Release the identity before flushing so no new envelopes are routed
    // here, then drop our sender so the writer sees the end of the queue.
    session.close();
    drop(session);

    // On a protocol close, give the writer a chance to deliver the final
    // error frame before cutting it off.
    let flushed = if reason == CloseReason::Protocol {
        match tokio::time::timeout(config.close_grace, &mut writer).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                debug!("Writer did not finish within grace period");
                None
            }
        }
    } else {
        None
    };
    cancel.cancel();
    let joined = match flushed {
        Some(joined) => joined,
        None => writer.await,
    };
    if let Err(e) = joined {
        warn!(error = %e, "Writer task failed");
    }

    let active = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    metrics::record_connection_count(active);
    info!(reason = ?reason, "Connection closed");
}

/// Drain the outbound queue onto the socket.
///
/// Stops when the queue closes, the socket fails, or the connection is
/// cancelled. A write failure cancels the connection so the reader stops too.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => return,
            sent = sink.send(Message::Text(frame.text)) => sent,
        };
        if let Err(e) = sent {
            debug!(error = %e, "WebSocket write error");
            cancel.cancel();
            return;
        }
    }

    tokio::select! {
        _ = cancel.cancelled() => {}
        closed = sink.close() => {
            if let Err(e) = closed {
                debug!(error = %e, "Failed to send close frame");
            }
        }
    }
}
