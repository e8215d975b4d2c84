//! Socket writer and receive loop for one open session

use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use crate::websocket::{DispatchOutcome, MessageDispatcher, OutboundMessage};

use super::stats::SessionStats;
use super::types::CloseReason;

/// Sole writer of the socket. Forwards queued frames until shutdown or the
/// channel closes, then hands the sink back so the caller can finish the
/// close handshake.
pub(crate) async fn run_writer<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
    stats: Arc<SessionStats>,
) -> S
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };

                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "Failed to write frame, stopping writer");
                    break;
                }

                if msg == OutboundMessage::Heartbeat {
                    stats.record_heartbeat();
                }
            }
        }
    }

    sink
}

/// Read frames until the server closes, the transport fails or a local
/// shutdown is requested.
pub(crate) async fn receive_loop<R>(
    session_id: Uuid,
    stream: &mut R,
    dispatcher: &MessageDispatcher,
    stats: &SessionStats,
    shutdown: &mut broadcast::Receiver<()>,
) -> CloseReason
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!(session_id = %session_id, "Shutdown requested, closing session");
                return CloseReason::Local;
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                stats.record_frame();
                match dispatcher.dispatch(text.as_str()).await {
                    Ok(DispatchOutcome::UserCreated) => stats.record_user_created(),
                    Ok(_) => {}
                    Err(e) => {
                        stats.record_malformed();
                        tracing::warn!(
                            session_id = %session_id,
                            code = e.code(),
                            error = %e,
                            "Discarding frame"
                        );
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                    .unwrap_or((None, String::new()));
                tracing::info!(
                    session_id = %session_id,
                    code = ?code,
                    reason = %reason,
                    "Received close frame"
                );
                return CloseReason::Remote { code, reason };
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(session_id = %session_id, len = data.len(), "Ignoring binary frame");
            }
            // Pings are answered by tungstenite
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                return CloseReason::Transport {
                    error: e.to_string(),
                };
            }
            None => {
                tracing::warn!(session_id = %session_id, "Stream ended without close frame");
                return CloseReason::Transport {
                    error: "stream ended without close frame".to_string(),
                };
            }
        }
    }
}
