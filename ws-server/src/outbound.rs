//! Stop-and-wait outbound framing (§4.I "Outbound streaming uses a
//! stop-and-wait protocol with per-message integer IDs", §9 "Cooperative
//! stop-and-wait outbound protocol"). A dedicated writer task owns the
//! socket's write half, assigns each sent message a monotonic id, and
//! blocks until the matching ack arrives before sending the next one.
//! A single writer task drains an `mpsc` channel of outbound messages;
//! the ack side is a bounded channel of size 1, per §9.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use sync_proto::Downstream;

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    payload: &'a Downstream,
}

/// The client's acknowledgement of one outbound envelope, parsed ahead
/// of the ordinary `Upstream` vocabulary (§4.I, §9).
#[derive(Debug, Deserialize)]
pub struct AckFrame {
    pub ack: u64,
}

/// Front door for anything that wants to stream a `Downstream` message
/// to this socket: poke pumps, `pong` replies, error frames.
#[derive(Clone)]
pub struct OutboundWriter {
    outbox: mpsc::Sender<Downstream>,
}

impl OutboundWriter {
    pub async fn send(&self, message: Downstream) -> bool { self.outbox.send(message).await.is_ok() }

    pub fn try_send(&self, message: Downstream) -> bool { self.outbox.try_send(message).is_ok() }
}

/// Spawns the writer task and returns the front door plus the sender
/// side of its size-1 ack channel, which the connection's reader task
/// feeds every `AckFrame` it parses off the socket.
pub fn spawn(mut sink: SplitSink<WebSocket, Message>) -> (OutboundWriter, mpsc::Sender<u64>) {
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Downstream>(64);
    let (ack_tx, mut ack_rx) = mpsc::channel::<u64>(1);

    tokio::spawn(async move {
        let mut next_id: u64 = 0;
        while let Some(message) = outbox_rx.recv().await {
            let id = next_id;
            next_id += 1;
            let envelope = Envelope { id, payload: &message };
            let text = match serde_json::to_string(&envelope) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound message, skipping");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            // Stop-and-wait: don't send the next message until this one's
            // ack arrives. A disconnect drops `ack_tx` in the connection
            // task, closing `ack_rx` and releasing the writer rather than
            // hanging it forever (§5 "idempotent cancel()").
            loop {
                match ack_rx.recv().await {
                    Some(acked) if acked == id => break,
                    Some(stale) => {
                        warn!(expected = id, got = stale, "ignoring ack for a message that is not the one in flight");
                    }
                    None => return,
                }
            }
        }
    });

    (OutboundWriter { outbox: outbox_tx }, ack_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_frame_parses_out_of_an_envelope_shaped_object() {
        let parsed: AckFrame = serde_json::from_str(r#"{"ack": 3}"#).unwrap();
        assert_eq!(parsed.ack, 3);
    }
}
