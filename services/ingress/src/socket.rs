//! Per-connection socket manager.
//!
//! Each upgraded WebSocket is owned by exactly one manager. The read loop
//! runs in the connection task; a dedicated writer task owns the send half
//! and is the only code that ever writes a frame, so replies from the ack
//! router never interleave with each other or with close frames. Everyone
//! else enqueues onto the outbound channel.
use axum::extract::ws::Message as WsMessage;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use drover_telemetry::{BinarySerializer, DispatchEngine, Record, RequestIdentity};

pub struct SocketManager {
    uuid: String,
    identity: RequestIdentity,
    // Best-effort label of the network path, from the upgrade request.
    network_interface: String,
    // Outbound frame queue drained by the writer task.
    out_tx: mpsc::Sender<WsMessage>,
    // Per-connection cancellation scope.
    cancel_tx: watch::Sender<bool>,
    transmit_decoded: bool,
    max_frame_bytes: usize,
}

impl SocketManager {
    pub fn new(
        identity: RequestIdentity,
        network_interface: String,
        out_tx: mpsc::Sender<WsMessage>,
        cancel_tx: watch::Sender<bool>,
        transmit_decoded: bool,
        max_frame_bytes: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4().to_string(),
            identity,
            network_interface,
            out_tx,
            cancel_tx,
            transmit_decoded,
            max_frame_bytes,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    pub fn network_interface(&self) -> &str {
        &self.network_interface
    }

    /// Cancel the connection scope: the read loop and writer task exit on
    /// the next poll. `send_replace` so the flag sticks even when no
    /// receiver is subscribed yet.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub(crate) fn decode(
        self: &Arc<Self>,
        serializer: &Arc<BinarySerializer>,
        frame: Bytes,
    ) -> drover_telemetry::Result<Record> {
        serializer.decode(frame, &self.uuid, self.transmit_decoded)
    }

    /// Drive the read loop until the peer closes, a read fails, or the
    /// scope is cancelled. Frames are decoded and dispatched in arrival
    /// order; non-binary frames and decode failures are counted and
    /// skipped without tearing the connection down.
    pub async fn process_telemetry<S>(
        self: &Arc<Self>,
        serializer: &Arc<BinarySerializer>,
        dispatch: &DispatchEngine,
        frames: &mut S,
    ) where
        S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    {
        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow() {
            return;
        }
        loop {
            tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
                frame = frames.next() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        Ok(WsMessage::Binary(data)) => {
                            metrics::counter!("ingress_frames_total").increment(1);
                            if data.len() > self.max_frame_bytes {
                                metrics::counter!("ingress_decode_errors_total").increment(1);
                                tracing::warn!(
                                    uuid = %self.uuid,
                                    len = data.len(),
                                    max = self.max_frame_bytes,
                                    "oversized frame skipped"
                                );
                                continue;
                            }
                            match self.decode(serializer, Bytes::from(data)) {
                                Ok(record) => dispatch.dispatch(&record),
                                Err(err) => {
                                    metrics::counter!("ingress_decode_errors_total").increment(1);
                                    tracing::warn!(uuid = %self.uuid, error = %err, "frame decode failed");
                                }
                            }
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {
                            metrics::counter!("ingress_non_binary_frames_total").increment(1);
                        }
                        Err(err) => {
                            tracing::info!(uuid = %self.uuid, error = %err, "websocket read failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Write an ACK (or NACK when `error` is set) back to the device.
    ///
    /// Called from the ack router concurrently with the read loop; the
    /// outbound channel serializes the actual writes. Failures are logged
    /// and dropped, never retried.
    pub fn respond_to_vehicle(&self, record: &Record, error: Option<&str>) {
        let Some(target) = record.ack_target() else {
            return;
        };
        let body = target.reply_payload(record, error);
        if let Err(err) = self.out_tx.try_send(WsMessage::Binary(body.to_vec())) {
            metrics::counter!("ingress_ack_write_errors_total").increment(1);
            tracing::warn!(uuid = %self.uuid, error = %err, "reply enqueue failed");
        }
    }
}

/// Drain outbound frames into the send half. Single writer per socket;
/// any write failure cancels the connection scope and exits.
pub(crate) async fn run_writer_loop<S>(
    mut sink: S,
    mut out_rx: mpsc::Receiver<WsMessage>,
    cancel_tx: watch::Sender<bool>,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut cancel_rx = cancel_tx.subscribe();
    if *cancel_rx.borrow() {
        let _ = sink.close().await;
        return;
    }
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            message = out_rx.recv() => {
                let Some(message) = message else { break };
                if let Err(err) = sink.send(message).await {
                    metrics::counter!("ingress_ack_write_errors_total").increment(1);
                    tracing::info!(error = %err, "websocket write failed");
                    cancel_tx.send_replace(true);
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}
