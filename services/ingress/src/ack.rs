//! Reliable-ack routing.
//!
//! A single consumer drains the process-wide ack queue; reliable sinks are
//! the producers. Keeping the router single-consumer means per-socket
//! reply ordering only has to be enforced once, in the socket manager's
//! writer task.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use drover_telemetry::Record;

use crate::registry::SocketRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Delivered,
    ConnectionGone,
    NoAckTarget,
}

/// Route one acknowledged record back to its originating socket.
pub fn route_ack(
    record: &Record,
    registry: &SocketRegistry,
    reliable_ack_sources: &HashMap<String, String>,
) -> AckOutcome {
    // A record without a reply hook is a malformed ack from a sink.
    if record.ack_target().is_none() {
        tracing::warn!(
            tx_type = record.tx_type(),
            "ack without reply hook dropped"
        );
        return AckOutcome::NoAckTarget;
    }
    // Absent source still proceeds; the label is just empty.
    let dispatcher = reliable_ack_sources
        .get(record.tx_type())
        .cloned()
        .unwrap_or_default();
    match registry.lookup(record.connection_id()) {
        Some(socket) => {
            metrics::counter!(
                "reliable_ack",
                "record_type" => record.tx_type().to_string(),
                "dispatcher" => dispatcher
            )
            .increment(1);
            socket.respond_to_vehicle(record, None);
            AckOutcome::Delivered
        }
        None => {
            metrics::counter!(
                "reliable_ack_miss",
                "record_type" => record.tx_type().to_string(),
                "dispatcher" => dispatcher
            )
            .increment(1);
            AckOutcome::ConnectionGone
        }
    }
}

/// Drain the ack queue until it closes or shutdown flips.
pub async fn run_ack_router(
    mut ack_rx: mpsc::Receiver<Record>,
    registry: Arc<SocketRegistry>,
    reliable_ack_sources: Arc<HashMap<String, String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            record = ack_rx.recv() => {
                let Some(record) = record else { break };
                route_ack(&record, &registry, &reliable_ack_sources);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message as WsMessage;
    use drover_telemetry::{BinarySerializer, RequestIdentity};
    use drover_wire::StreamMessage;
    use std::collections::HashSet;
    use std::time::Duration;

    fn sources() -> HashMap<String, String> {
        HashMap::from([("V".to_string(), "kafka".to_string())])
    }

    fn registered_socket(
        registry: &SocketRegistry,
    ) -> (
        Arc<crate::socket::SocketManager>,
        mpsc::Receiver<WsMessage>,
        Arc<BinarySerializer>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let socket = crate::socket::SocketManager::new(
            RequestIdentity::new("vehicle_device", "VIN123"),
            String::new(),
            out_tx,
            cancel_tx,
            false,
            1024,
        );
        registry.register(socket.clone());
        let serializer = BinarySerializer::new(
            socket.identity().clone(),
            Arc::new(HashSet::from(["V".to_string()])),
        );
        (socket, out_rx, serializer)
    }

    fn record_for(
        socket: &Arc<crate::socket::SocketManager>,
        serializer: &Arc<BinarySerializer>,
    ) -> Record {
        serializer
            .decode(
                StreamMessage {
                    txid: b"T1".to_vec(),
                    topic: b"V".to_vec(),
                    ..Default::default()
                }
                .to_bytes(),
                socket.uuid(),
                false,
            )
            .expect("decode")
    }

    #[tokio::test]
    async fn registered_connection_receives_exactly_one_reply() {
        let registry = SocketRegistry::new();
        let (socket, mut out_rx, serializer) = registered_socket(&registry);
        let record = record_for(&socket, &serializer);

        let outcome = route_ack(&record, &registry, &sources());
        assert_eq!(outcome, AckOutcome::Delivered);
        assert!(out_rx.recv().await.is_some());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deregistered_connection_is_a_miss_without_write() {
        let registry = SocketRegistry::new();
        let (socket, mut out_rx, serializer) = registered_socket(&registry);
        let record = record_for(&socket, &serializer);
        registry.deregister(&socket);

        let outcome = route_ack(&record, &registry, &sources());
        assert_eq!(outcome, AckOutcome::ConnectionGone);
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_ack_source_still_delivers() {
        let registry = SocketRegistry::new();
        let (socket, mut out_rx, serializer) = registered_socket(&registry);
        let record = record_for(&socket, &serializer);

        let outcome = route_ack(&record, &registry, &HashMap::new());
        assert_eq!(outcome, AckOutcome::Delivered);
        assert!(out_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn router_drains_queue_and_exits_on_close() {
        let registry = Arc::new(SocketRegistry::new());
        let (socket, mut out_rx, serializer) = registered_socket(&registry);
        let record = record_for(&socket, &serializer);

        let (ack_tx, ack_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = tokio::spawn(run_ack_router(
            ack_rx,
            registry.clone(),
            Arc::new(sources()),
            shutdown_rx,
        ));

        ack_tx.send(record).await.expect("enqueue ack");
        assert!(out_rx.recv().await.is_some());

        drop(ack_tx);
        tokio::time::timeout(Duration::from_secs(1), router)
            .await
            .expect("router exits when the queue closes")
            .expect("task");
    }
}
