//! Connection-and-dispatch engine wiring.
//!
//! The accept loop terminates TLS, captures the peer chain, and serves
//! each connection through the axum router. `GET /` upgrades to the binary
//! WebSocket after identity extraction; `GET /status` is the liveness
//! probe. Every request is logged with a generated UUID and its duration.
//!
//! Per-connection lifecycle: register in the socket registry and emit
//! CONNECTED, pump frames until the peer goes away, then deregister and
//! emit DISCONNECTED. Both emissions are best-effort and never block
//! state progression.
use anyhow::Result;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use futures::{FutureExt, StreamExt};
use hyper_util::rt::TokioIo;
use rustls::pki_types::CertificateDer;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use uuid::Uuid;

use drover_telemetry::{BinarySerializer, DispatchEngine, RequestIdentity};
use drover_wire::{ConnectivityStatus, TOPIC_CONNECTIVITY};

use crate::config::IngressConfig;
use crate::connectivity::connectivity_record;
use crate::identity;
use crate::registry::SocketRegistry;
use crate::socket::{run_writer_loop, SocketManager};

/// Optional header naming the network path the device is using.
pub const NETWORK_INTERFACE_HEADER: &str = "X-Network-Interface";

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

pub struct IngressServer {
    config: Arc<IngressConfig>,
    dispatch: Arc<DispatchEngine>,
    registry: Arc<SocketRegistry>,
    // Snapshot of record types with a reliable-ack source; read-only.
    reliable_ack_types: Arc<HashSet<String>>,
    shutdown_rx: watch::Receiver<bool>,
}

// Per-connection material injected into every request on that connection.
#[derive(Clone)]
struct ConnectionMeta {
    peer_certs: Arc<Vec<CertificateDer<'static>>>,
    remote_addr: SocketAddr,
}

impl IngressServer {
    pub fn new(
        config: Arc<IngressConfig>,
        dispatch: Arc<DispatchEngine>,
        registry: Arc<SocketRegistry>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let reliable_ack_types = Arc::new(config.reliable_ack_sources.keys().cloned().collect());
        Arc::new(Self {
            config,
            dispatch,
            registry,
            reliable_ack_types,
            shutdown_rx,
        })
    }

    /// Accept TLS connections until shutdown flips.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
        let app = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (tcp, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "tcp accept failed");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let app = app.clone();
                    tokio::spawn(serve_tls_connection(app, acceptor, tcp, remote_addr));
                }
            }
        }
        Ok(())
    }

    fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(serve_binary_ws))
            .route("/status", get(status))
            .layer(middleware::from_fn(log_requests))
            .with_state(self.clone())
    }

    async fn run_socket(
        self: Arc<Self>,
        socket: WebSocket,
        identity: RequestIdentity,
        network_interface: String,
    ) {
        metrics::counter!("ingress_connections_total").increment(1);
        let (out_tx, out_rx) = mpsc::channel(self.config.ack_queue_depth);
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let sm = SocketManager::new(
            identity,
            network_interface,
            out_tx,
            cancel_tx.clone(),
            self.config.transmit_decoded_records,
            self.config.max_frame_bytes,
        );
        let serializer =
            BinarySerializer::new(sm.identity().clone(), self.reliable_ack_types.clone());

        // Fold server shutdown into this connection's cancellation scope.
        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_cancel = cancel_tx.clone();
        let shutdown_task = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow_and_update() {
                    shutdown_cancel.send_replace(true);
                    break;
                }
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let (sink, mut stream) = socket.split();
        let writer_task = tokio::spawn(run_writer_loop(sink, out_rx, cancel_tx));

        self.register_socket(&sm, &serializer);
        let read_loop = {
            let sm = sm.clone();
            let serializer = serializer.clone();
            let dispatch = self.dispatch.clone();
            async move {
                sm.process_telemetry(&serializer, &dispatch, &mut stream)
                    .await
            }
        };
        // A panicking read loop must not skip deregistration or take other
        // connections down with it.
        let read_result = AssertUnwindSafe(read_loop).catch_unwind().await;
        self.deregister_socket(&sm, &serializer);
        if read_result.is_err() {
            tracing::error!(uuid = %sm.uuid(), "telemetry read loop panicked");
        }

        sm.cancel();
        shutdown_task.abort();
        let mut writer_task = writer_task;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
            .await
            .is_err()
        {
            writer_task.abort();
        }
    }

    fn register_socket(&self, sm: &Arc<SocketManager>, serializer: &Arc<BinarySerializer>) {
        self.registry.register(sm.clone());
        metrics::gauge!("ingress_active_sockets").increment(1.0);
        self.emit_connectivity(sm, serializer, ConnectivityStatus::Connected);
    }

    fn deregister_socket(&self, sm: &Arc<SocketManager>, serializer: &Arc<BinarySerializer>) {
        self.registry.deregister(sm);
        metrics::gauge!("ingress_active_sockets").decrement(1.0);
        self.emit_connectivity(sm, serializer, ConnectivityStatus::Disconnected);
    }

    fn emit_connectivity(
        &self,
        sm: &Arc<SocketManager>,
        serializer: &Arc<BinarySerializer>,
        status: ConnectivityStatus,
    ) {
        // Deployments without a connectivity rule skip the work entirely.
        if !self.dispatch.has_topic(TOPIC_CONNECTIVITY) {
            return;
        }
        match connectivity_record(sm, serializer, status) {
            Ok(record) => self.dispatch.dispatch(&record),
            Err(err) => tracing::warn!(
                device_id = %sm.identity().device_id,
                status = status.as_str(),
                error = %err,
                "connectivity event emission failed"
            ),
        }
    }
}

async fn serve_tls_connection(
    app: Router,
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    remote_addr: SocketAddr,
) {
    let tls = match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            tracing::info!(remote = %remote_addr, error = %err, "tls handshake failed");
            return;
        }
        Err(_) => {
            tracing::info!(remote = %remote_addr, "tls handshake timed out");
            return;
        }
    };
    let peer_certs: Vec<CertificateDer<'static>> = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .unwrap_or_default();
    let app = app.layer(Extension(ConnectionMeta {
        peer_certs: Arc::new(peer_certs),
        remote_addr,
    }));

    let hyper_service = hyper::service::service_fn(
        move |request: hyper::Request<hyper::body::Incoming>| app.clone().oneshot(request),
    );
    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(tls), hyper_service)
        .with_upgrades()
        .await
    {
        tracing::debug!(remote = %remote_addr, error = %err, "http connection ended with error");
    }
}

// Liveness probe for the mTLS listener.
async fn status() -> &'static str {
    "mtls ok"
}

async fn serve_binary_ws(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<IngressServer>>,
    Extension(meta): Extension<ConnectionMeta>,
    headers: HeaderMap,
) -> Response {
    if engine.config.tls_pass_through.is_none() {
        identity::log_peer_certificate(&meta.peer_certs);
    }
    // Identity failures abort the request here, before the upgrade: an
    // unauthenticated peer never reaches the registry.
    let identity = match identity::extract_identity(
        &headers,
        &meta.peer_certs,
        engine.config.tls_pass_through,
        engine.config.direct_cert_selection,
    ) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!(remote = %meta.remote_addr, error = %err, "identity extraction failed");
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };
    let network_interface = headers
        .get(NETWORK_INTERFACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ws.protocols(["binary"])
        .on_upgrade(move |socket| engine.run_socket(socket, identity, network_interface))
}

async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote = request
        .extensions()
        .get::<ConnectionMeta>()
        .map(|meta| meta.remote_addr.to_string())
        .unwrap_or_default();
    let start = Instant::now();
    tracing::info!(uuid = %request_id, method = %method, path = %path, remote = %remote, "request_start");
    let response = next.run(request).await;
    tracing::info!(
        uuid = %request_id,
        method = %method,
        path = %path,
        remote = %remote,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request_end"
    );
    response
}
