use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static OBS_INIT: OnceLock<()> = OnceLock::new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_observability() -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });

    let handle = METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("install metrics recorder");
        describe_metrics();
        handle
    });
    handle.clone()
}

// Metric descriptions are registered exactly once per process lifetime,
// guarded by METRICS_HANDLE above.
fn describe_metrics() {
    describe_counter!("reliable_ack", "The number of reliable acknowledgements.");
    describe_counter!(
        "reliable_ack_miss",
        "The number of missing reliable acknowledgements."
    );
    describe_counter!("ingress_frames_total", "Binary frames read from sockets.");
    describe_counter!(
        "ingress_non_binary_frames_total",
        "Frames skipped because they were not binary."
    );
    describe_counter!(
        "ingress_decode_errors_total",
        "Frames that failed envelope decoding."
    );
    describe_counter!(
        "ingress_ack_write_errors_total",
        "Reply frames that could not be written back."
    );
    describe_counter!("ingress_connections_total", "WebSocket upgrades accepted.");
    describe_counter!(
        "ingress_records_dispatched_total",
        "Records fanned out to configured producers."
    );
    describe_gauge!("ingress_active_sockets", "Currently registered sockets.");
}

pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}
