// Ingress service main entry point.
use anyhow::{bail, Context, Result};
use drover_telemetry::sinks::LogSink;
use drover_telemetry::{DispatchEngine, Producer};
use ingress::ack::run_ack_router;
use ingress::config::IngressConfig;
use ingress::observability;
use ingress::registry::SocketRegistry;
use ingress::server::IngressServer;
use ingress::tls;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability();
    let config = Arc::new(IngressConfig::from_env_or_yaml().context("load ingress config")?);
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    // Reliable sinks hold clones of ack_tx; the handle kept here keeps the
    // channel open for the router's whole lifetime.
    let (ack_tx, ack_rx) = mpsc::channel(config.ack_queue_depth);
    let dispatch = Arc::new(DispatchEngine::new(build_producers(&config)?));
    let registry = Arc::new(SocketRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let router_task = tokio::spawn(run_ack_router(
        ack_rx,
        registry.clone(),
        Arc::new(config.reliable_ack_sources.clone()),
        shutdown_rx.clone(),
    ));

    let acceptor = tls::acceptor_from_config(&config).context("build TLS acceptor")?;
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("bind ingress listener on {}:{}", config.host, config.port))?;
    tracing::info!(addr = %listener.local_addr()?, "ingress listener started");

    let server = IngressServer::new(config.clone(), dispatch, registry, shutdown_rx);
    let serve_task = tokio::spawn(server.serve(listener, acceptor));

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    drop(ack_tx);
    let _ = serve_task.await;
    let _ = router_task.await;
    tracing::info!("ingress stopped");
    Ok(())
}

// Resolve configured producer names into running sinks. Names are shared:
// a producer appearing under several topics is constructed once.
fn build_producers(config: &IngressConfig) -> Result<HashMap<String, Vec<Arc<dyn Producer>>>> {
    let mut named: HashMap<String, Arc<dyn Producer>> = HashMap::new();
    let mut rules: HashMap<String, Vec<Arc<dyn Producer>>> = HashMap::new();
    for (topic, names) in &config.dispatch_rules {
        let mut producers: Vec<Arc<dyn Producer>> = Vec::with_capacity(names.len());
        for name in names {
            let producer = match named.get(name) {
                Some(producer) => producer.clone(),
                None => {
                    let producer = build_producer(name)
                        .with_context(|| format!("dispatch rule for topic `{topic}`"))?;
                    named.insert(name.clone(), producer.clone());
                    producer
                }
            };
            producers.push(producer);
        }
        rules.insert(topic.clone(), producers);
    }
    Ok(rules)
}

fn build_producer(name: &str) -> Result<Arc<dyn Producer>> {
    match name {
        "logger" => Ok(Arc::new(LogSink::new(name))),
        other => bail!("unknown producer `{other}`"),
    }
}
