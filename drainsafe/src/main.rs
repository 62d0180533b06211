//! Drainsafe
//!
//! Cordons and drains Kubernetes nodes ahead of cloud platform maintenance.
//! The `agent` role runs as a DaemonSet and watches the instance metadata
//! service for scheduled events; the `controller` role drives every node
//! through cordon, drain and uncordon.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command};
use config::Config;
use drainsafe_core::metrics::MetricsRegistry;
use drainsafe_core::{
    ApprovalGate, CompletionSignal, EventDetector, ImdsClient, MetadataService, NoGate,
    NodeStateMachine, StateWriter,
};
use drainsafe_k8s::{
    run_agent_controller, run_controller, K8sClient, KubeNodeStore, KubeRecorder, NodeOperator,
    RepairmanGate,
};

/// Reporting component on published events
const COMPONENT: &str = "drainsafe";

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Build the writer shared by every loop of this process
fn state_writer(client: &K8sClient, pod_name: &str) -> Arc<StateWriter> {
    Arc::new(StateWriter::new(
        Arc::new(KubeNodeStore::new(client.clone())),
        Arc::new(KubeRecorder::new(
            client.inner().clone(),
            COMPONENT,
            Some(pod_name.to_string()),
        )),
        Arc::new(MetricsRegistry::new()),
        pod_name,
    ))
}

/// Run the cluster-wide node maintenance controller
async fn run_controller_role(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let pod_name = config.require_pod_name()?;
    info!(pod = %pod_name, "Starting Drainsafe controller");

    let client = K8sClient::new().await?;
    client
        .health_check()
        .await
        .context("Cannot list nodes at startup")?;

    let gate: Arc<dyn ApprovalGate> = if config.gate.enabled {
        info!(kind = %config.gate.kind, "Repairman approval gate enabled");
        Arc::new(RepairmanGate::new(client.inner().clone()))
    } else {
        Arc::new(NoGate)
    };

    let executor = Arc::new(NodeOperator::new(
        client.clone(),
        config.drain.to_drain_config(),
        config.dry_run,
    ));

    let machine = Arc::new(NodeStateMachine::new(
        state_writer(&client, &pod_name),
        executor,
        gate,
        config.gate.kind.clone(),
    ));

    run_controller(&client, machine, shutdown_rx).await;

    info!("Drainsafe controller shutdown complete");
    Ok(())
}

/// Run the per-node scheduled event agent
async fn run_agent_role(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let node_name = config.require_node_name()?;
    let pod_name = config.require_pod_name()?;
    info!(node = %node_name, pod = %pod_name, "Starting Drainsafe agent on node");

    let client = K8sClient::new().await?;
    client
        .health_check()
        .await
        .context("Cannot list nodes at startup")?;

    let metadata: Arc<dyn MetadataService> = Arc::new(ImdsClient::new(
        config.metadata.endpoint.clone(),
        config.metadata.timeout,
    ));
    let writer = state_writer(&client, &pod_name);

    let detector = EventDetector::resolve(
        node_name.clone(),
        metadata.clone(),
        writer.clone(),
        config.detector.interval,
    )
    .await
    .context("Failed to resolve instance identity")?;

    let completion = Arc::new(CompletionSignal::new(
        metadata,
        writer,
        detector.instance_id(),
    ));

    tokio::join!(
        detector.run(shutdown_rx.clone()),
        run_agent_controller(&client, &node_name, completion, shutdown_rx),
    );

    info!("Drainsafe agent shutdown complete");
    Ok(())
}

/// Start the Prometheus metrics HTTP server
async fn start_metrics_server(port: u16) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = port, "Metrics server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let metrics_output = prometheus::TextEncoder::new()
                .encode_to_string(&prometheus::gather())
                .unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                metrics_output.len(),
                metrics_output
            );

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Flip the shutdown channel on SIGINT or SIGTERM
async fn wait_for_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }

    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), role = ?cli.command, "Drainsafe starting");

    // Load configuration
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        warn!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.node_name.is_some() {
        config.node_name = cli.node_name;
    }
    if cli.pod_name.is_some() {
        config.pod_name = cli.pod_name;
    }
    config = config.with_identity_from_env();

    config.validate().context("Invalid configuration")?;

    info!(dry_run = config.dry_run, "Configuration loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    match cli.command {
        Command::Controller => run_controller_role(config, shutdown_rx).await,
        Command::Agent => run_agent_role(config, shutdown_rx).await,
    }
}
