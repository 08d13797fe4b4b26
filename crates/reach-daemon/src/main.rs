#![deny(unsafe_code)]
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use clap::Parser;
use reach_core::NodeId;
use reach_flow::{FlowGate, FlowGateConfig};
use reach_peerstore::PeerStore;
use reach_poee::PoeeKeypair;
use reach_telemetry::LogFormat;
use reach_transport::{http_router, HttpTransportState};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reach-daemon", version, about = "Reach mesh node daemon")]
struct Args {
    /// Path to `mesh_config.json`. Defaults are used if the file doesn't exist.
    #[arg(long, default_value = "mesh_config.json")]
    config: PathBuf,

    /// Node data directory: keys, trust store, telemetry.
    #[arg(long, default_value = ".reach")]
    data_dir: PathBuf,

    /// Override the bind address from the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Clone)]
struct DaemonState {
    node_id: NodeId,
    peer_store: Arc<PeerStore>,
    flow_gate: Arc<FlowGate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "reach=debug".to_string()
    } else {
        std::env::var("REACH_LOG_LEVEL").unwrap_or_else(|_| "reach=info".to_string())
    };
    let log_dir = std::env::var("REACH_LOG_DIR").ok().map(PathBuf::from);
    reach_telemetry::init_tracing(&log_level, log_dir.as_deref(), LogFormat::Text).context("init tracing")?;

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("create data dir {}", args.data_dir.display()))?;

    let mut config = reach_config::load_config(Some(&args.config)).context("load mesh config")?;
    let warnings = reach_config::validate_config(&config).context("validate mesh config")?;
    for warning in &warnings {
        tracing::warn!(%warning, "mesh config warning");
    }

    let keypair = PoeeKeypair::load_or_generate(args.data_dir.join("keys").join("poee_key.pem"))
        .context("load or generate node keypair")?;
    let node_id = match &config.node_id {
        Some(id) => NodeId::from_string(id.clone()),
        None => {
            let hostname = hostname().unwrap_or_else(|| "localhost".to_string());
            let id = NodeId::derive(keypair.verifying_key().as_bytes(), &hostname);
            config.node_id = Some(id.as_str().to_string());
            reach_config::save_config(&config, &args.config).context("persist derived node id")?;
            id
        }
    };

    let peer_store = Arc::new(PeerStore::load(args.data_dir.join("trust_store.json")).context("load trust store")?);
    let flow_gate = Arc::new(FlowGate::new(FlowGateConfig::default(), Utc::now()));

    let bind = args.bind.unwrap_or_else(|| config.network.bind_address.clone());

    let state = DaemonState { node_id: node_id.clone(), peer_store, flow_gate };
    let transport_state = HttpTransportState::new();

    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
        .merge(http_router(transport_state));

    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    info!(node_id = %node_id, bind = %bind, "reach-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

async fn status(State(state): State<DaemonState>) -> impl IntoResponse {
    Json(json!({
        "node_id": state.node_id.as_str(),
        "peer_count": state.peer_store.list().len(),
        "circuit_state": format!("{:?}", state.flow_gate.circuit_state()),
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        let output = std::process::Command::new("hostname").output().ok()?;
        String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
    })
}
