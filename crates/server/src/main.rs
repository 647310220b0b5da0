use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use readylayer_core::{Category, Scope};
use readylayer_server::{http, store::DashboardStore, AuthRegistry, MemoryStore};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "readylayer-server", version, about = "ReadyLayer realtime sync server")]
struct Cli {
    /// Where the HTTP API will listen, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Heartbeat period on the delta stream, in seconds.
    #[arg(long, default_value_t = 15)]
    heartbeat_seconds: u64,

    /// Access grants, repeatable: --token secret:org-1,org-2
    #[arg(long = "token")]
    tokens: Vec<String>,

    /// Preload a demo org (and, with no --token flags, a demo-token grant)
    /// so readylayer-watch has something to show.
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut grants = cli.tokens.clone();
    if cli.seed_demo && grants.is_empty() {
        grants.push("demo-token:demo-org".to_string());
        info!("seeded demo grant: token=demo-token org=demo-org");
    }
    let auth = AuthRegistry::parse_grants(&grants)?;

    let store = Arc::new(MemoryStore::new());
    if cli.seed_demo {
        seed_demo(store.as_ref())?;
        info!("seeded demo rows for demo-org");
    }

    let state = http::AppState::new(
        store,
        auth,
        Duration::from_secs(cli.heartbeat_seconds),
    );
    let app = http::router(state);

    let addr: SocketAddr = cli.listen.parse()?;
    info!("listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn seed_demo(store: &MemoryStore) -> anyhow::Result<()> {
    let scope = Scope::org("demo-org");
    store.put(
        Category::Metrics,
        &scope,
        serde_json::json!({"name": "review_latency_p50_ms", "value": 420}),
    )?;
    store.put(
        Category::Prs,
        &scope,
        serde_json::json!({"id": "pr-1", "title": "Tighten waiver expiry checks", "state": "open"}),
    )?;
    store.put(
        Category::Runs,
        &scope,
        serde_json::json!({"id": "run-1", "prId": "pr-1", "status": "passed"}),
    )?;
    store.put(
        Category::Findings,
        &scope,
        serde_json::json!({"id": "f-1", "prId": "pr-1", "severity": "high", "rule": "sql-injection"}),
    )?;
    store.put(
        Category::Policies,
        &scope,
        serde_json::json!({"id": "pol-1", "name": "block-high-severity", "enabled": true}),
    )?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
