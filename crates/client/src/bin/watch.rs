use anyhow::Result;
use clap::Parser;
use readylayer_client::{RealtimeClient, StaticCredentials};
use readylayer_core::{Category, Scope};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "readylayer-watch", version, about = "Tail a ReadyLayer dashboard scope from the terminal")]
struct Cli {
    /// Server base URL, e.g. http://127.0.0.1:8080
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// Bearer token for the API.
    #[arg(long)]
    token: String,

    /// Organization to watch.
    #[arg(long)]
    org: String,

    /// Optional repository filter.
    #[arg(long)]
    repo: Option<String>,

    /// Categories to watch, e.g. --category findings --category prs.
    /// Defaults to all five.
    #[arg(long = "category")]
    categories: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let scope = match &cli.repo {
        Some(repo) => Scope::repo(&cli.org, repo),
        None => Scope::org(&cli.org),
    };

    let categories: Vec<Category> = if cli.categories.is_empty() {
        Category::ALL.to_vec()
    } else {
        cli.categories
            .iter()
            .map(|s| {
                Category::from_str_opt(s)
                    .ok_or_else(|| anyhow::anyhow!("unknown category: {s}"))
            })
            .collect::<Result<_>>()?
    };

    let client = RealtimeClient::new(&cli.base_url, StaticCredentials::new(&cli.token))?;

    // Connection badge: log every status transition for the scope.
    let connection = client.connection(&scope);
    let mut status_rx = connection.status();
    tokio::spawn(async move {
        loop {
            let status = *status_rx.borrow_and_update();
            info!("connection status: {status:?}");
            if status_rx.changed().await.is_err() {
                break;
            }
        }
    });

    let queries: Vec<_> = categories
        .iter()
        .map(|&category| (category, client.query(scope.clone(), category)))
        .collect();

    for (category, query) in &queries {
        let mut state_rx = query.subscribe();
        let category = *category;
        tokio::spawn(async move {
            loop {
                {
                    let state = state_rx.borrow_and_update();
                    match (&state.data, &state.error) {
                        (Some(page), None) => info!(
                            "{category}: {} of {} items",
                            page.items.len(),
                            page.pagination.total
                        ),
                        (data, Some(err)) => info!(
                            "{category}: error {err} (showing {} cached items)",
                            data.as_ref().map_or(0, |p| p.items.len())
                        ),
                        (None, None) if state.is_loading => info!("{category}: loading"),
                        (None, None) => {}
                    }
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    info!(org = %cli.org, "watching; press ctrl-c to stop");
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
    Ok(())
}
