use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod cli;

use gemgate_core::{Dispatcher, Gateway, HttpUpstream, UpstreamTransport};
use gemgate_pool::{parse_accounts, AccountPool, CursorStore, OAuthConfig, OAuthRefresher};
use gemgate_router::gateway_router;
use gemgate_storage::StateStorage;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("gemgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let oauth = OAuthConfig::from_overrides(
        cli.oauth_client_id.as_deref(),
        cli.oauth_client_secret.as_deref(),
        cli.oauth_token_url.as_deref(),
    );
    let config = cli.into_config(&oauth);

    let raw = tokio::fs::read(&config.credentials_path).await.map_err(|err| {
        anyhow::anyhow!("cannot read credential file {}: {err}", config.credentials_path)
    })?;
    let accounts = parse_accounts(&raw)?;
    info!(
        path = %config.credentials_path,
        accounts = accounts.len(),
        "credential pool loaded"
    );
    if !oauth.has_real_client() {
        tracing::warn!("oauth client identity is a placeholder, token refresh will fail");
    }

    let storage = StateStorage::connect(&config.dsn).await?;
    storage.sync().await?;
    info!(dsn = %config.dsn, "db connected");

    let store: Arc<dyn CursorStore> = Arc::new(storage);
    let refresher = Arc::new(OAuthRefresher::new(oauth, config.proxy.clone()));
    let pool = Arc::new(AccountPool::bootstrap(accounts, refresher, store).await);

    let transport: Arc<dyn UpstreamTransport> =
        Arc::new(HttpUpstream::new(config.proxy.as_deref())?);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        transport,
        config.upstream_base_url.clone(),
    ));

    let bind = format!("{}:{}", config.host, config.port);
    let app = gateway_router(Gateway::new(config, pool, dispatcher));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gemgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
