use std::net::SocketAddr;

use agora::config::{Cli, Config};
use agora::{cache, db, server};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;
    for username in &config.auth.admins {
        let user = db::users::ensure_user(&pool, username)?;
        db::users::set_admin(&pool, &user.username, true)?;
        tracing::info!(username = %user.username, "Admin access granted");
    }

    let backend = cache::connect(&config.cache).await?;
    let state = server::build_state(config.clone(), pool, backend);

    // Re-rank recent posts in case the cache was flushed or is in-process.
    state
        .posts
        .rebuild_rankings(config.cache.summary_ttl())
        .await?;

    let app = server::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
