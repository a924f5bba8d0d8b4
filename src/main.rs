use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyperlocal::config::Config;
use hyperlocal::db::Database;
use hyperlocal::ingest::{start_background_refresh, Ingestor};
use hyperlocal::poller::SourcePoller;
use hyperlocal::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hyperlocal=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("HYPERLOCAL_CONFIG").unwrap_or_else(|_| "sources.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} organisations with {} sources from {}",
        config.organisations.len(),
        config.source_count(),
        config_path
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:hyperlocal.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_sources(&config.organisations).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    let ingestor = Arc::new(Ingestor::new(
        db.clone(),
        SourcePoller::new()?,
        config.max_concurrent_polls,
    ));

    // Start background refresh task
    let bg_ingestor = ingestor.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_ingestor, refresh_interval).await;
    });

    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor: ingestor.clone(),
    });

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
