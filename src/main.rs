use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use translation_review::components::ComponentCatalog;
use translation_review::config::Config;
use translation_review::db::{spawn_event_recorder, Database};
use translation_review::engine::ReviewEngine;
use translation_review::events::BroadcastNotifier;
use translation_review::scheduler::start_lock_sweep;
use translation_review::server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_review=info".parse()?),
        )
        .init();

    info!("Starting translation review service");

    // Load configuration from environment
    let config = Config::from_env()?;

    // Step 1: Load components and permission grants
    let catalog = ComponentCatalog::load(&config.components_file)?;

    // Step 2: Build the engine
    let notifier = Arc::new(BroadcastNotifier::new(config.event_buffer));
    let engine = Arc::new(
        ReviewEngine::new(catalog.registry, Arc::new(catalog.authorizer))
            .with_notifier(notifier.clone())
            .with_lock_settings(config.lock_settings()),
    );
    info!("✓ Review engine ready");

    // Step 3: Event journal (optional)
    let _recorder = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            Some(spawn_event_recorder(db, notifier.subscribe()))
        }
        None => {
            warn!("DATABASE_URL not set, events will not be journaled");
            None
        }
    };

    // Step 4: Lock sweep (optional)
    let _scheduler = match &config.lock_sweep_schedule {
        Some(schedule) => Some(start_lock_sweep(Arc::clone(&engine), schedule).await?),
        None => {
            info!("Lock sweep disabled");
            None
        }
    };

    if config.api_key.is_none() {
        warn!("API_KEY not set, admin endpoints are disabled");
    }

    // Step 5: Serve
    let app = router(AppState {
        engine,
        api_key: config.api_key.clone(),
    });
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
