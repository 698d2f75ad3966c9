//! stagepass server
//!
//! Binds the HTTP surface, runs migrations, and starts the retry scheduler.
//!
//! ```bash
//! DATABASE_URL=postgres://... PAYMENT_SECRET_KEY=sk_... cargo run --bin server
//! ```

use sqlx::postgres::PgPoolOptions;
use stagepass::audit::TracingAuditEmitter;
use stagepass::clock::{SystemClock, UuidIds};
use stagepass::gateway::mock::MockGateway;
use stagepass::retry::RetryScheduler;
use stagepass::server::{build_router, state::AppState};
use stagepass::store::postgres::PgStore;
use stagepass::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stagepass=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await?;
    let pg_store = PgStore::new(pool);
    pg_store.migrate().await?;
    tracing::info!("database migrated");
    let store: Arc<dyn stagepass::store::Store> = Arc::new(pg_store);

    if config.gateway.payment_secret_key.is_none() {
        tracing::warn!("PAYMENT_SECRET_KEY is not set; webhook ingestion is disabled");
    }

    let audit: Arc<dyn stagepass::audit::AuditEmitter> = Arc::new(TracingAuditEmitter);

    // The real gateway client is deployed as a sidecar-configured
    // implementation of the PaymentGateway port; the mock keeps local
    // development self-contained.
    let state = AppState::build(
        config.clone(),
        store,
        MockGateway::shared(),
        Arc::new(SystemClock),
        Arc::new(UuidIds),
        Arc::clone(&audit),
    );

    let scheduler = RetryScheduler::new(
        Arc::clone(&state.engine),
        Arc::clone(&state.store),
        audit,
        &config.retry,
    );
    let scheduler_handle = tokio::spawn(scheduler.run());
    tracing::info!("retry scheduler started");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "stagepass is listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    scheduler_handle.abort();
    Ok(())
}
