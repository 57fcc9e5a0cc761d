//! Agrimart Cart - multi-seller shopping cart service

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agrimart_cart::adapters::events::{LoggingEventPublisher, NatsEventPublisher};
use agrimart_cart::adapters::memory::{InMemoryCartRepository, InMemoryProductCatalog};
use agrimart_cart::adapters::postgres::{PgCartRepository, PgProductCatalog};
use agrimart_cart::config::AppConfig;
use agrimart_cart::http::{self, AppState};
use agrimart_cart::ports::{CartRepository, EventPublisher, ProductCatalog};
use agrimart_cart::CartService;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    let (catalog, carts): (Arc<dyn ProductCatalog>, Arc<dyn CartRepository>) = match config.database_url() {
        Some(url) => {
            let db = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            sqlx::migrate!("./migrations").run(&db).await?;
            tracing::info!("Using PostgreSQL cart storage");
            (Arc::new(PgProductCatalog::new(db.clone())), Arc::new(PgCartRepository::new(db)))
        }
        None => {
            let catalog = match &config.catalog_seed_path {
                Some(path) => InMemoryProductCatalog::from_json_file(path).await?,
                None => InMemoryProductCatalog::default(),
            };
            tracing::warn!(products = catalog.len().await, "DATABASE_URL not set, carts are kept in memory");
            (Arc::new(catalog), Arc::new(InMemoryCartRepository::new()))
        }
    };

    let events: Arc<dyn EventPublisher> = match config.nats_url() {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsEventPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, cart events will only be logged");
                Arc::new(LoggingEventPublisher)
            }
        },
        None => Arc::new(LoggingEventPublisher),
    };

    let service = CartService::new(catalog, carts, events).with_max_write_retries(config.cart_max_write_retries);
    let app = http::router(AppState { carts: Arc::new(service) })
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_address();
    tracing::info!("🚀 Agrimart cart listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
