//! OpenSASE Catalog Classifications - ordered taxon listings service

use anyhow::Result;
use opensase_classifications::{api, ClassificationStore, Config, InMemoryClassificationStore, PgClassificationStore};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store: Arc<dyn ClassificationStore> = match &config.database_url {
        Some(url) => {
            let store = PgClassificationStore::connect(url, &config).await?;
            sqlx::migrate!("./migrations").run(store.pool()).await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, classifications are kept in memory");
            Arc::new(InMemoryClassificationStore::new())
        }
    };
    let nats = match &config.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.map_err(|e| tracing::warn!("NATS unavailable at {}: {}", url, e)).ok(),
        None => None,
    };

    let app = api::router(api::AppState { store, nats }).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 OpenSASE Classifications listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
