use std::sync::Arc;

use lob_matching_core::cache::RedisClient;
use lob_matching_core::config::Config;
use lob_matching_core::idempotency::redis_store::RedisIdempotencyStore;
use lob_matching_core::ledger::pg::PgLedger;
use lob_matching_core::queue::pg::PgJobQueue;
use lob_matching_core::Core;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("starting lob-matching-core for instrument {}", config.instrument);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let ledger = Arc::new(PgLedger::new(pool.clone()));
    ledger.migrate().await?;

    let queue = Arc::new(PgJobQueue::new(pool));
    queue.migrate().await?;

    let redis = Arc::new(RedisClient::from_url(&config.redis_url).await?);
    let idempotency = Arc::new(RedisIdempotencyStore::new(redis));

    let core = Core::new(config, ledger, idempotency, queue);
    // This process owns the only matching engine consumer for this
    // instrument (queue_concurrency is fixed at 1) and starts with an
    // empty in-memory book, so it is trivially in sync with itself.
    core.mark_book_ready();
    let engine_handle = core.spawn_engine();

    tracing::info!("matching engine running");
    engine_handle.await??;

    Ok(())
}
