use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webcache::CacheSystem;

/// Run with e.g. `CACHE=redis REDIS_HOST=127.0.0.1:6379 REDIS_PREFIX=demo:`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .init();

    let system = CacheSystem::from_env().await?;

    if !system.health_check().await {
        tracing::warn!("Redis is unreachable, operations will fail until it comes back");
    }

    let cache = system.cache().clone();
    let mut tasks = Vec::new();
    for i in 0..16_u32 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            let key = format!("counter:{i}");
            cache.set(&key, &i, Some(Duration::from_secs(30))).await?;
            cache.get::<u32>(&key).await
        }));
    }

    for task in tasks {
        match task.await? {
            Ok(value) => tracing::info!(?value, "Round trip"),
            Err(e) if e.is_transient() => tracing::warn!(error = %e, "Transient cache failure"),
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(stats = ?cache.stats(), "Cache statistics");
    cache.empty().await?;
    system.shutdown().await?;
    Ok(())
}
