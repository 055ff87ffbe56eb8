use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webcache::{CacheConfig, CacheSystem};

#[derive(Debug, Serialize, Deserialize)]
struct User {
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .init();

    let mut config = CacheConfig::rocksdb("./tmp/embedded-demo");
    config.maintenance.compaction_interval = Duration::from_secs(60);

    let system = CacheSystem::from_config(&config).await?;
    let cache = system.cache().clone();

    cache
        .set("user:42", &User { name: "Ana".into() }, None)
        .await?;
    cache
        .set("session:abc", &"token", Some(Duration::from_secs(1)))
        .await?;

    let user: Option<User> = cache.get("user:42").await?;
    tracing::info!(?user, "Read back user");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    tracing::info!(
        session_alive = cache.has("session:abc").await?,
        "Session after TTL"
    );

    let greeting: String = cache
        .get_or_compute("greeting", None, || async {
            Ok::<_, anyhow::Error>("computed once".to_string())
        })
        .await?;
    tracing::info!(%greeting, "Computed value");

    if let Some(maintenance) = system.maintenance() {
        let outcome = maintenance.run_now().await?;
        tracing::info!(?outcome, "Manual compaction");
    }

    tracing::info!(stats = ?cache.stats(), "Cache statistics");
    system.shutdown().await?;
    Ok(())
}
