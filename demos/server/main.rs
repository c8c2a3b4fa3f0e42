//! Stormwatch server with a seeded in-memory store
//!
//! ```sh
//! STORMWATCH_CONFIG=stormwatch.yaml RUST_LOG=stormwatch=debug cargo run --example server
//! ```
//!
//! With `--features postgres` and `DATABASE_URL` set, rows come from
//! PostgreSQL instead.

use stormwatch::prelude::*;
use tracing_subscriber::EnvFilter;

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

async fn seeded_store(config: &AppConfig) -> Result<InMemoryRowStore> {
    let whitelist = config.whitelist()?;
    let store = InMemoryRowStore::new();

    let holders = whitelist.table("asset_holders")?;
    store
        .upsert(
            &holders,
            row(json!({
                "id": 1,
                "name": "Harbour Utilities",
                "email": "ops@harbour.example",
                "phone": "+4712345678",
                "notify_email": true,
                "notify_sms": true
            })),
        )
        .await?;

    let assets = whitelist.table("assets")?;
    for (id, name, lon, lat) in [
        (1, "Pump station north", 10.75, 59.91),
        (2, "Substation east", 10.82, 59.93),
        (3, "Water tower", 11.40, 60.20),
    ] {
        store
            .upsert(
                &assets,
                row(json!({
                    "id": id,
                    "holder_id": 1,
                    "asset_type_id": 1,
                    "name": name,
                    "installed_on": "2019-05-01",
                    "location": { "type": "Point", "coordinates": [lon, lat] }
                })),
            )
            .await?;
    }
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("STORMWATCH_CONFIG") {
        Ok(path) => AppConfig::from_yaml_file(&path)?,
        Err(_) => AppConfig::default_config(),
    };
    let bind = config.server.bind.clone();

    #[cfg(feature = "postgres")]
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let pool = sqlx::PgPool::connect(&url).await?;
        stormwatch::storage::ensure_send_log_schema(&pool).await?;
        return ServerBuilder::new()
            .with_config(config)
            .with_store(PostgresRowStore::new(pool.clone()))
            .with_send_log(Arc::new(PostgresSendLog::new(pool)))
            .serve(&bind)
            .await;
    }

    let store = seeded_store(&config).await?;
    tracing::info!("Seeded 1 asset holder and 3 assets");

    ServerBuilder::new()
        .with_config(config)
        .with_store(store)
        .serve(&bind)
        .await
}
