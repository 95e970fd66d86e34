use anyhow::Context;
use relsync::config::AppConfig;
use relsync::error::SyncError;
use relsync::logic::SaveAndSync;
use relsync::model::{Entity, Id, Payload};
use relsync::seed;
use relsync::store::{EntityRepository, PostgresStore, Store, Transaction};
use serde::Deserialize;
use std::sync::Arc;

/// One save-and-sync call read from a JSON file
#[derive(Debug, Deserialize)]
struct SyncRequest {
    model: String,
    id: Option<Id>,
    relations: Option<Vec<String>>,
    payload: Payload,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: relsync <request.json>")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    let request: SyncRequest =
        serde_json::from_str(&raw).with_context(|| format!("Invalid request in {}", path))?;

    let config = AppConfig::load()?;
    let database_url = config.database_url()?;
    let store = PostgresStore::new(&database_url, config.max_connections()).await?;
    store.apply_schema(seed::BLOG_SCHEMA).await?;

    let catalog = Arc::new(seed::blog_catalog());
    let service = SaveAndSync::new(Arc::clone(&catalog)).with_options(config.sync_options());

    let syncable = catalog.get(&request.model)?;
    let mut entity = match request.id {
        Some(id) => {
            let mut tx = store.begin().await?;
            let found = tx.find(syncable.model(), id).await?;
            tx.rollback().await?;
            found.with_context(|| format!("{} #{} does not exist", request.model, id))?
        }
        None => Entity::new(request.model.clone()),
    };

    let relations: Option<Vec<&str>> = request
        .relations
        .as_ref()
        .map(|paths| paths.iter().map(String::as_str).collect());

    match service
        .save_and_sync(&store, &mut entity, relations.as_deref(), request.payload)
        .await
    {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(&entity)?);
            Ok(())
        }
        Err(SyncError::Validation(errors)) => {
            eprintln!("{}", serde_json::to_string_pretty(&errors)?);
            std::process::exit(2);
        }
        Err(other) => Err(other.into()),
    }
}
