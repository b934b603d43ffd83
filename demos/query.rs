//! Connect to a node, print its supported options and run one query.
//!
//! ```text
//! RUST_LOG=debug cargo run --example query -- [config.json] ["SELECT ..."]
//! ```

use std::time::Duration;

use cqlwire_client::{Client, ClientBuilder, ConnectionConfig, Consistency, EventType};
use tracing_subscriber::EnvFilter;

const DEFAULT_QUERY: &str = "SELECT release_version FROM system.local";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ConnectionConfig::from_json_file(&path)?,
        None => ConnectionConfig {
            register_events: vec![EventType::SchemaChange, EventType::StatusChange],
            ..Default::default()
        },
    };
    let query = args.next().unwrap_or_else(|| DEFAULT_QUERY.to_string());

    let client: Client = ClientBuilder::from_config(config)
        .on_event(|event| tracing::info!("Event: {:?}", event))
        .connect()
        .await?;

    let options = client.options().await?;
    for (key, values) in &options {
        tracing::info!("{} = {:?}", key, values);
    }

    let result = client.query(&query, Consistency::One).await?;
    tracing::info!("{}: {:?}", query, result);

    tracing::info!("Listening for events for 30s, stats: {:?}", client.stats().await?);
    tokio::select! {
        reason = client.wait_for_shutdown() => tracing::warn!("Connection ended: {}", reason),
        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
    }
    Ok(())
}
