use super::connect;
use crate::output::OutputDisplay;
use crate::Cli;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct EndpointRow {
    url: String,
    consistency: String,
}

/// Print the database metadata and its endpoints.
pub async fn handle_info(cli: &Cli) -> anyhow::Result<()> {
    let kv = connect(cli).await?;
    let metadata = kv.metadata();

    println!("Database:   {}", metadata.database_id);
    println!("Protocol:   v{}", metadata.version);
    println!("Expires at: {}", metadata.expires_at.to_rfc3339());
    println!("Watch:      {}", if metadata.supports_watch() { "yes" } else { "no" });

    let rows: Vec<EndpointRow> = metadata
        .endpoints
        .iter()
        .map(|e| EndpointRow {
            url: e.url.clone(),
            consistency: e.consistency.to_string(),
        })
        .collect();
    rows.display(cli)
}
