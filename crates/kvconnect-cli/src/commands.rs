use crate::Cli;
use anyhow::{bail, Context};
use clap::ValueEnum;
use kvconnect_client::{ClientConfig, Consistency, Kv};
use kvconnect_types::{Key, KeyPart};
use tracing::debug;

pub mod data;
pub mod info;
pub mod watch;

#[derive(ValueEnum, Clone, Debug, Copy, Default)]
pub enum ConsistencyCli {
    #[default]
    Strong,
    Eventual,
}

impl From<ConsistencyCli> for Consistency {
    fn from(cli: ConsistencyCli) -> Self {
        match cli {
            ConsistencyCli::Strong => Consistency::Strong,
            ConsistencyCli::Eventual => Consistency::Eventual,
        }
    }
}

/// Build the client configuration from global flags and the environment.
pub fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let Some(url) = cli.url.clone() else {
        bail!("No database URL given (use --url or KV_CONNECT_URL)");
    };
    let Some(token) = cli.access_token.clone() else {
        bail!("No access token given (use --access-token or KV_CONNECT_ACCESS_TOKEN)");
    };
    Ok(ClientConfig::new(url, token)
        .with_max_retries(cli.max_retries)
        .with_debug(cli.verbose))
}

pub async fn connect(cli: &Cli) -> anyhow::Result<Kv> {
    let config = client_config(cli)?;
    let url = config.url.clone();
    debug!(url = %url, max_retries = config.max_retries, "Connecting");
    Kv::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", url))
}

/// Parse a `/`-separated key.
///
/// Segments are typed the way keys are printed: `42n` is an integer,
/// `1.5` a float, `true`/`false` booleans, `0x..` bytes and `"..."` a string
/// that would otherwise be read as another type. Anything else is a string.
pub fn parse_key(input: &str) -> anyhow::Result<Key> {
    let trimmed = input.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Key::root());
    }
    trimmed.split('/').map(parse_part).collect()
}

fn parse_part(segment: &str) -> anyhow::Result<KeyPart> {
    if segment.len() >= 2 && segment.starts_with('"') && segment.ends_with('"') {
        return Ok(KeyPart::String(segment[1..segment.len() - 1].to_string()));
    }
    if let Some(hex_digits) = segment.strip_prefix("0x") {
        let bytes = hex::decode(hex_digits)
            .with_context(|| format!("Invalid bytes key part '{}'", segment))?;
        return Ok(KeyPart::Bytes(bytes));
    }
    if let Some(digits) = segment.strip_suffix('n') {
        if let Ok(n) = digits.parse::<i128>() {
            return Ok(KeyPart::Int(n));
        }
    }
    match segment {
        "true" => return Ok(KeyPart::Bool(true)),
        "false" => return Ok(KeyPart::Bool(false)),
        _ => {}
    }
    if segment.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
        if let Ok(f) = segment.parse::<f64>() {
            return Ok(KeyPart::Float(f));
        }
    }
    Ok(KeyPart::String(segment.to_string()))
}
