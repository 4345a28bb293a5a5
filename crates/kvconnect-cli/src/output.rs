use crate::{Cli, OutputFormat};
use colored::*;
use kvconnect_client::{KvEntry, Value};
use serde::Serialize;
use tabled::{Table, Tabled};

pub trait OutputDisplay {
    fn display(&self, cli: &Cli) -> anyhow::Result<()>;
}

impl<T> OutputDisplay for Vec<T>
where
    T: Tabled + Serialize,
{
    fn display(&self, cli: &Cli) -> anyhow::Result<()> {
        match cli.format {
            OutputFormat::Table => {
                if self.is_empty() {
                    println!("{}", "No entries found".yellow());
                } else {
                    println!("{}", Table::new(self));
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(self)?);
            }
        }
        Ok(())
    }
}

/// One printable row per entry.
#[derive(Debug, Tabled, Serialize)]
pub struct EntryRow {
    pub key: String,
    pub value: String,
    pub versionstamp: String,
}

impl From<&KvEntry> for EntryRow {
    fn from(entry: &KvEntry) -> Self {
        Self {
            key: entry.key.to_string(),
            value: entry
                .value
                .as_ref()
                .map(format_value)
                .unwrap_or_else(|| "null".to_string()),
            versionstamp: entry
                .versionstamp
                .map(|v| v.to_hex())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => format!("0x{}", hex::encode(bytes)),
        },
        Value::U64(n) => format!("{}u64", n),
        Value::Json(json) => json.to_string(),
    }
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}
