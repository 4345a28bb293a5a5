use super::{connect, parse_key, ConsistencyCli};
use crate::output::{self, EntryRow, OutputDisplay};
use crate::Cli;
use anyhow::{bail, Context};
use clap::Args;
use kvconnect_client::{ListOptions, ListSelector, SetOptions, Value};
use std::time::Duration;

#[derive(Args, Clone)]
pub struct GetArgs {
    /// Keys to read, parts separated by '/'
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Read consistency level
    #[arg(short, long, value_enum, default_value = "strong")]
    pub consistency: ConsistencyCli,

    /// Print only the value of the first key (for scripting)
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Clone)]
pub struct SetArgs {
    /// Key to write
    pub key: String,

    /// Value to write
    pub value: String,

    /// Store the value as JSON
    #[arg(long, conflicts_with = "u64")]
    pub json: bool,

    /// Store the value as an unsigned 64-bit integer
    #[arg(long)]
    pub u64: bool,

    /// Expire the key after this many seconds
    #[arg(long)]
    pub expire_in: Option<u64>,
}

#[derive(Args, Clone)]
pub struct DeleteArgs {
    /// Key to delete
    pub key: String,
}

#[derive(Args, Clone)]
pub struct SumArgs {
    /// Counter key
    pub key: String,

    /// Amount to add
    pub operand: u64,
}

#[derive(Args, Clone)]
pub struct ListArgs {
    /// Prefix to list below (the whole database when omitted)
    pub prefix: Option<String>,

    /// First key to include
    #[arg(long)]
    pub start: Option<String>,

    /// First key to exclude
    #[arg(long)]
    pub end: Option<String>,

    /// Maximum number of entries
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// List in descending key order
    #[arg(short, long)]
    pub reverse: bool,

    /// Entries fetched per request
    #[arg(long, default_value = "500")]
    pub batch_size: usize,

    /// Resume from a cursor printed by an earlier listing
    #[arg(long)]
    pub cursor: Option<String>,

    /// Read consistency level
    #[arg(short, long, value_enum, default_value = "strong")]
    pub consistency: ConsistencyCli,
}

pub async fn handle_get(args: GetArgs, cli: &Cli) -> anyhow::Result<()> {
    let keys = args
        .keys
        .iter()
        .map(|k| parse_key(k))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let kv = connect(cli).await?;
    let entries = kv.get_many(&keys, args.consistency.into()).await?;

    if args.raw {
        match entries.first().and_then(|e| e.value.as_ref()) {
            Some(value) => println!("{}", output::format_value(value)),
            None => std::process::exit(1),
        }
        return Ok(());
    }

    let rows: Vec<EntryRow> = entries.iter().map(EntryRow::from).collect();
    rows.display(cli)
}

pub async fn handle_set(args: SetArgs, cli: &Cli) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let value = if args.json {
        Value::Json(serde_json::from_str(&args.value).context("Value is not valid JSON")?)
    } else if args.u64 {
        Value::U64(args.value.parse().context("Value is not a u64")?)
    } else {
        Value::Bytes(args.value.into_bytes())
    };
    let mut options = SetOptions::default();
    if let Some(seconds) = args.expire_in {
        options = options.with_expire_in(Duration::from_secs(seconds));
    }

    let kv = connect(cli).await?;
    let versionstamp = kv.set_with(&key, value, options).await?;
    output::success(&format!("Set {} at {}", key, versionstamp));
    Ok(())
}

pub async fn handle_delete(args: DeleteArgs, cli: &Cli) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let kv = connect(cli).await?;
    let versionstamp = kv.delete(&key).await?;
    output::success(&format!("Deleted {} at {}", key, versionstamp));
    Ok(())
}

pub async fn handle_sum(args: SumArgs, cli: &Cli) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let kv = connect(cli).await?;
    let versionstamp = kv.sum(&key, args.operand).await?;
    output::success(&format!("Added {} to {} at {}", args.operand, key, versionstamp));
    Ok(())
}

pub async fn handle_list(args: ListArgs, cli: &Cli) -> anyhow::Result<()> {
    let selector = list_selector(&args)?;

    let mut options = ListOptions::default()
        .with_reverse(args.reverse)
        .with_batch_size(args.batch_size)
        .with_consistency(args.consistency.into());
    if let Some(limit) = args.limit {
        options = options.with_limit(limit);
    }
    if let Some(cursor) = args.cursor {
        options = options.with_cursor(cursor);
    }

    let kv = connect(cli).await?;
    let mut iter = kv.list(selector, options)?;
    let mut rows = Vec::new();
    while let Some(entry) = iter.next().await {
        rows.push(EntryRow::from(&entry?));
    }
    rows.display(cli)?;

    if args.limit.is_some_and(|limit| rows.len() == limit) {
        if let Some(cursor) = iter.cursor() {
            output::info(&format!("More entries may follow; resume with --cursor {}", cursor));
        }
    }
    Ok(())
}

/// Map the prefix and bound flags onto a selector.
///
/// With both `--start` and `--end` the listing is a plain range, so a prefix
/// is rejected instead of being ignored.
fn list_selector(args: &ListArgs) -> anyhow::Result<ListSelector> {
    let prefix = args.prefix.as_deref();
    Ok(match (args.start.as_deref(), args.end.as_deref()) {
        (Some(start), Some(end)) => {
            if let Some(prefix) = prefix {
                bail!(
                    "Prefix '{}' cannot be combined with both --start and --end",
                    prefix
                );
            }
            ListSelector::Range {
                start: parse_key(start)?,
                end: parse_key(end)?,
            }
        }
        (start, end) => {
            let prefix = parse_key(prefix.unwrap_or("/"))?;
            match (start, end) {
                (Some(start), _) => ListSelector::PrefixStart {
                    prefix,
                    start: parse_key(start)?,
                },
                (_, Some(end)) => ListSelector::PrefixEnd {
                    prefix,
                    end: parse_key(end)?,
                },
                (None, None) => ListSelector::Prefix(prefix),
            }
        }
    })
}
