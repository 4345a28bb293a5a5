//! Watch command: stream key changes until interrupted

use super::{connect, parse_key};
use crate::output::{self, format_value};
use crate::Cli;
use anyhow::Result;
use colored::*;
use futures::StreamExt;
use kvconnect_client::WatchChange;

/// Arguments for the watch command
#[derive(clap::Args, Clone)]
pub struct WatchArgs {
    /// Keys to watch, parts separated by '/'
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Print unchanged keys too
    #[arg(long)]
    pub all: bool,

    /// Stop after this many batches
    #[arg(long)]
    pub max_batches: Option<usize>,
}

pub async fn handle_watch(args: WatchArgs, cli: &Cli) -> Result<()> {
    let keys = args
        .keys
        .iter()
        .map(|k| parse_key(k))
        .collect::<Result<Vec<_>>>()?;

    let kv = connect(cli).await?;
    let mut stream = kv.watch(&keys).await?;
    output::info(&format!(
        "Watching {} key(s), Ctrl-C to stop",
        stream.keys().len()
    ));

    let mut received = 0usize;
    let mut interrupted = false;
    loop {
        let batch = tokio::select! {
            batch = stream.next() => batch,
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                None
            }
        };
        let Some(batch) = batch else {
            if !interrupted {
                output::warning("Watch stream ended");
            }
            break;
        };

        for change in batch? {
            match change {
                WatchChange::Changed(entry) => {
                    let value = entry
                        .value
                        .as_ref()
                        .map(format_value)
                        .unwrap_or_else(|| "deleted".red().to_string());
                    println!("{} {} = {}", "●".green(), entry.key, value);
                }
                WatchChange::Unchanged { key } if args.all => {
                    println!("{} {} unchanged", "○".dimmed(), key);
                }
                WatchChange::Unchanged { .. } => {}
            }
        }

        received += 1;
        if args.max_batches.is_some_and(|max| received >= max) {
            break;
        }
    }
    stream.close();
    Ok(())
}
