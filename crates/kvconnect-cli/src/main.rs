use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{data, info, watch};

#[derive(Parser)]
#[command(
    name = "kvconnect",
    about = "Command-line client for KV Connect databases",
    version,
    long_about = None
)]
pub struct Cli {
    /// Metadata exchange URL
    #[arg(long, env = kvconnect_client::ENV_URL)]
    pub url: Option<String>,

    /// Access token for the metadata exchange
    #[arg(long, env = kvconnect_client::ENV_ACCESS_TOKEN, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Extra attempts for 5xx responses and network failures
    #[arg(long, default_value = "10")]
    pub max_retries: u32,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Verbose output (debug logging of every request)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read one or more keys
    Get(data::GetArgs),

    /// Write a key
    Set(data::SetArgs),

    /// Delete a key
    Delete(data::DeleteArgs),

    /// Add to a u64 counter
    Sum(data::SumArgs),

    /// List keys below a prefix or in a range
    List(data::ListArgs),

    /// Stream changes of keys
    Watch(watch::WatchArgs),

    /// Show database metadata
    Info,
}

#[derive(clap::ValueEnum, Clone)]
pub enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Get(args) => data::handle_get(args.clone(), &cli).await,
        Commands::Set(args) => data::handle_set(args.clone(), &cli).await,
        Commands::Delete(args) => data::handle_delete(args.clone(), &cli).await,
        Commands::Sum(args) => data::handle_sum(args.clone(), &cli).await,
        Commands::List(args) => data::handle_list(args.clone(), &cli).await,
        Commands::Watch(args) => watch::handle_watch(args.clone(), &cli).await,
        Commands::Info => info::handle_info(&cli).await,
    }
}
