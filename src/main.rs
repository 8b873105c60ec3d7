use anyhow::Result;
use clap::Parser;
use rpc_adapter::commands::{self, Services};
use rpc_adapter::config::{
    AdapterConfig, ENV_BACKOFF, ENV_MAX_RETRY, ENV_REQUEST_TIMEOUT, parse_secs,
};
use std::time::Duration;

/// rpc-adapter - resilient JSON-RPC endpoint probe
///
/// Calls JSON-RPC nodes through one shared client per endpoint, retrying
/// connection failures, timeouts and not-yet-available data until the retry
/// budget is spent.
///
/// Each duration flag can also be set through its environment variable
/// (RPC_ADAPTER_REQUEST_TIMEOUT, RPC_ADAPTER_MAX_RETRY, RPC_ADAPTER_BACKOFF).
///
/// Examples:
///   rpc-adapter check http://localhost:8545
///   rpc-adapter block-number https://rpc.ankr.com/eth http://localhost:8545
#[derive(Parser, Debug)]
#[command(author, version = env!("RPC_ADAPTER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Timeout of each network attempt, in seconds (default 10)
    #[arg(
        long,
        value_name = "SECS",
        value_parser = parse_secs,
        env = ENV_REQUEST_TIMEOUT,
        global = true
    )]
    timeout: Option<Duration>,

    /// Total retry budget of one call, in seconds (default 30)
    #[arg(
        long = "max-retry",
        value_name = "SECS",
        value_parser = parse_secs,
        env = ENV_MAX_RETRY,
        global = true
    )]
    max_retry: Option<Duration>,

    /// Pause between two attempts, in seconds (default 1)
    #[arg(
        long,
        value_name = "SECS",
        value_parser = parse_secs,
        env = ENV_BACKOFF,
        global = true
    )]
    backoff: Option<Duration>,

    /// Log retries and endpoint creation
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Check that each endpoint answers
    Check(EndpointsArgs),

    /// Print the latest block number of each endpoint
    BlockNumber(EndpointsArgs),

    /// Issue a raw JSON-RPC call and print the result
    Call(CallArgs),
}

#[derive(clap::Args, Debug)]
pub struct EndpointsArgs {
    /// Endpoint URLs
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct CallArgs {
    /// Endpoint URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// JSON-RPC method name
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Parameters as a JSON array (default [])
    #[arg(value_name = "PARAMS")]
    pub params: Option<String>,
}

impl Cli {
    /// Defaults, overridden by flags or their environment variables.
    fn config(&self) -> AdapterConfig {
        let mut config = AdapterConfig::default();
        if let Some(timeout) = self.timeout {
            config.request_timeout = timeout;
        }
        if let Some(max_retry) = self.max_retry {
            config.retry.max_retry_duration = max_retry;
        }
        if let Some(backoff) = self.backoff {
            config.retry.backoff_delay = backoff;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let services = Services::http(cli.config());

    match cli.command {
        Commands::Check(args) => commands::check(&services, &args.urls).await?,
        Commands::BlockNumber(args) => commands::block_number(&services, &args.urls).await?,
        Commands::Call(args) => {
            commands::call(&services, &args.url, &args.method, args.params.as_deref()).await?
        }
    }
    Ok(())
}
