//! `relay` command-line client for the compliance relayer.

mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use relay_api::{RelayerApi, RelayerClient, DEFAULT_PAGE_SIZE};
use relay_ops::{check_retry, TransferClient};
use relay_signer::{generate_random_address, Keypair};
use relay_tracker::{PollEvent, PollEventHandler};
use relay_types::{lamports_to_sol_string, sol_to_lamports, TransferDetails, TransferRequest};

use config::ClientConfig;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Submit and track transfers through the compliance relayer")]
struct Cli {
    /// Relayer base URL (overrides RELAY_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Print transfers as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a keypair, random or derived from a seed phrase
    Keygen {
        /// Seed phrase (at least 16 characters) for deterministic derivation
        #[arg(long)]
        seed: Option<String>,

        /// Derivation index, only with --seed
        #[arg(long, requires = "seed")]
        index: Option<String>,
    },

    /// Print random recipient addresses (for testing)
    Address {
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    #[command(flatten)]
    Remote(RemoteCommand),
}

/// Commands that talk to the relayer.
#[derive(Subcommand)]
enum RemoteCommand {
    /// Sign and submit a public transfer
    Send {
        /// Recipient address (Base58)
        #[arg(long)]
        to: String,

        /// Amount in whole units (e.g. 1.5)
        #[arg(long, conflicts_with = "lamports", required_unless_present = "lamports")]
        amount: Option<f64>,

        /// Amount in lamports
        #[arg(long)]
        lamports: Option<u64>,

        /// SPL token mint; native asset when omitted
        #[arg(long)]
        mint: Option<String>,

        /// Sender secret key (Base58 seed or keypair)
        #[arg(long, env = "RELAY_SECRET_KEY", hide_env_values = true)]
        secret_key: String,

        /// Keep polling until the transfer settles
        #[arg(long)]
        watch: bool,
    },

    /// Fetch the current state of a transfer
    Status { id: String },

    /// List transfers, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Follow cursors until the history is exhausted
        #[arg(long)]
        all: bool,
    },

    /// Ask the relayer to retry a failed transfer
    Retry {
        id: String,

        /// Keep polling until the transfer settles
        #[arg(long)]
        watch: bool,
    },

    /// Poll transfers until they all settle
    Watch {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Relayer health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = ClientConfig::from_env()?.with_api_url(cli.api_url.clone())?;
    logging::init_logging(config.log_level, config.log_json)?;

    match cli.command {
        Commands::Keygen { seed, index } => keygen(seed, index)?,
        Commands::Address { count } => print_addresses(count),
        Commands::Remote(command) => run_remote(command, &config, cli.json).await?,
    }

    Ok(())
}

fn keygen(seed: Option<String>, index: Option<String>) -> anyhow::Result<()> {
    let keypair = match seed {
        Some(seed) => Keypair::derive(&seed, index.as_deref())?,
        None => Keypair::generate(),
    };
    println!("address:    {}", keypair.address());
    println!("secret key: {}", keypair.secret_base58());
    Ok(())
}

fn print_addresses(count: usize) {
    for _ in 0..count {
        println!("{}", generate_random_address());
    }
}

async fn run_remote(command: RemoteCommand, config: &ClientConfig, json: bool) -> anyhow::Result<()> {
    let api: Arc<dyn RelayerApi> =
        Arc::new(RelayerClient::new(&config.api_url, config.client_options()));
    let page_size = match command {
        RemoteCommand::List { limit, .. } => limit,
        _ => DEFAULT_PAGE_SIZE,
    };
    let client = TransferClient::new(api, config.poll_config(), Some(event_printer()))
        .with_page_size(page_size);
    tracing::debug!(api_url = %config.api_url, "relayer client ready");

    match command {
        RemoteCommand::Send {
            to,
            amount,
            lamports,
            mint,
            secret_key,
            watch,
        } => {
            let lamports = match (lamports, amount) {
                (Some(l), _) => l,
                (None, Some(sol)) => {
                    sol_to_lamports(sol).with_context(|| format!("invalid amount: {}", sol))?
                }
                (None, None) => bail!("either --amount or --lamports is required"),
            };
            if lamports == 0 {
                bail!("amount must be greater than zero");
            }

            let keypair = Keypair::from_base58(&secret_key)?;
            let transfer = client
                .send(&keypair, &to, TransferDetails::public(lamports), mint.as_deref())
                .await?;
            print_transfer(&transfer, json)?;
            if watch {
                wait_until_settled(&client).await;
            }
        }
        RemoteCommand::Status { id } => {
            let transfer = client.refresh(&id).await?;
            print_transfer(&transfer, json)?;
        }
        RemoteCommand::List { all, .. } => {
            let mut transfers = client.load_transfers(true).await?;
            while all && client.has_more() {
                if client.load_more().await?.is_empty() {
                    break;
                }
                transfers = client.tracker().transfers().await;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&transfers)?);
            } else {
                for t in &transfers {
                    println!("{}", summary(t));
                }
                if client.has_more() {
                    println!("(more available, use --all)");
                }
            }
        }
        RemoteCommand::Retry { id, watch } => {
            client.refresh(&id).await?;
            let transfer = client.retry(&id).await?;
            print_transfer(&transfer, json)?;
            if watch {
                wait_until_settled(&client).await;
            }
        }
        RemoteCommand::Watch { ids } => {
            for id in &ids {
                let transfer = client.refresh(id).await?;
                print_transfer(&transfer, json)?;
            }
            client.start_polling().await;
            wait_until_settled(&client).await;
        }
        RemoteCommand::Health => {
            let health = client.health().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                println!(
                    "status={:?} database={:?} blockchain={:?} version={}",
                    health.status, health.database, health.blockchain, health.version
                );
            }
        }
    }

    client.stop_polling().await;
    Ok(())
}

/// Block until the poll timer retires or Ctrl-C.
async fn wait_until_settled(client: &TransferClient) {
    let idle = async {
        while client.tracker().is_running() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };
    tokio::select! {
        _ = idle => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping");
        }
    }
}

fn event_printer() -> PollEventHandler {
    Box::new(|event: PollEvent| match event {
        PollEvent::StatusChanged {
            id,
            previous,
            current,
        } => println!("{}  {} -> {}", id, previous.label(), current.label()),
        PollEvent::Settled { id, status } => {
            println!("{}  settled: {}", id, status.description())
        }
        PollEvent::Evicted { id } => println!("{}  no longer known to the relayer", id),
        _ => {}
    })
}

fn print_transfer(transfer: &TransferRequest, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(transfer)?);
        return Ok(());
    }

    println!("{}", summary(transfer));
    println!("  {}", transfer.blockchain_status.description());
    if let Some(ref sig) = transfer.blockchain_signature {
        println!("  signature: {}", sig);
    }
    if let Some(ref err) = transfer.blockchain_last_error {
        println!("  last error: {}", err);
    }
    if check_retry(transfer).is_ok() {
        println!("  retriable with `relay retry {}`", transfer.id);
    } else if transfer.requires_resign() {
        println!("  expired: sign and send a new transfer");
    }
    Ok(())
}

fn summary(t: &TransferRequest) -> String {
    let amount = match t.amount_lamports() {
        Some(l) => format!("{} {}", lamports_to_sol_string(l), t.asset_label()),
        None => format!("confidential {}", t.asset_label()),
    };
    format!(
        "{}  {:<10}  {:<24}  compliance={}  retries={}",
        t.id,
        t.blockchain_status.label(),
        amount,
        t.compliance_status,
        t.blockchain_retry_count
    )
}
