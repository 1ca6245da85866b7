//! solstake - stake account lifecycle CLI
//!
//! Every subcommand talks to the configured RPC endpoint and prints one
//! JSON document on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solana_sdk::native_token::lamports_to_sol;
use solstake::config::Config;
use solstake::metrics::metrics;
use solstake::pools::PoolScanner;
use solstake::rpc::{ChainRpc, SolanaChainClient};
use solstake::stats::ValidatorStatsClient;
use solstake::tx_builder::{parse_pubkey, parse_sol_amount, StakeService};
use solstake::wallet::LocalWallet;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "solstake.toml", env = "SOLSTAKE_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the status of one stake account
    Summary { address: String },
    /// List stake delegated to the validator
    Pools {
        /// Only accounts with this staking authority
        #[arg(long)]
        authority: Option<String>,
        /// Group by staking authority
        #[arg(long)]
        aggregate: bool,
    },
    /// Prepare a new delegated stake account
    Stake {
        #[arg(long)]
        wallet: String,
        /// Amount in SOL
        #[arg(long)]
        amount: String,
    },
    /// Prepare a (partial) deactivation
    Unstake {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        account: String,
        /// Amount in SOL
        #[arg(long)]
        amount: String,
    },
    /// Prepare a withdrawal of the inactive balance
    Withdraw {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        account: String,
    },
    /// Prepare a merge of two stake accounts
    Merge {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        destination: String,
    },
    /// Submit a base64 transaction, optionally co-signing it first
    Submit {
        transaction: String,
        /// Keypair file used to add the wallet signature
        #[arg(long)]
        keypair: Option<String>,
    },
    /// Validator stake, APY and upcoming leader slots
    Stats,
    /// Activated stake of the validator vote account
    Validator,
    /// Wallet balance in lamports
    Balance { address: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceOutput {
    address: String,
    lamports: u64,
    sol: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorOutput {
    vote_account: String,
    identity: Option<String>,
    activated_stake: u64,
    activated_stake_sol: f64,
    delinquent: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.log_json)?;
    debug!(version = env!("CARGO_PKG_VERSION"), config = %args.config, "Starting solstake");

    let config = load_config(&args.config)?;
    let result = run(args.command, &config).await;

    if args.print_metrics && config.monitoring.enable_metrics {
        eprintln!("{}", metrics().render()?);
    }
    result
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let vote_account = config.vote_account()?;
    let rpc: Arc<dyn ChainRpc> = Arc::new(SolanaChainClient::new(
        config.rpc.endpoint.clone(),
        config.rpc_timeout(),
        config.commitment()?,
    ));
    info!(endpoint = %config.rpc.endpoint, vote_account = %vote_account, "RPC client ready");

    let service = StakeService::new(
        Arc::clone(&rpc),
        vote_account,
        config.activation_resolver(),
        config.staking_settings(),
    );

    match command {
        Command::Summary { address } => {
            let address = parse_pubkey(&address, "stake account")?;
            print_json(&service.stake_account_summary(&address).await?)
        }
        Command::Pools {
            authority,
            aggregate,
        } => {
            let scanner =
                PoolScanner::new(Arc::clone(&rpc), vote_account, config.activation_resolver());
            if aggregate {
                let known = config.known_pools()?;
                print_json(&scanner.aggregate(&known, config.pools.max_pools).await?)
            } else {
                let authority = authority
                    .map(|a| parse_pubkey(&a, "staking authority"))
                    .transpose()?;
                print_json(&scanner.list_pools(authority.as_ref()).await?)
            }
        }
        Command::Stake { wallet, amount } => {
            let lamports = parse_sol_amount(&amount)?;
            print_json(&service.prepare_stake(&wallet, lamports).await)
        }
        Command::Unstake {
            wallet,
            account,
            amount,
        } => {
            let lamports = parse_sol_amount(&amount)?;
            print_json(&service.prepare_deactivate(&wallet, &account, lamports).await)
        }
        Command::Withdraw { wallet, account } => {
            print_json(&service.prepare_withdraw(&wallet, &account).await)
        }
        Command::Merge {
            wallet,
            source,
            destination,
        } => print_json(&service.prepare_merge(&wallet, &source, &destination).await),
        Command::Submit {
            transaction,
            keypair,
        } => {
            let transaction = match keypair {
                Some(path) => {
                    let wallet = LocalWallet::from_file(&path).context("Failed to load wallet")?;
                    info!(wallet = %wallet.pubkey(), "Co-signing transaction");
                    wallet.co_sign_encoded(&transaction)?
                }
                None => transaction,
            };
            print_json(&service.submit_signed_transaction(&transaction).await)
        }
        Command::Stats => {
            let client =
                ValidatorStatsClient::new(Arc::clone(&rpc), vote_account, config.stats_settings())?;
            print_json(&client.fetch().await)
        }
        Command::Validator => {
            let scanner =
                PoolScanner::new(Arc::clone(&rpc), vote_account, config.activation_resolver());
            let stake = scanner.validator_total().await?;
            print_json(&ValidatorOutput {
                vote_account: vote_account.to_string(),
                identity: stake
                    .as_ref()
                    .and_then(|s| s.node_pubkey)
                    .map(|k| k.to_string()),
                activated_stake: stake.as_ref().map(|s| s.activated_stake).unwrap_or(0),
                activated_stake_sol: lamports_to_sol(
                    stake.as_ref().map(|s| s.activated_stake).unwrap_or(0),
                ),
                delinquent: stake.map(|s| s.delinquent).unwrap_or(false),
            })
        }
        Command::Balance { address } => {
            let pubkey = parse_pubkey(&address, "wallet")?;
            let lamports = service.wallet_balance(&pubkey).await?;
            print_json(&BalanceOutput {
                address: pubkey.to_string(),
                lamports,
                sol: lamports_to_sol(lamports),
            })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "solstake=debug,info"
    } else {
        "solstake=info,warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration, validated, with environment overrides
fn load_config(path: &str) -> Result<Config> {
    let config = Config::from_file_with_env(path)
        .with_context(|| format!("Failed to load config from {}", path))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
