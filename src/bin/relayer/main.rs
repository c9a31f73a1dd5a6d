//! Relayer for the DEX contract.
//!
//! `run` mirrors contract events into a SQLite ledger until interrupted.
//! `deposit` and `withdraw` submit a single transaction through the wallet
//! daemon and print its hash, `book` prints a pair's order book from the
//! ledger.

mod config;
mod error;

use std::{process::exit, sync::Arc, time::Duration};

use clap::Parser;
use dex_relayer::{
    Chain,
    gateway::{ChainApi, HttpDaemon},
    ledger::{Ledger, SqliteLedger},
    stream::WsLogSource,
    submit::Submitter,
    sync::{SyncConfig, SyncEngine},
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use url::Url;

use config::{CliConfig, Command, EnvConfig};
use error::Result;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let cli_config = CliConfig::parse();

    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(cli_config.command).await {
        error!(%e, "Relayer encountered an error, shutting down");
        exit(1);
    }
}

async fn run(command: Command) -> Result<()> {
    let env_config = EnvConfig::from_env()?;
    let chain = Chain::new(env_config.contract_address()?);
    let timeout = env_config.timeout();
    let chain_daemon = HttpDaemon::with_timeout(Url::parse(&env_config.chain_rpc_url)?, timeout)?;
    let ledger = Arc::new(SqliteLedger::connect(&env_config.database_url).await?);

    match command {
        Command::Run {
            reconnect_delay_seconds,
        } => {
            let config = SyncConfig::default()
                .with_reconnect_delay(Duration::from_secs(reconnect_delay_seconds));
            let source = WsLogSource::new(Url::parse(&env_config.chain_ws_url)?);
            run_sync(chain, chain_daemon, ledger, source, config).await
        }
        Command::Deposit(args) => {
            let wallet_daemon =
                HttpDaemon::with_timeout(Url::parse(&env_config.wallet_rpc_url)?, timeout)?;
            let submitter = Submitter::new(&chain, chain_daemon, wallet_daemon, ledger);
            let hash = submitter
                .deposit(args.from, args.token(), args.amount()?)
                .await?;
            println!("{hash}");
            Ok(())
        }
        Command::Withdraw(args) => {
            let wallet_daemon =
                HttpDaemon::with_timeout(Url::parse(&env_config.wallet_rpc_url)?, timeout)?;
            let submitter = Submitter::new(&chain, chain_daemon, wallet_daemon, ledger);
            let hash = submitter
                .withdraw(args.from, args.token(), args.amount()?)
                .await?;
            println!("{hash}");
            Ok(())
        }
        Command::Book {
            token_get,
            token_give,
            offset,
            limit,
        } => {
            let orders = ledger
                .query_orders_by_pair(token_get, token_give, offset, limit)
                .await?;
            for signed in orders {
                let order = &signed.order;
                println!(
                    "{} price={} get={} give={} maker={}",
                    signed.hash(),
                    order.price(),
                    order.amount_get,
                    order.amount_give,
                    order.maker
                );
            }
            Ok(())
        }
    }
}

async fn run_sync(
    chain: Chain,
    chain_daemon: HttpDaemon,
    ledger: Arc<SqliteLedger>,
    source: WsLogSource,
    config: SyncConfig,
) -> Result<()> {
    let genesis = ChainApi::new(chain_daemon).genesis_block_number().await?;
    let cursor = ledger.init_sync_cursor(genesis).await?;
    info!(
        begin_block = cursor.begin_block,
        end_block = cursor.end_block,
        contract = %chain.contract(),
        "Starting sync"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut handle = SyncEngine::new(&chain, ledger, source)
        .with_config(config)
        .spawn(shutdown_rx);

    tokio::select! {
        result = &mut handle => return Ok(result??),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(%e, "Failed to listen for shutdown signal");
            }
        }
    }

    info!("Shutting down");
    if shutdown_tx.send(()).is_err() {
        warn!("Sync engine already stopped");
    }
    Ok(handle.await??)
}
