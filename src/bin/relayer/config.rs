//! Configuration for the relayer.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): endpoints, contract, database
//! - CLI arguments: the command to run and its parameters

use std::time::Duration;

use alloy_primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use dex_relayer::types::parse_u256;

/// Environment configuration (endpoints, storage).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// DEX contract address
    pub contract_address: String,

    /// HTTP endpoint of the chain daemon
    pub chain_rpc_url: String,

    /// WebSocket endpoint of the chain daemon, used for logs
    pub chain_ws_url: String,

    /// HTTP endpoint of the wallet daemon
    pub wallet_rpc_url: String,

    /// SQLite database, e.g. `sqlite://relayer.db`
    pub database_url: String,

    /// Optional per-call timeout (default: 120s)
    pub timeout_seconds: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn contract_address(&self) -> Result<Address, alloy_primitives::hex::FromHexError> {
        self.contract_address.parse()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(dex_relayer::gateway::DEFAULT_CALL_TIMEOUT)
    }
}

/// CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "relayer")]
#[command(about = "Order book relayer for the DEX contract")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mirror contract events into the ledger until interrupted
    Run {
        /// Seconds to wait before reconnecting a failed subscription
        #[arg(long, default_value_t = 3)]
        reconnect_delay_seconds: u64,
    },

    /// Deposit tokens into the contract
    Deposit(TransferArgs),

    /// Withdraw tokens from the contract
    Withdraw(TransferArgs),

    /// Print the order book of a pair from the ledger, cheapest first
    Book {
        #[arg(long, value_parser = parse_address)]
        token_get: Address,

        #[arg(long, value_parser = parse_address)]
        token_give: Address,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Debug, Args)]
pub struct TransferArgs {
    /// Account the wallet daemon signs for
    #[arg(long, value_parser = parse_address)]
    pub from: Address,

    /// Token address, the native coin if omitted
    #[arg(long, value_parser = parse_address)]
    pub token: Option<Address>,

    /// Amount in the token's smallest unit, decimal or 0x-prefixed hex
    #[arg(long)]
    pub amount: String,
}

impl TransferArgs {
    pub fn token(&self) -> Address {
        self.token.unwrap_or(Address::ZERO)
    }

    pub fn amount(&self) -> Result<U256, ConfigError> {
        parse_u256(&self.amount)
            .filter(|amount| !amount.is_zero())
            .ok_or_else(|| ConfigError::InvalidAmount(self.amount.clone()))
    }
}

fn parse_address(value: &str) -> Result<Address, String> {
    value.parse().map_err(|e| format!("invalid address {value}: {e}"))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_args() {
        let cli = CliConfig::try_parse_from([
            "relayer",
            "deposit",
            "--from",
            "0x00000000000000000000000000000000000000aa",
            "--amount",
            "0x10",
        ])
        .unwrap();

        let Command::Deposit(args) = cli.command else {
            panic!("expected deposit");
        };
        assert_eq!(args.from, Address::with_last_byte(0xaa));
        assert_eq!(args.token(), Address::ZERO);
        assert_eq!(args.amount().unwrap(), U256::from(16));
    }

    #[test]
    fn test_invalid_amount() {
        let args = TransferArgs {
            from: Address::ZERO,
            token: None,
            amount: "0".to_string(),
        };
        assert!(matches!(args.amount(), Err(ConfigError::InvalidAmount(_))));

        let args = TransferArgs {
            amount: "ten".to_string(),
            ..args
        };
        assert!(matches!(args.amount(), Err(ConfigError::InvalidAmount(_))));
    }

    #[test]
    fn test_book_defaults() {
        let cli = CliConfig::try_parse_from([
            "relayer",
            "book",
            "--token-get",
            "0x0000000000000000000000000000000000000011",
            "--token-give",
            "0x0000000000000000000000000000000000000022",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Command::Book {
                offset: 0,
                limit: 50,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(
            CliConfig::try_parse_from(["relayer", "withdraw", "--from", "0x12", "--amount", "1"])
                .is_err()
        );
    }
}
