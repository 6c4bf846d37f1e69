//! Configuration for hms-anchor
//!
//! CLI arguments and environment variables via clap. A `.env` file in the
//! working directory is loaded first when present.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::Address;
use clap::Args;

use crate::chain::{parse_address, ChainMode};

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// PostgreSQL connection URL. Without it audit rows are kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Address the API server listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// How to reach the chain
    #[arg(long, env = "CHAIN_MODE", value_enum, default_value = "remote")]
    pub chain_mode: ChainMode,

    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "BLOCKCHAIN_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Private key used to sign transactions (hex)
    #[arg(long, env = "BLOCKCHAIN_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Chain ID for transaction signing; queried from the node when unset
    #[arg(long, env = "BLOCKCHAIN_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Deployed AuditLog contract address; overrides the deployment file
    #[arg(long, env = "CONTRACT_ADDRESS", value_parser = parse_contract_address)]
    pub contract_address: Option<Address>,

    /// File holding the deployed contract address
    #[arg(long, env = "DEPLOYED_ADDRESS_FILE")]
    pub deployed_address_file: Option<PathBuf>,

    /// Production mode: missing chain configuration is an error, not a fallback
    #[arg(long, env = "PRODUCTION", default_value = "false")]
    pub production: bool,

    /// Refuse to resend hashes from the API
    #[arg(long, env = "READ_ONLY", default_value = "false")]
    pub read_only: bool,

    /// Extra field names left out of content hashes (comma separated)
    #[arg(long, env = "HASH_EXCLUDE_FIELDS", value_delimiter = ',')]
    pub hash_exclude_fields: Vec<String>,

    /// Seconds to wait for a transaction receipt
    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value = "120")]
    pub receipt_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn parse_contract_address(s: &str) -> Result<Address, String> {
    parse_address(s).map_err(|e| e.to_string())
}

/// Chain connection settings, derived from `Settings`.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub mode: ChainMode,
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub chain_id: Option<u64>,
    pub production: bool,
    pub contract_address: Option<Address>,
    pub deployment_file: Option<PathBuf>,
}

impl Settings {
    pub fn chain(&self) -> ChainSettings {
        ChainSettings {
            mode: self.chain_mode,
            rpc_url: self.rpc_url.clone().filter(|u| !u.trim().is_empty()),
            private_key: self.private_key.clone().filter(|k| !k.trim().is_empty()),
            chain_id: self.chain_id,
            production: self.production,
            contract_address: self.contract_address,
            deployment_file: self.deployed_address_file.clone(),
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// Validate settings shared by every subcommand
    pub fn validate(&self) -> Result<(), String> {
        if self.production && self.chain_mode == ChainMode::Simulated {
            return Err("CHAIN_MODE=simulated is not allowed in production".into());
        }
        if self.receipt_timeout_secs == 0 {
            return Err("RECEIPT_TIMEOUT_SECS must be positive".into());
        }
        Ok(())
    }

    /// Validate settings for the API server
    pub fn validate_serve(&self) -> Result<(), String> {
        self.validate()?;
        if self.production && self.database_url.is_none() {
            return Err("DATABASE_URL is required in production".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["hms-anchor"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).settings
    }

    #[test]
    fn test_simulated_mode_flag() {
        let settings = parse(&["--chain-mode", "simulated", "--rpc-url", "http://node:8545"]);
        assert_eq!(settings.chain_mode, ChainMode::Simulated);
        assert_eq!(settings.chain().rpc_url.as_deref(), Some("http://node:8545"));
    }

    #[test]
    fn test_contract_address_parsed() {
        let settings = parse(&[
            "--contract-address",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        ]);
        assert!(settings.contract_address.is_some());
    }

    #[test]
    fn test_blank_private_key_ignored() {
        let settings = parse(&["--private-key", "  "]);
        assert!(settings.chain().private_key.is_none());
    }

    #[test]
    fn test_production_server_requires_database() {
        let mut settings = parse(&["--production", "--rpc-url", "http://node:8545"]);
        settings.database_url = None;
        // Operator commands never touch the database.
        assert!(settings.validate().is_ok());
        assert!(settings.validate_serve().is_err());

        let settings = parse(&["--production", "--database-url", "postgres://localhost/hms"]);
        assert!(settings.validate().is_ok());
        assert!(settings.validate_serve().is_ok());
    }

    #[test]
    fn test_simulated_rejected_in_production() {
        let settings = parse(&[
            "--production",
            "--chain-mode",
            "simulated",
            "--database-url",
            "postgres://localhost/hms",
        ]);
        assert!(settings.validate().is_err());
        assert!(settings.validate_serve().is_err());

        let settings = parse(&["--chain-mode", "simulated"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_receipt_timeout_rejected() {
        let settings = parse(&["--receipt-timeout-secs", "0"]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_hash_exclude_fields_split_on_commas() {
        let settings = parse(&["--hash-exclude-fields", "updated_at,created_at"]);
        assert_eq!(settings.hash_exclude_fields, vec!["updated_at", "created_at"]);
    }
}
