use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hms_anchor::audit::hashing::{
    compute_content_hash, field_from_text, ContentHash, DEFAULT_EXCLUDED_FIELDS,
};
use hms_anchor::audit::store::{AuditStore, MemoryAuditStore};
use hms_anchor::audit::AnchorService;
use hms_anchor::chain::{parse_address, ChainClient};
use hms_anchor::config::Settings;
use hms_anchor::server::{self, AppState};
use hms_anchor::state::repository::PgAuditStore;
use hms_anchor::state::Database;

#[derive(Parser)]
#[command(name = "hms-anchor")]
#[command(about = "Tamper-evident audit trail for hospital records")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the audit API server
    Serve,
    /// Print the content hash of a record
    Hash {
        /// Record fields as a JSON object
        json: Option<String>,
        /// Additional field as KEY=VALUE; numbers and booleans keep their type
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Check whether a content hash is anchored
    CheckHash { hash: String },
    /// Print the audit contract owner
    Owner,
    /// Authorize an account to write to the audit contract
    Authorize { address: String },
    /// Remove an account's write authorization
    Deauthorize { address: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = cli.settings;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hms_anchor={},info", settings.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let validated = match &cli.command {
        Commands::Serve => settings.validate_serve(),
        _ => settings.validate(),
    };
    if let Err(e) = validated {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Hash { json, fields: pairs } => {
            let mut fields = match json {
                Some(json) => match serde_json::from_str(&json).context("invalid JSON")? {
                    Value::Object(fields) => fields,
                    _ => anyhow::bail!("expected a JSON object"),
                },
                None => Map::new(),
            };
            for pair in &pairs {
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("expected KEY=VALUE, got {pair:?}"))?;
                fields.insert(key.to_string(), field_from_text(value));
            }

            let mut excluded: Vec<&str> = DEFAULT_EXCLUDED_FIELDS.to_vec();
            excluded.extend(settings.hash_exclude_fields.iter().map(String::as_str));
            println!("{}", compute_content_hash(&fields, &excluded));
        }
        Commands::CheckHash { hash } => {
            let hash: ContentHash = hash.parse()?;
            let client = ChainClient::connect(&settings.chain());
            println!("{}", client.check_hash(&hash).await);
        }
        Commands::Owner => {
            let client = ChainClient::connect(&settings.chain());
            match client.get_owner().await {
                Some(owner) => println!("{owner}"),
                None => anyhow::bail!("owner unavailable; is the chain configured?"),
            }
        }
        Commands::Authorize { address } => {
            let account = parse_address(&address)?;
            let client = ChainClient::connect(&settings.chain());
            let tx = client.add_authorized(account).await.context(
                "transaction was not sent; are BLOCKCHAIN_PRIVATE_KEY and the RPC configured?",
            )?;
            println!("Authorization transaction sent: {tx}");
        }
        Commands::Deauthorize { address } => {
            let account = parse_address(&address)?;
            let client = ChainClient::connect(&settings.chain());
            let tx = client.remove_authorized(account).await.context(
                "transaction was not sent; are BLOCKCHAIN_PRIVATE_KEY and the RPC configured?",
            )?;
            println!("Deauthorization transaction sent: {tx}");
        }
        Commands::Serve => serve(settings).await?,
    }

    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("======================================");
    info!("  hms-anchor audit trail");
    info!("======================================");
    info!("Listen: {}", settings.listen);
    info!("Mode: {}", if settings.production { "PRODUCTION" } else { "DEVELOPMENT" });
    info!("Chain: {:?}", settings.chain_mode);
    if !settings.hash_exclude_fields.is_empty() {
        info!("Hash excludes: {}", settings.hash_exclude_fields.join(", "));
    }
    info!("Read-only: {}", settings.read_only);
    info!("======================================");

    let store: Arc<dyn AuditStore> = match &settings.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            info!("Database connected and migrated");
            let missing = db.ensure_anchor_columns().await?;
            if !missing.is_empty() {
                warn!(
                    tables = ?missing,
                    "Host tables not found; anchor columns are added on the next start after they exist"
                );
            }
            Arc::new(PgAuditStore::new(db))
        }
        None => {
            warn!("DATABASE_URL not set, audit records are kept in memory");
            Arc::new(MemoryAuditStore::new())
        }
    };

    let chain = ChainClient::connect(&settings.chain());
    if !chain.is_connected() {
        warn!("Chain client disconnected; records will be audited without anchoring");
    }

    let service = AnchorService::new(Arc::new(chain), store)
        .read_only(settings.read_only)
        .receipt_timeout(settings.receipt_timeout())
        .exclude_fields(settings.hash_exclude_fields.clone());

    server::serve(AppState { service }, settings.listen).await?;
    Ok(())
}
