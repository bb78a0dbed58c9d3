use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omni_node::{
    EngineConfig, GenesisAllocation, LedgerEngine, MineOutcome, MinerService, TransactionType,
    TxRequest, VoteChoice,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "omni")]
#[command(about = "OMNI single-node ledger", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a walkthrough on a throwaway in-memory chain
    Demo,

    /// Submit a payment and mine it into a block
    Pay {
        from: String,
        to: String,
        amount: u128,
        #[arg(long, default_value = "OMNI")]
        asset: String,
    },

    /// Credit new supply of a known asset and mine it
    Issue {
        address: String,
        asset: String,
        amount: u128,
    },

    /// Mine in the background for a number of seconds
    Run {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Generate a wallet key pair
    Keygen,

    /// Show balances, reservations and NFTs of an address
    Wallet { address: String },

    /// Print a block by height
    Block { index: u64 },

    /// Print chain statistics
    Stats,

    /// Re-verify every block hash and link
    Verify,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn mine_now(engine: &LedgerEngine) -> Result<()> {
    match engine.mine_pending()? {
        MineOutcome::Mined(summary) => print_json(&summary),
        MineOutcome::NothingToMine => {
            println!("Nothing to mine");
            Ok(())
        }
    }
}

fn demo() -> Result<()> {
    let config = EngineConfig {
        difficulty: 3,
        rng_seed: Some(7),
        genesis_allocations: vec![
            GenesisAllocation {
                address: "alice".into(),
                asset: "OMNI".into(),
                amount: 1_000,
            },
            GenesisAllocation {
                address: "alice".into(),
                asset: "GOV".into(),
                amount: 50,
            },
        ],
        ..Default::default()
    };
    let engine = LedgerEngine::open(config)?;

    engine.submit_transaction(TxRequest::payment("alice", "bob", 100, "OMNI"))?;
    info!("alice -> bob 100 OMNI pending");
    if let Err(err) = engine.submit_transaction(TxRequest::payment("alice", "carol", 2_000, "OMNI")) {
        info!("Overspend rejected: {}", err);
    }
    mine_now(&engine)?;

    let receipt = engine.mint_nft("alice", "Genesis Badge", BTreeMap::new())?;
    let proposal = engine.record_proposal("alice", "Lower fees", "Halve the payment fee")?;
    engine.submit_transaction(
        TxRequest::payment("alice", "", 0, "")
            .with_kind(TransactionType::GovernanceRecord)
            .with_meta("proposal_id", &proposal.proposal_id)
            .with_meta("vote", &VoteChoice::Yes.to_string()),
    )?;
    mine_now(&engine)?;

    engine.submit_transaction(
        TxRequest::payment("alice", "bob", 0, "")
            .with_kind(TransactionType::NftTransfer)
            .with_meta("nft_id", &receipt.nft_id),
    )?;
    mine_now(&engine)?;

    print_json(&engine.get_wallet("alice"))?;
    print_json(&engine.get_wallet("bob"))?;
    print_json(&engine.nft(&receipt.nft_id))?;
    print_json(&engine.get_chain_stats())?;
    println!("Chain valid: {}", engine.verify_chain());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    if let Commands::Demo = cli.command {
        return demo();
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let engine = Arc::new(LedgerEngine::open(config).context("opening ledger")?);

    match cli.command {
        Commands::Demo => {}
        Commands::Pay {
            from,
            to,
            amount,
            asset,
        } => {
            let id = engine.submit_transaction(TxRequest::payment(&from, &to, amount, &asset))?;
            info!("Submitted {}", id);
            mine_now(&engine)?;
        }
        Commands::Issue {
            address,
            asset,
            amount,
        } => {
            engine.issue(&address, &asset, amount)?;
            mine_now(&engine)?;
        }
        Commands::Run { seconds } => {
            let service = MinerService::spawn(engine.clone());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            let mined = service.shutdown().await?;
            println!("Mined {} blocks", mined);
        }
        Commands::Keygen => {
            let keys = engine.create_wallet();
            print_json(&serde_json::json!({
                "address": keys.address(),
                "public_key": keys.public_key(),
                "secret_key": keys.secret_hex(),
            }))?;
        }
        Commands::Wallet { address } => print_json(&engine.get_wallet(&address))?,
        Commands::Block { index } => match engine.block(index) {
            Some(block) => print_json(&block)?,
            None => println!("No block at height {}", index),
        },
        Commands::Stats => print_json(&engine.get_chain_stats())?,
        Commands::Verify => {
            let valid = engine.verify_chain();
            println!("Chain valid: {}", valid);
            if !valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
