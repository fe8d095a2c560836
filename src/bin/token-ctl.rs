//! token-ctl: issue transfers and license updates for the licensed token.
//!
//! Runs against an in-process sandbox node per configured chain. Chains are
//! configured through a JSON file and/or `LTOKEN_*` environment variables.
//!
//! Usage:
//!   LTOKEN_CHAIN_A_KEY=0x... LTOKEN_CHAIN_A_CONTRACT=0x... \
//!     token-ctl generate --wallet 0x... --amount 200 --network chain-a

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use licensed_token::dispatch::{describe_error, dispatch, Command};
use licensed_token::{
    NodeTransport, OrchestratorConfig, OrchestratorContext, SimulatedNode, TokenAmount,
    TransactionOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "token-ctl")]
#[command(about = "Issue transfers and license updates for the licensed token")]
struct Args {
    /// JSON configuration file; LTOKEN_* variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sandbox supply minted to the operator, in whole tokens
    #[arg(long, default_value = "1000")]
    supply: String,

    /// Sandbox license limit of the operator, in whole tokens
    #[arg(long, default_value = "1000")]
    operator_limit: String,

    /// Seconds until the sandbox token expires
    #[arg(long, default_value_t = 86_400)]
    expires_in: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Transfer tokens from the operator to a wallet
    Generate {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "chain-a")]
        network: String,
    },
    /// Set the license limit of a wallet (owner only)
    License {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        limit: String,
        #[arg(long, default_value = "chain-a")]
        network: String,
    },
    /// Check connectivity with every configured chain
    Probe,
}

fn load_config(path: Option<&PathBuf>) -> Result<OrchestratorConfig, String> {
    let config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let mut config = OrchestratorConfig::from_json(&json).map_err(|e| e.to_string())?;
            config
                .overlay(|name| std::env::var(name).ok())
                .map_err(|e| e.to_string())?;
            config
        }
        None => OrchestratorConfig::from_env().map_err(|e| e.to_string())?,
    };
    if config.chains.is_empty() {
        return Err("no chains configured; set LTOKEN_CHAIN_A_KEY or LTOKEN_CHAIN_B_KEY".into());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<String, String> {
    let config = load_config(args.config.as_ref())?;
    let supply = TokenAmount::parse(&args.supply, config.decimals).map_err(|e| e.to_string())?;
    let operator_limit =
        TokenAmount::parse(&args.operator_limit, config.decimals).map_err(|e| e.to_string())?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_secs();

    let mut nodes = BTreeMap::new();
    let mut transports: BTreeMap<_, Arc<dyn NodeTransport>> = BTreeMap::new();
    for network in config.chains.keys() {
        let node = Arc::new(SimulatedNode::new(now, now + args.expires_in));
        transports.insert(*network, node.clone() as Arc<dyn NodeTransport>);
        nodes.insert(*network, node);
    }

    let context = OrchestratorContext::from_config(&config, &transports).map_err(|e| e.to_string())?;
    for (network, node) in &nodes {
        if let Ok(binding) = context.binding(*network) {
            node.mint(binding.registry.owner(), supply.base_units());
            node.seed_limit(&binding.operator, operator_limit.base_units());
            info!(%network, operator = %binding.operator, "sandbox ready");
        }
    }

    let decimals = config.decimals;
    let orchestrator = TransactionOrchestrator::new(context, config.retry.clone());

    let command = match args.command {
        Cmd::Generate { wallet, amount, network } => Command::Generate { wallet, amount, network },
        Cmd::License { wallet, limit, network } => Command::SetLicense { wallet, limit, network },
        Cmd::Probe => {
            let mut lines = Vec::new();
            for (network, outcome) in orchestrator.context().probe().await {
                match outcome {
                    Ok(timestamp) => lines.push(format!("{}: reachable, chain time {}", network, timestamp)),
                    Err(e) => lines.push(format!("{}: {}", network, e)),
                }
            }
            return Ok(lines.join("\n"));
        }
    };

    dispatch(&orchestrator, command, decimals)
        .await
        .map_err(|e| describe_error(&e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(Args::parse()).await {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!("{}", message);
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
