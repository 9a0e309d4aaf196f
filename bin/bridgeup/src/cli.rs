use std::path::PathBuf;

use bridgeup_deploy::{CONFIG_FILENAME, DeploymentMode};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "bridgeup")]
#[command(
    author,
    version,
    about = "Deploy a hub and spoke token bridge across many chains, resuming where the last run stopped"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "BRIDGEUP_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory holding a `Bridgeup.toml`.
    #[arg(short, long, env = "BRIDGEUP_CONFIG", default_value = CONFIG_FILENAME, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every missing contract of the selected token until each chain converges.
    Deploy(DeployArgs),
    /// Print the state of every chain from the persisted addresses, without deploying.
    Status(SelectionArgs),
    /// Print the effective configuration (file merged with `BRIDGEUP_*` variables).
    Config,
}

/// Selects the token deployment to work on.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// The project name, as keyed under `[projects]`.
    #[arg(short, long, env = "BRIDGEUP_PROJECT")]
    pub project: String,

    /// The deployment mode.
    #[arg(short, long, env = "BRIDGEUP_MODE", default_value_t = DeploymentMode::Prod)]
    pub mode: DeploymentMode,

    /// The token symbol.
    #[arg(short, long, env = "BRIDGEUP_TOKEN")]
    pub token: String,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Derive addresses locally instead of broadcasting transactions.
    #[arg(long, env = "BRIDGEUP_DRY_RUN")]
    pub dry_run: bool,

    /// Root of the foundry project holding the bridge contracts.
    #[arg(long, env = "BRIDGEUP_CONTRACTS_ROOT", default_value = ".")]
    pub contracts_root: PathBuf,

    /// The forge binary used to deploy contracts.
    #[arg(long, env = "BRIDGEUP_FORGE_BIN", default_value = "forge")]
    pub forge_bin: PathBuf,

    /// Timeout of a single contract deployment, in seconds.
    #[arg(long, env = "BRIDGEUP_DEPLOY_TIMEOUT", default_value_t = 300)]
    pub deploy_timeout: u64,
}
