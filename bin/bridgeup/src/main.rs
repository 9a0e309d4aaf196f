//! bridgeup is a CLI tool to deploy a hub and spoke token bridge across many chains.

mod cli;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bridgeup_deploy::{
    AddressStore, BridgeupConfig, ChainOutcome, ContractDeployer, DeploymentDriver,
    DryRunDeployer, ForgeDeployer, Orchestrator, ProjectConfig,
};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, SelectionArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = BridgeupConfig::load(&cli.config).context(format!(
        "Failed to load configuration from {}",
        cli.config.display()
    ))?;

    match cli.command {
        Command::Deploy(args) => deploy(&config, args).await,
        Command::Status(selection) => status(&config, &selection).await,
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn select(config: &BridgeupConfig, selection: &SelectionArgs) -> Result<Arc<ProjectConfig>> {
    let project = config
        .select(&selection.project, selection.mode, &selection.token)
        .context(format!(
            "Invalid configuration for {} {} {}",
            selection.mode, selection.project, selection.token
        ))?;
    Ok(Arc::new(project))
}

/// Address file of a project. Dry runs keep their own files so derived addresses never
/// mix with deployed ones.
fn store_path(config: &BridgeupConfig, project: &ProjectConfig, dry_run: bool) -> PathBuf {
    let dir = if dry_run {
        config.outdata.join("dry-run")
    } else {
        config.outdata.clone()
    };
    dir.join(project.selection.addresses_file_name())
}

async fn deploy(config: &BridgeupConfig, args: DeployArgs) -> Result<()> {
    let project = select(config, &args.selection)?;
    let store = Arc::new(AddressStore::open(store_path(
        config,
        &project,
        args.dry_run,
    )));

    tracing::info!(
        project = %project.selection.project,
        mode = %project.selection.mode,
        token = %project.selection.token,
        hub = project.hub_chain,
        spokes = ?project.spoke_chains,
        store = %store.path().display(),
        dry_run = args.dry_run,
        "Deploying bridge..."
    );

    let outcomes = if args.dry_run {
        converge(config, project, Arc::new(DryRunDeployer), store).await
    } else {
        if config.signer_key.is_empty() {
            anyhow::bail!("No signer key configured, set BRIDGEUP_SIGNER_KEY or pass --dry-run");
        }
        let deployer = ForgeDeployer::new(project.clone(), &args.contracts_root)
            .forge_bin(&args.forge_bin)
            .timeout(Duration::from_secs(args.deploy_timeout));
        converge(config, project, Arc::new(deployer), store).await
    };

    let mut unfinished = 0;
    for outcome in &outcomes {
        if outcome.is_complete() {
            tracing::info!(chain = outcome.chain, "{outcome}");
        } else {
            unfinished += 1;
            tracing::error!(chain = outcome.chain, "{outcome}");
        }
    }

    if unfinished > 0 {
        anyhow::bail!(
            "{unfinished} of {} chain(s) did not finish deploying",
            outcomes.len()
        );
    }

    tracing::info!("✓ Every chain is fully deployed");
    Ok(())
}

async fn converge<D: ContractDeployer>(
    config: &BridgeupConfig,
    project: Arc<ProjectConfig>,
    deployer: Arc<D>,
    store: Arc<AddressStore>,
) -> Vec<ChainOutcome> {
    let driver = Arc::new(DeploymentDriver::new(project, deployer, store));
    Orchestrator::new(driver, config.retry.clone(), config.signer_key.clone())
        .run_all()
        .await
}

async fn status(config: &BridgeupConfig, selection: &SelectionArgs) -> Result<()> {
    let project = select(config, selection)?;
    let store = Arc::new(AddressStore::open(store_path(config, &project, false)));
    // Only reads the store, nothing gets deployed.
    let driver = DeploymentDriver::new(project.clone(), Arc::new(DryRunDeployer), store.clone());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Chain", "Role", "Entries", "State", "Limits"]);

    for chain in driver.roles().chains() {
        let record = store.record(chain).await;
        let role = driver
            .roles()
            .role_of(chain)
            .map(|role| role.to_string())
            .unwrap_or_default();
        let state = driver.state_of(chain, &record)?;
        table.add_row(vec![
            chain.to_string(),
            role,
            record.len().to_string(),
            state.to_string(),
            project.limits_summary(chain).unwrap_or_default(),
        ]);
    }

    println!("{table}");
    Ok(())
}
