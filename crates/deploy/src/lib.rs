//! bridgeup-deploy - Resumable multi-chain deployment of a vault/controller/connector
//! token bridge.
//!
//! Every chain converges independently: each pass deploys whatever its
//! [`AddressRecord`] is missing and checkpoints the record to the [`AddressStore`], so
//! repeated runs pick up exactly where the previous one stopped.
//!
//! # Example
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//!
//! use bridgeup_deploy::{
//!     AddressStore, BridgeupConfig, DeploymentDriver, DeploymentMode, DryRunDeployer,
//!     Orchestrator,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = BridgeupConfig::load(Path::new("Bridgeup.toml"))?;
//! let project = Arc::new(config.select("lyra-testnet", DeploymentMode::Prod, "WEETHC")?);
//! let store = Arc::new(AddressStore::open(
//!     config.outdata.join(project.selection.addresses_file_name()),
//! ));
//!
//! let driver = DeploymentDriver::new(project, Arc::new(DryRunDeployer), store);
//! let outcomes = Orchestrator::new(Arc::new(driver), config.retry, config.signer_key)
//!     .run_all()
//!     .await;
//! # Ok(())
//! # }
//! ```

mod config;
pub use config::{
    BridgeupConfig, CONFIG_FILENAME, ChainEndpoint, ConfigError, DeploymentMode, ENV_PREFIX,
    HookConfig, HookType, Limits, ProjectConfig, ProjectSelection, RawChainConfig,
    RawHookConfig, RawLimits, RawSuperTokenInfo, RawTokenConstants, RetryConfig,
    SuperTokenInfo,
};

pub mod deployer;
pub use deployer::{
    ContractDeployer, DeployError, DeployParams, DeployRequest, Deployed, DryRunDeployer,
    ForgeDeployer, SignerKey, get_or_deploy,
};

mod driver;
pub use driver::{ChainState, DeploymentDriver, DriverError, PassReport};

mod orchestrator;
pub use orchestrator::{ChainOutcome, ChainStatus, Orchestrator, backoff_policy};

mod roles;
pub use roles::ChainRoles;

mod store;
pub use store::AddressStore;

mod types;
pub use types::{
    AddressKey, AddressRecord, ChainId, ChainRole, ContractKind, DeploymentAddresses,
    IntegrationType,
};
