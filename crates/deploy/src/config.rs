//! Project configuration: raw TOML/env layering and the validated per-token selection.
//!
//! A configuration file holds the constants of every project, keyed by project name,
//! deployment mode and token symbol. A run selects exactly one of them and turns it
//! into an immutable [`ProjectConfig`].

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use alloy_core::primitives::{Address, U256};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    deployer::SignerKey,
    types::{ChainId, ContractKind, IntegrationType},
};

/// The default name for the bridgeup configuration file.
pub const CONFIG_FILENAME: &str = "Bridgeup.toml";

/// Prefix of the environment variables merged over the configuration file.
pub const ENV_PREFIX: &str = "BRIDGEUP_";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("project {0} is not configured")]
    UnknownProject(String),
    #[error("mode {mode} is not configured for project {project}")]
    UnknownMode { project: String, mode: DeploymentMode },
    #[error("token {0} is not configured for the selected project and mode")]
    UnknownToken(String),
    #[error("invalid deployment mode: {0}")]
    InvalidMode(String),
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("hub chain {0} is also listed as a spoke chain")]
    HubIsSpoke(ChainId),
    #[error("no spoke chains configured")]
    NoSpokes,
    #[error("spoke chain {0} is listed more than once")]
    DuplicateSpoke(ChainId),
    #[error("no integration types configured")]
    NoIntegrationTypes,
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: String, value: String },
    #[error("invalid rpc url for chain {chain}: {value}")]
    InvalidRpcUrl { chain: ChainId, value: String },
    #[error("invalid amount for {field}: {value}")]
    InvalidAmount { field: String, value: String },
    #[error("hook {hook_type} needs limits for chain {chain} and integration {integration}")]
    MissingLimits {
        hook_type: HookType,
        chain: ChainId,
        integration: IntegrationType,
    },
}

/// Deployment environment a set of project constants belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentMode {
    Dev,
    Prod,
    Surge,
}

/// Hook attached to the controller or vault of a token.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookType {
    #[default]
    NoHook,
    LimitHook,
    LyraTsaDepositHook,
    LyraTsaWithdrawHook,
}

impl HookType {
    /// The contract deployed for this hook, if any.
    pub fn contract_kind(&self) -> Option<ContractKind> {
        match self {
            HookType::NoHook => None,
            HookType::LimitHook => Some(ContractKind::LimitHook),
            HookType::LyraTsaDepositHook => Some(ContractKind::LyraTsaDepositHook),
            HookType::LyraTsaWithdrawHook => Some(ContractKind::LyraTsaWithdrawHook),
        }
    }

    /// Whether the hook enforces per-connector sending and receiving limits.
    pub fn needs_limits(&self) -> bool {
        !matches!(self, HookType::NoHook)
    }
}

/// Retry policy applied to each chain's convergence loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound for the delay between two passes, in milliseconds.
    pub max_delay_ms: u64,
    /// Number of retries after the first pass before a chain is reported as stalled.
    pub max_attempts: usize,
    /// Randomise delays to spread the load on shared RPC endpoints.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Network endpoints of a chain, as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChainConfig {
    /// JSON-RPC endpoint used to deploy contracts.
    pub rpc_url: Option<String>,
    /// Address of the messaging socket the connectors plug into.
    pub socket: Option<String>,
}

/// Sending and receiving limits of one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLimits {
    pub sending_limit: String,
    pub receiving_limit: String,
    #[serde(default)]
    pub pool_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHookConfig {
    #[serde(default)]
    pub hook_type: HookType,
    /// Limits keyed by chain id, then integration type.
    #[serde(default)]
    pub limits: BTreeMap<String, BTreeMap<IntegrationType, RawLimits>>,
}

/// Metadata of a token deployed by the bridge itself.
///
/// The token is only deployed when every field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSuperTokenInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub initial_supply_owner: Option<String>,
    pub owner: Option<String>,
    pub initial_supply: Option<String>,
}

/// Constants of one token within a project and mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTokenConstants {
    pub hub_chain: ChainId,
    pub spoke_chains: Vec<ChainId>,
    #[serde(default = "default_integration_types")]
    pub integration_types: Vec<IntegrationType>,
    /// Existing token contract per chain id.
    #[serde(default)]
    pub token_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub super_token: Option<RawSuperTokenInfo>,
    #[serde(default)]
    pub hook: RawHookConfig,
}

fn default_integration_types() -> Vec<IntegrationType> {
    vec![IntegrationType::Fast]
}

fn default_outdata() -> PathBuf {
    PathBuf::from("deployments")
}

/// The whole configuration file, merged with `BRIDGEUP_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeupConfig {
    /// Directory holding the address files.
    #[serde(default = "default_outdata")]
    pub outdata: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Private key of the deployer account, usually provided as `BRIDGEUP_SIGNER_KEY`.
    #[serde(default, skip_serializing)]
    pub signer_key: SignerKey,
    /// Per-chain endpoints keyed by chain id.
    #[serde(default)]
    pub chains: BTreeMap<String, RawChainConfig>,
    /// Project constants keyed by project, mode and token.
    #[serde(default)]
    pub projects: BTreeMap<String, BTreeMap<String, BTreeMap<String, RawTokenConstants>>>,
}

impl Default for BridgeupConfig {
    fn default() -> Self {
        Self {
            outdata: default_outdata(),
            retry: RetryConfig::default(),
            signer_key: SignerKey::default(),
            chains: BTreeMap::new(),
            projects: BTreeMap::new(),
        }
    }
}

impl BridgeupConfig {
    /// Load the configuration from a TOML file (or a directory holding [`CONFIG_FILENAME`])
    /// and merge `BRIDGEUP_*` environment variables over it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        tracing::debug!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Select and validate the constants of one project, mode and token.
    pub fn select(
        &self,
        project: &str,
        mode: DeploymentMode,
        token: &str,
    ) -> Result<ProjectConfig, ConfigError> {
        let modes = self
            .projects
            .get(project)
            .ok_or_else(|| ConfigError::UnknownProject(project.to_string()))?;
        let tokens = modes
            .get(&mode.to_string())
            .ok_or_else(|| ConfigError::UnknownMode {
                project: project.to_string(),
                mode,
            })?;
        let constants = tokens
            .get(token)
            .ok_or_else(|| ConfigError::UnknownToken(token.to_string()))?;

        ProjectConfig::from_raw(
            ProjectSelection {
                project: project.to_string(),
                mode,
                token: token.to_string(),
            },
            constants,
            &self.chains,
        )
    }
}

/// The (project, mode, token) triple a run deploys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectSelection {
    pub project: String,
    pub mode: DeploymentMode,
    pub token: String,
}

impl ProjectSelection {
    /// File name of the address store for this selection.
    pub fn addresses_file_name(&self) -> String {
        format!("{}_{}_{}_addresses.json", self.mode, self.project, self.token)
    }
}

/// Validated sending and receiving limits of one connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub sending_limit: U256,
    pub receiving_limit: U256,
    pub pool_count: Option<u32>,
}

impl std::fmt::Display for Limits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "send {} / receive {}",
            self.sending_limit, self.receiving_limit
        )?;
        if let Some(pools) = self.pool_count {
            write!(f, " / {pools} pool(s)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookConfig {
    pub hook_type: HookType,
    pub limits: BTreeMap<ChainId, BTreeMap<IntegrationType, Limits>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperTokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply_owner: Address,
    pub owner: Address,
    pub initial_supply: U256,
}

/// Validated network endpoints of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainEndpoint {
    pub rpc_url: Option<Url>,
    pub socket: Option<Address>,
}

/// Immutable description of one project, mode and token, resolved before any
/// deployment begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub selection: ProjectSelection,
    pub hub_chain: ChainId,
    pub spoke_chains: Vec<ChainId>,
    pub integration_types: Vec<IntegrationType>,
    pub token_addresses: BTreeMap<ChainId, Address>,
    pub super_token: Option<SuperTokenInfo>,
    pub hook: HookConfig,
    pub chains: BTreeMap<ChainId, ChainEndpoint>,
}

impl ProjectConfig {
    pub fn from_raw(
        selection: ProjectSelection,
        raw: &RawTokenConstants,
        raw_chains: &BTreeMap<String, RawChainConfig>,
    ) -> Result<Self, ConfigError> {
        if raw.spoke_chains.is_empty() {
            return Err(ConfigError::NoSpokes);
        }
        let mut seen = BTreeSet::new();
        for spoke in &raw.spoke_chains {
            if *spoke == raw.hub_chain {
                return Err(ConfigError::HubIsSpoke(raw.hub_chain));
            }
            if !seen.insert(*spoke) {
                return Err(ConfigError::DuplicateSpoke(*spoke));
            }
        }

        let mut integration_types = raw.integration_types.clone();
        integration_types.sort();
        integration_types.dedup();
        if integration_types.is_empty() {
            return Err(ConfigError::NoIntegrationTypes);
        }

        let token_addresses = raw
            .token_addresses
            .iter()
            .map(|(chain, address)| {
                let chain = parse_chain_id(chain)?;
                let address = parse_address(&format!("token_addresses.{chain}"), address)?;
                Ok((chain, address))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let super_token = raw
            .super_token
            .as_ref()
            .map(parse_super_token)
            .transpose()?
            .flatten();

        let hook = parse_hook(&raw.hook)?;
        let chain_ids = std::iter::once(raw.hub_chain).chain(raw.spoke_chains.iter().copied());
        if hook.hook_type.needs_limits() {
            for chain in chain_ids {
                for integration in &integration_types {
                    let present = hook
                        .limits
                        .get(&chain)
                        .is_some_and(|by_type| by_type.contains_key(integration));
                    if !present {
                        return Err(ConfigError::MissingLimits {
                            hook_type: hook.hook_type,
                            chain,
                            integration: *integration,
                        });
                    }
                }
            }
        }

        // Endpoints of chains outside this deployment are left unparsed.
        let mut chains = BTreeMap::new();
        for (chain, endpoint) in raw_chains {
            let Ok(chain) = parse_chain_id(chain) else {
                continue;
            };
            if chain == raw.hub_chain || raw.spoke_chains.contains(&chain) {
                chains.insert(chain, parse_endpoint(chain, endpoint)?);
            }
        }

        Ok(Self {
            selection,
            hub_chain: raw.hub_chain,
            spoke_chains: raw.spoke_chains.clone(),
            integration_types,
            token_addresses,
            super_token,
            hook,
            chains,
        })
    }

    /// Existing token contract configured for `chain`.
    pub fn token_address(&self, chain: ChainId) -> Option<Address> {
        self.token_addresses.get(&chain).copied()
    }

    /// Messaging socket of `chain`.
    pub fn socket(&self, chain: ChainId) -> Option<Address> {
        self.chains.get(&chain).and_then(|endpoint| endpoint.socket)
    }

    /// Connector limits of `chain`, one `integration: limits` entry per integration type.
    pub fn limits_summary(&self, chain: ChainId) -> Option<String> {
        let by_type = self.hook.limits.get(&chain)?;
        let entries: Vec<_> = by_type
            .iter()
            .map(|(integration, limits)| format!("{integration}: {limits}"))
            .collect();
        Some(entries.join(", "))
    }

    pub fn rpc_url(&self, chain: ChainId) -> Option<&Url> {
        self.chains
            .get(&chain)
            .and_then(|endpoint| endpoint.rpc_url.as_ref())
    }
}

fn parse_chain_id(value: &str) -> Result<ChainId, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidChainId(value.to_string()))
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_amount(field: &str, value: &str) -> Result<U256, ConfigError> {
    U256::from_str(value.trim()).map_err(|_| ConfigError::InvalidAmount {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_endpoint(chain: ChainId, raw: &RawChainConfig) -> Result<ChainEndpoint, ConfigError> {
    let rpc_url = raw
        .rpc_url
        .as_deref()
        .map(|url| {
            Url::parse(url).map_err(|_| ConfigError::InvalidRpcUrl {
                chain,
                value: url.to_string(),
            })
        })
        .transpose()?;
    let socket = raw
        .socket
        .as_deref()
        .map(|socket| parse_address(&format!("chains.{chain}.socket"), socket))
        .transpose()?;

    Ok(ChainEndpoint { rpc_url, socket })
}

fn parse_hook(raw: &RawHookConfig) -> Result<HookConfig, ConfigError> {
    let mut limits = BTreeMap::new();
    for (chain, by_type) in &raw.limits {
        let chain = parse_chain_id(chain)?;
        let mut parsed = BTreeMap::new();
        for (integration, raw_limits) in by_type {
            let field = format!("hook.limits.{chain}.{integration}");
            parsed.insert(
                *integration,
                Limits {
                    sending_limit: parse_amount(
                        &format!("{field}.sending_limit"),
                        &raw_limits.sending_limit,
                    )?,
                    receiving_limit: parse_amount(
                        &format!("{field}.receiving_limit"),
                        &raw_limits.receiving_limit,
                    )?,
                    pool_count: raw_limits.pool_count,
                },
            );
        }
        limits.insert(chain, parsed);
    }

    Ok(HookConfig {
        hook_type: raw.hook_type,
        limits,
    })
}

// A partially filled super token means the project bridges an existing token.
fn parse_super_token(raw: &RawSuperTokenInfo) -> Result<Option<SuperTokenInfo>, ConfigError> {
    let (
        Some(name),
        Some(symbol),
        Some(decimals),
        Some(initial_supply_owner),
        Some(owner),
        Some(initial_supply),
    ) = (
        &raw.name,
        &raw.symbol,
        raw.decimals,
        &raw.initial_supply_owner,
        &raw.owner,
        &raw.initial_supply,
    )
    else {
        return Ok(None);
    };

    Ok(Some(SuperTokenInfo {
        name: name.clone(),
        symbol: symbol.clone(),
        decimals,
        initial_supply_owner: parse_address(
            "super_token.initial_supply_owner",
            initial_supply_owner,
        )?,
        owner: parse_address("super_token.owner", owner)?,
        initial_supply: parse_amount("super_token.initial_supply", initial_supply)?,
    }))
}
