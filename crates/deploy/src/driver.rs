//! Per-chain deployment pass.
//!
//! A chain moves through `NeedsRoleContracts -> NeedsConnectors -> Complete`. The state
//! is never stored: [`ChainState::derive`] recomputes it from the chain's
//! [`AddressRecord`], so a pass interrupted at any point resumes from the persisted
//! addresses alone.

use std::sync::Arc;

use crate::{
    config::ProjectConfig,
    deployer::{ContractDeployer, DeployError, DeployParams, DeployRequest, SignerKey, get_or_deploy},
    roles::ChainRoles,
    store::AddressStore,
    types::{AddressKey, AddressRecord, ChainId, ChainRole, ContractKind, IntegrationType},
};

/// Deployment progress of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// Some contracts required by the chain's role are missing.
    NeedsRoleContracts { missing: Vec<ContractKind> },
    /// Role contracts exist; these connectors are still missing.
    NeedsConnectors {
        remaining: Vec<(ChainId, IntegrationType)>,
    },
    Complete,
}

impl ChainState {
    pub fn derive(
        record: &AddressRecord,
        required_contracts: &[ContractKind],
        required_connectors: &[(ChainId, IntegrationType)],
    ) -> Self {
        let missing: Vec<_> = required_contracts
            .iter()
            .copied()
            .filter(|kind| record.contract(*kind).is_none())
            .collect();
        if !missing.is_empty() {
            return ChainState::NeedsRoleContracts { missing };
        }

        let remaining: Vec<_> = required_connectors
            .iter()
            .copied()
            .filter(|(sibling, integration)| {
                !record.contains(&AddressKey::Connector {
                    sibling: *sibling,
                    integration: *integration,
                })
            })
            .collect();
        if !remaining.is_empty() {
            return ChainState::NeedsConnectors { remaining };
        }

        ChainState::Complete
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ChainState::Complete)
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainState::NeedsRoleContracts { missing } => {
                let missing: Vec<_> = missing.iter().map(ToString::to_string).collect();
                write!(f, "needs role contracts ({})", missing.join(", "))
            }
            ChainState::NeedsConnectors { remaining } => {
                let remaining: Vec<_> = remaining
                    .iter()
                    .map(|(sibling, integration)| format!("{sibling}/{integration}"))
                    .collect();
                write!(f, "needs connectors ({})", remaining.join(", "))
            }
            ChainState::Complete => f.write_str("complete"),
        }
    }
}

/// Errors that abort a pass before its outcome can be reported.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("chain {0} is neither the hub nor a spoke of this deployment")]
    UnknownChain(ChainId),
    #[error("failed to persist addresses of chain {chain}: {error:#}")]
    Persist { chain: ChainId, error: anyhow::Error },
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Persist { .. })
    }
}

/// Outcome of one [`DeploymentDriver::run_once`] call.
#[derive(Debug)]
pub struct PassReport {
    pub chain: ChainId,
    /// State derived from the record after the pass.
    pub state: ChainState,
    /// Contracts deployed by this pass.
    pub deployed: usize,
    /// Deployments that failed during this pass.
    pub failures: Vec<DeployError>,
}

impl PassReport {
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// First failure that retrying cannot fix.
    pub fn permanent_failure(&self) -> Option<&DeployError> {
        self.failures.iter().find(|e| !e.is_retryable())
    }

    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return self.state.to_string();
        }
        let failures: Vec<_> = self.failures.iter().map(ToString::to_string).collect();
        format!("{}: {}", self.state, failures.join("; "))
    }
}

#[derive(Default)]
struct Pass {
    deployed: usize,
    failures: Vec<DeployError>,
}

/// Deploys the contracts of one chain, one pass at a time.
pub struct DeploymentDriver<D> {
    config: Arc<ProjectConfig>,
    roles: ChainRoles,
    deployer: Arc<D>,
    store: Arc<AddressStore>,
}

impl<D: ContractDeployer> DeploymentDriver<D> {
    pub fn new(config: Arc<ProjectConfig>, deployer: Arc<D>, store: Arc<AddressStore>) -> Self {
        let roles = ChainRoles::resolve(&config);
        Self {
            config,
            roles,
            deployer,
            store,
        }
    }

    pub fn roles(&self) -> &ChainRoles {
        &self.roles
    }

    pub fn store(&self) -> &Arc<AddressStore> {
        &self.store
    }

    /// Build the working context of `chain` from the persisted addresses.
    pub async fn params_for(
        &self,
        chain: ChainId,
        signer: SignerKey,
    ) -> Result<DeployParams, DriverError> {
        let role = self
            .roles
            .role_of(chain)
            .ok_or(DriverError::UnknownChain(chain))?;
        let mut addresses = self.store.record(chain).await;
        addresses.role.get_or_insert(role);
        Ok(DeployParams::new(chain, signer, addresses))
    }

    /// The token contract the hub's controller mints.
    ///
    /// A configured or recorded `MintableToken` wins. `SuperToken` is only required when
    /// neither exists and one was recorded or can be deployed.
    fn hub_token_kind(&self, record: &AddressRecord) -> ContractKind {
        let has_mintable = self.config.token_address(self.roles.hub).is_some()
            || record.contract(ContractKind::MintableToken).is_some();
        let has_super = record.contract(ContractKind::SuperToken).is_some()
            || self.config.super_token.is_some();
        if !has_mintable && has_super {
            ContractKind::SuperToken
        } else {
            ContractKind::MintableToken
        }
    }

    /// Contracts a chain with `role` must host before connectors can be wired, given
    /// what `record` already holds.
    pub fn required_contracts(&self, role: ChainRole, record: &AddressRecord) -> Vec<ContractKind> {
        let mut required = match role {
            ChainRole::Hub => vec![
                self.hub_token_kind(record),
                ContractKind::ExchangeRate,
                ContractKind::Controller,
            ],
            ChainRole::Spoke => vec![ContractKind::NonMintableToken, ContractKind::Vault],
        };
        required.extend(self.config.hook.hook_type.contract_kind());
        required
    }

    /// Every (sibling, integration type) pair `chain` needs a connector for.
    pub fn required_connectors(&self, chain: ChainId) -> Vec<(ChainId, IntegrationType)> {
        self.roles
            .siblings_of(chain)
            .into_iter()
            .flat_map(|sibling| {
                self.config
                    .integration_types
                    .iter()
                    .map(move |integration| (sibling, *integration))
            })
            .collect()
    }

    /// Current state of `chain` according to `record`.
    pub fn state_of(&self, chain: ChainId, record: &AddressRecord) -> Result<ChainState, DriverError> {
        let role = self
            .roles
            .role_of(chain)
            .ok_or(DriverError::UnknownChain(chain))?;
        Ok(ChainState::derive(
            record,
            &self.required_contracts(role, record),
            &self.required_connectors(chain),
        ))
    }

    /// Run one deployment attempt for `params.chain_id`.
    ///
    /// Deploys whatever the chain is missing, then persists the record whether or not
    /// every deployment succeeded. Independent deployments keep going after a failure.
    pub async fn run_once(&self, params: &mut DeployParams) -> Result<PassReport, DriverError> {
        let chain = params.chain_id;
        let role = self
            .roles
            .role_of(chain)
            .ok_or(DriverError::UnknownChain(chain))?;
        params.addresses.role.get_or_insert(role);

        tracing::info!(chain, %role, "Starting deployment pass");

        let mut pass = Pass::default();
        match role {
            ChainRole::Hub => self.deploy_hub_contracts(params, &mut pass).await,
            ChainRole::Spoke => self.deploy_spoke_contracts(params, &mut pass).await,
        }
        self.deploy_connectors(role, params, &mut pass).await;

        self.store
            .save(&params.addresses, chain)
            .await
            .map_err(|error| DriverError::Persist { chain, error })?;

        let state = self.state_of(chain, &params.addresses)?;
        let report = PassReport {
            chain,
            state,
            deployed: pass.deployed,
            failures: pass.failures,
        };

        if report.is_complete() {
            tracing::info!(chain, deployed = report.deployed, "All contracts deployed");
        } else {
            tracing::warn!(
                chain,
                deployed = report.deployed,
                failures = report.failures.len(),
                state = %report.state,
                "Deployment pass incomplete"
            );
        }

        Ok(report)
    }

    async fn step(
        &self,
        request: DeployRequest,
        params: &mut DeployParams,
        pass: &mut Pass,
    ) -> Option<String> {
        let key = request.key;
        match get_or_deploy(self.deployer.as_ref(), request, params).await {
            Ok(deployed) => {
                if deployed.fresh {
                    pass.deployed += 1;
                }
                Some(deployed.address)
            }
            Err(e) => {
                tracing::warn!(chain = params.chain_id, %key, error = %e, "Deployment failed");
                pass.failures.push(e);
                None
            }
        }
    }

    /// Record the token configured for the chain under `kind`.
    ///
    /// A token already recorded wins over the configuration.
    fn seed_token(&self, kind: ContractKind, params: &mut DeployParams) -> Option<String> {
        let Some(configured) = self.config.token_address(params.chain_id) else {
            return params.addresses.contract(kind).map(str::to_string);
        };
        let configured = configured.to_string();
        let recorded = params
            .addresses
            .insert_if_absent(AddressKey::Contract(kind), configured.clone());
        if !recorded.eq_ignore_ascii_case(&configured) {
            tracing::warn!(
                chain = params.chain_id,
                %kind,
                recorded = %recorded,
                configured = %configured,
                "Configured token differs from the recorded one, keeping the recorded address"
            );
        }
        Some(recorded)
    }

    async fn deploy_hub_contracts(&self, params: &mut DeployParams, pass: &mut Pass) {
        let seeded = self
            .seed_token(ContractKind::MintableToken, params)
            .or_else(|| {
                params
                    .addresses
                    .contract(ContractKind::SuperToken)
                    .map(str::to_string)
            });
        let token_kind = self.hub_token_kind(&params.addresses);

        let mut token_misconfigured = false;
        let token = match (seeded, &self.config.super_token) {
            (Some(token), _) => Some(token),
            (None, Some(info)) => {
                let request = DeployRequest::contract(
                    ContractKind::SuperToken,
                    vec![
                        info.name.clone(),
                        info.symbol.clone(),
                        info.decimals.to_string(),
                        info.initial_supply_owner.to_string(),
                        info.owner.to_string(),
                        info.initial_supply.to_string(),
                    ],
                );
                self.step(request, params, pass).await
            }
            (None, None) => {
                token_misconfigured = true;
                pass.failures.push(DeployError::misconfigured(
                    ContractKind::Controller,
                    format!(
                        "no token address or super token configured for hub chain {}",
                        params.chain_id
                    ),
                ));
                None
            }
        };

        let exchange_rate = self
            .step(
                DeployRequest::contract(ContractKind::ExchangeRate, vec![]),
                params,
                pass,
            )
            .await;

        let controller = match (token, exchange_rate) {
            (Some(token), Some(exchange_rate)) => {
                let request =
                    DeployRequest::contract(ContractKind::Controller, vec![token, exchange_rate]);
                self.step(request, params, pass).await
            }
            // Already reported as misconfigured.
            (None, _) if token_misconfigured => None,
            (None, _) => {
                pass.failures.push(DeployError::MissingPrerequisite {
                    kind: ContractKind::Controller,
                    missing: AddressKey::Contract(token_kind),
                });
                None
            }
            (_, None) => {
                pass.failures.push(DeployError::MissingPrerequisite {
                    kind: ContractKind::Controller,
                    missing: AddressKey::Contract(ContractKind::ExchangeRate),
                });
                None
            }
        };

        self.deploy_hook(ContractKind::Controller, controller, params, pass)
            .await;
    }

    async fn deploy_spoke_contracts(&self, params: &mut DeployParams, pass: &mut Pass) {
        let vault = match self.seed_token(ContractKind::NonMintableToken, params) {
            Some(token) => {
                self.step(
                    DeployRequest::contract(ContractKind::Vault, vec![token]),
                    params,
                    pass,
                )
                .await
            }
            None => {
                pass.failures.push(DeployError::misconfigured(
                    ContractKind::Vault,
                    format!(
                        "no token address configured for spoke chain {}",
                        params.chain_id
                    ),
                ));
                None
            }
        };

        self.deploy_hook(ContractKind::Vault, vault, params, pass)
            .await;
    }

    async fn deploy_hook(
        &self,
        hub_kind: ContractKind,
        hub_or_vault: Option<String>,
        params: &mut DeployParams,
        pass: &mut Pass,
    ) {
        let Some(hook_kind) = self.config.hook.hook_type.contract_kind() else {
            return;
        };
        let Some(hub_or_vault) = hub_or_vault else {
            pass.failures.push(DeployError::MissingPrerequisite {
                kind: hook_kind,
                missing: AddressKey::Contract(hub_kind),
            });
            return;
        };

        let use_pools = self
            .config
            .hook
            .limits
            .get(&params.chain_id)
            .is_some_and(|by_type| by_type.values().any(|limits| limits.pool_count.is_some()));

        if let Some(limits) = self.config.limits_summary(params.chain_id) {
            tracing::info!(chain = params.chain_id, %hook_kind, %limits, "Hook limits");
        }

        let request = DeployRequest::contract(hook_kind, vec![hub_or_vault, use_pools.to_string()]);
        self.step(request, params, pass).await;
    }

    async fn deploy_connectors(&self, role: ChainRole, params: &mut DeployParams, pass: &mut Pass) {
        let chain = params.chain_id;
        let missing: Vec<_> = self
            .required_connectors(chain)
            .into_iter()
            .map(|(sibling, integration)| AddressKey::Connector {
                sibling,
                integration,
            })
            .filter(|key| !params.addresses.contains(key))
            .collect();
        if missing.is_empty() {
            return;
        }

        let hub_kind = match role {
            ChainRole::Hub => ContractKind::Controller,
            ChainRole::Spoke => ContractKind::Vault,
        };
        let Some(hub_or_vault) = params.addresses.contract(hub_kind).map(str::to_string) else {
            pass.failures.push(DeployError::MissingPrerequisite {
                kind: ContractKind::ConnectorPlug,
                missing: AddressKey::Contract(hub_kind),
            });
            return;
        };
        let Some(socket) = self.config.socket(chain) else {
            pass.failures.push(DeployError::misconfigured(
                ContractKind::ConnectorPlug,
                format!("no socket configured for chain {chain}"),
            ));
            return;
        };

        for key in missing {
            let AddressKey::Connector { sibling, .. } = key else {
                continue;
            };
            let request = DeployRequest::contract(
                ContractKind::ConnectorPlug,
                vec![hub_or_vault.clone(), socket.to_string(), sibling.to_string()],
            )
            .with_key(key);
            self.step(request, params, pass).await;
        }
    }
}
