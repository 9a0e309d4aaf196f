//! Contract deployment primitive.
//!
//! A [`ContractDeployer`] performs one on-chain deployment. [`get_or_deploy`] wraps it so
//! that an address already present in the chain's [`AddressRecord`] is returned without
//! touching the network.

use std::future::Future;

use serde::Deserialize;

use crate::types::{AddressKey, AddressRecord, ChainId, ContractKind};

mod dry_run;
mod forge;

pub use dry_run::DryRunDeployer;
pub use forge::{DEFAULT_DEPLOY_TIMEOUT, ForgeDeployer, ForgeOutput};

/// Private key of the deployer account.
///
/// Never printed: `Debug` redacts the key.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SignerKey(String);

impl SignerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("SignerKey(<unset>)")
        } else {
            f.write_str("SignerKey(<redacted>)")
        }
    }
}

/// Working context of one chain's deployment pass.
#[derive(Debug, Clone)]
pub struct DeployParams {
    pub chain_id: ChainId,
    pub signer: SignerKey,
    pub addresses: AddressRecord,
}

impl DeployParams {
    pub fn new(chain_id: ChainId, signer: SignerKey, addresses: AddressRecord) -> Self {
        Self {
            chain_id,
            signer,
            addresses,
        }
    }
}

/// A single contract to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Contract being deployed.
    pub kind: ContractKind,
    /// Entry of the address record the deployed address is stored under.
    pub key: AddressKey,
    /// Constructor arguments, already encoded as strings.
    pub args: Vec<String>,
}

impl DeployRequest {
    pub fn contract(kind: ContractKind, args: Vec<String>) -> Self {
        Self {
            kind,
            key: AddressKey::Contract(kind),
            args,
        }
    }

    pub fn with_key(mut self, key: AddressKey) -> Self {
        self.key = key;
        self
    }
}

/// Why a deployment did not produce an address.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The deployment itself failed (RPC error, reverted transaction, timeout).
    #[error("deployment of {kind} failed: {error:#}")]
    Failed {
        kind: ContractKind,
        error: anyhow::Error,
    },
    /// An address produced by an earlier step is not recorded yet.
    #[error("{kind} needs {missing}, which is not deployed yet")]
    MissingPrerequisite {
        kind: ContractKind,
        missing: AddressKey,
    },
    /// A value that only the configuration can provide is absent or invalid.
    #[error("{kind} cannot be deployed: {reason}")]
    Misconfigured { kind: ContractKind, reason: String },
}

impl DeployError {
    pub fn failed(kind: ContractKind, error: impl Into<anyhow::Error>) -> Self {
        DeployError::Failed {
            kind,
            error: error.into(),
        }
    }

    pub fn misconfigured(kind: ContractKind, reason: impl Into<String>) -> Self {
        DeployError::Misconfigured {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether retrying later can succeed without changing the configuration.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeployError::Misconfigured { .. })
    }

    pub fn kind(&self) -> ContractKind {
        match self {
            DeployError::Failed { kind, .. }
            | DeployError::MissingPrerequisite { kind, .. }
            | DeployError::Misconfigured { kind, .. } => *kind,
        }
    }
}

/// Performs a single contract deployment and returns the new address.
pub trait ContractDeployer: Send + Sync + 'static {
    /// Deploy `request` on the chain of `params`.
    fn deploy(
        &self,
        request: &DeployRequest,
        params: &DeployParams,
    ) -> impl Future<Output = Result<String, DeployError>> + Send;
}

/// Address returned by [`get_or_deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployed {
    pub address: String,
    /// `true` when the contract was deployed by this call.
    pub fresh: bool,
}

/// Return the recorded address for `request.key`, deploying the contract first when
/// none is recorded. A freshly deployed address is written to `params.addresses`
/// immediately.
pub async fn get_or_deploy<D: ContractDeployer>(
    deployer: &D,
    request: DeployRequest,
    params: &mut DeployParams,
) -> Result<Deployed, DeployError> {
    if let Some(address) = params.addresses.get(&request.key) {
        tracing::debug!(
            chain = params.chain_id,
            key = %request.key,
            address,
            "Already deployed, skipping"
        );
        return Ok(Deployed {
            address: address.to_string(),
            fresh: false,
        });
    }

    tracing::info!(
        chain = params.chain_id,
        key = %request.key,
        args = ?request.args,
        "Deploying {}",
        request.kind
    );

    let address = deployer.deploy(&request, params).await?;
    if address.trim().is_empty() {
        return Err(DeployError::failed(
            request.kind,
            anyhow::anyhow!("deployer returned an empty address"),
        ));
    }

    let address = params.addresses.insert_if_absent(request.key, address);
    tracing::info!(
        chain = params.chain_id,
        key = %request.key,
        address = %address,
        "Deployed {}",
        request.kind
    );

    Ok(Deployed {
        address,
        fresh: true,
    })
}
