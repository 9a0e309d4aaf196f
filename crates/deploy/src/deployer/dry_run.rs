//! Deployer that derives addresses instead of sending transactions.

use alloy_core::primitives::Address;
use sha2::{Digest, Sha256};

use super::{ContractDeployer, DeployError, DeployParams, DeployRequest};

/// Produces deterministic pseudo-addresses from the chain, contract key and
/// constructor arguments. Used to rehearse a deployment and inspect the resulting
/// address file without touching any network.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunDeployer;

impl DryRunDeployer {
    pub fn address_for(request: &DeployRequest, params: &DeployParams) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(params.chain_id.to_be_bytes());
        hasher.update(request.key.to_string().as_bytes());
        for arg in &request.args {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        let digest = hasher.finalize();
        Address::from_slice(&digest[12..])
    }
}

impl ContractDeployer for DryRunDeployer {
    async fn deploy(
        &self,
        request: &DeployRequest,
        params: &DeployParams,
    ) -> Result<String, DeployError> {
        let address = Self::address_for(request, params);
        tracing::debug!(
            chain = params.chain_id,
            key = %request.key,
            digest = %hex::encode(address.as_slice()),
            "Dry run, no transaction sent"
        );
        Ok(address.to_string())
    }
}
