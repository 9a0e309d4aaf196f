//! Hub and spoke classification of the configured chains.

use crate::{
    config::ProjectConfig,
    types::{ChainId, ChainRole},
};

/// The chains taking part in a deployment, by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRoles {
    pub hub: ChainId,
    pub spokes: Vec<ChainId>,
}

impl ChainRoles {
    pub fn resolve(config: &ProjectConfig) -> Self {
        Self {
            hub: config.hub_chain,
            spokes: config.spoke_chains.clone(),
        }
    }

    pub fn role_of(&self, chain: ChainId) -> Option<ChainRole> {
        if chain == self.hub {
            Some(ChainRole::Hub)
        } else if self.spokes.contains(&chain) {
            Some(ChainRole::Spoke)
        } else {
            None
        }
    }

    /// Chains `chain` keeps a connector to: every spoke for the hub, the hub for a
    /// spoke, nothing for a chain outside the deployment.
    pub fn siblings_of(&self, chain: ChainId) -> Vec<ChainId> {
        match self.role_of(chain) {
            Some(ChainRole::Hub) => self.spokes.clone(),
            Some(ChainRole::Spoke) => vec![self.hub],
            None => Vec::new(),
        }
    }

    /// Every chain, hub first.
    pub fn chains(&self) -> Vec<ChainId> {
        std::iter::once(self.hub)
            .chain(self.spokes.iter().copied())
            .collect()
    }
}
