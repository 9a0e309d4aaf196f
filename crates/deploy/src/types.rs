//! Typed address records persisted between deployment passes.

use std::collections::BTreeMap;

use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};

/// Numeric identifier of a blockchain network.
pub type ChainId = u64;

/// Role a contract plays in the bridge, independent of its address.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum ContractKind {
    ExchangeRate,
    Controller,
    Vault,
    ConnectorPlug,
    MintableToken,
    NonMintableToken,
    SuperToken,
    LimitHook,
    LyraTsaDepositHook,
    LyraTsaWithdrawHook,
}

impl ContractKind {
    /// Name of the solidity contract within its artifact.
    pub fn contract_name(&self) -> &'static str {
        match self {
            ContractKind::ExchangeRate => "ExchangeRate",
            ContractKind::Controller => "Controller",
            ContractKind::Vault => "Vault",
            ContractKind::ConnectorPlug => "ConnectorPlug",
            ContractKind::MintableToken | ContractKind::NonMintableToken => "ERC20",
            ContractKind::SuperToken => "SuperToken",
            ContractKind::LimitHook => "LimitHook",
            ContractKind::LyraTsaDepositHook => "LyraTSADepositHook",
            ContractKind::LyraTsaWithdrawHook => "LyraTSAWithdrawHook",
        }
    }

    /// Path of the solidity source the contract is compiled from.
    pub fn artifact(&self) -> &'static str {
        match self {
            ContractKind::ExchangeRate => "src/ExchangeRate.sol",
            ContractKind::Controller => "src/Controller.sol",
            ContractKind::Vault => "src/Vault.sol",
            ContractKind::ConnectorPlug => "src/ConnectorPlug.sol",
            ContractKind::MintableToken | ContractKind::NonMintableToken => "src/token/ERC20.sol",
            ContractKind::SuperToken => "src/token/SuperToken.sol",
            ContractKind::LimitHook => "src/hooks/LimitHook.sol",
            ContractKind::LyraTsaDepositHook => "src/hooks/LyraTSADepositHook.sol",
            ContractKind::LyraTsaWithdrawHook => "src/hooks/LyraTSAWithdrawHook.sol",
        }
    }
}

/// Messaging profile used by a connector between two chains.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IntegrationType {
    Fast,
    Optimistic,
    Native,
}

/// Which side of the bridge a chain hosts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChainRole {
    /// Hosts the controller (mint side).
    Hub,
    /// Hosts a vault (lock side).
    Spoke,
}

/// Key of a single entry in an [`AddressRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressKey {
    Contract(ContractKind),
    Connector {
        sibling: ChainId,
        integration: IntegrationType,
    },
}

impl std::fmt::Display for AddressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKey::Contract(kind) => write!(f, "{kind}"),
            AddressKey::Connector {
                sibling,
                integration,
            } => write!(f, "connectors.{sibling}.{integration}"),
        }
    }
}

/// Addresses deployed on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChainRole>,
    #[serde(default)]
    pub contracts: BTreeMap<ContractKind, String>,
    #[serde(default)]
    pub connectors: BTreeMap<ChainId, BTreeMap<IntegrationType, String>>,
}

impl AddressRecord {
    pub fn new(role: ChainRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    /// Returns the recorded address for `key`, ignoring empty entries.
    pub fn get(&self, key: &AddressKey) -> Option<&str> {
        let address = match key {
            AddressKey::Contract(kind) => self.contracts.get(kind),
            AddressKey::Connector {
                sibling,
                integration,
            } => self
                .connectors
                .get(sibling)
                .and_then(|by_type| by_type.get(integration)),
        };
        address.map(String::as_str).filter(|a| !a.is_empty())
    }

    pub fn contains(&self, key: &AddressKey) -> bool {
        self.get(key).is_some()
    }

    pub fn contract(&self, kind: ContractKind) -> Option<&str> {
        self.get(&AddressKey::Contract(kind))
    }

    /// Records `address` under `key` unless a non-empty address is already present.
    ///
    /// Returns the address that ends up recorded, which is the existing one when the
    /// entry was already filled.
    pub fn insert_if_absent(&mut self, key: AddressKey, address: String) -> String {
        if let Some(existing) = self.get(&key) {
            return existing.to_string();
        }

        match key {
            AddressKey::Contract(kind) => {
                self.contracts.insert(kind, address.clone());
            }
            AddressKey::Connector {
                sibling,
                integration,
            } => {
                self.connectors
                    .entry(sibling)
                    .or_default()
                    .insert(integration, address.clone());
            }
        }
        address
    }

    /// Copies every entry of `other` that is missing here.
    pub fn merge_from(&mut self, other: &AddressRecord) {
        if self.role.is_none() {
            self.role = other.role;
        }
        for (kind, address) in &other.contracts {
            self.insert_if_absent(AddressKey::Contract(*kind), address.clone());
        }
        for (sibling, by_type) in &other.connectors {
            for (integration, address) in by_type {
                self.insert_if_absent(
                    AddressKey::Connector {
                        sibling: *sibling,
                        integration: *integration,
                    },
                    address.clone(),
                );
            }
        }
    }

    /// Number of non-empty addresses held by the record.
    pub fn len(&self) -> usize {
        let contracts = self.contracts.values().filter(|a| !a.is_empty()).count();
        let connectors = self
            .connectors
            .values()
            .flat_map(|by_type| by_type.values())
            .filter(|a| !a.is_empty())
            .count();
        contracts + connectors
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every chain's [`AddressRecord`], the durable deployment checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut, From)]
#[serde(transparent)]
pub struct DeploymentAddresses(pub BTreeMap<ChainId, AddressRecord>);

impl DeploymentAddresses {
    pub fn record(&self, chain: ChainId) -> AddressRecord {
        self.0.get(&chain).cloned().unwrap_or_default()
    }

    /// Merges `record` into the entry for `chain`, keeping addresses already present.
    pub fn merge_chain(&mut self, chain: ChainId, record: &AddressRecord) {
        self.0.entry(chain).or_default().merge_from(record);
    }
}
