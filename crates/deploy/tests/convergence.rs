//! Convergence tests for the multi-chain deployment driver.
//!
//! A stub deployer stands in for the chain: it derives addresses the same way the dry
//! run deployer does, records every call and can be told to fail specific
//! (chain, key) pairs.
//! Run with: cargo test --test convergence

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
};

use bridgeup_deploy::{
    AddressKey, AddressRecord, AddressStore, ChainId, ChainState, ChainStatus, ContractDeployer,
    ContractKind, DeployError, DeployParams, DeployRequest, DeploymentDriver, DeploymentMode,
    DriverError, DryRunDeployer, HookType, IntegrationType, Orchestrator, ProjectConfig,
    ProjectSelection, RawChainConfig, RawHookConfig, RawLimits, RawSuperTokenInfo,
    RawTokenConstants, RetryConfig, SignerKey,
};
use tempdir::TempDir;

const HUB: ChainId = 1;
const SPOKE_A: ChainId = 2;
const SPOKE_B: ChainId = 3;

#[derive(Default)]
struct StubDeployer {
    calls: Mutex<Vec<(ChainId, AddressKey, Vec<String>)>>,
    failing: Mutex<HashSet<(ChainId, AddressKey)>>,
}

impl StubDeployer {
    fn fail(&self, chain: ChainId, key: AddressKey) {
        self.failing.lock().unwrap().insert((chain, key));
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_for(&self, chain: ChainId, key: AddressKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, k, _)| *c == chain && *k == key)
            .count()
    }

    /// Constructor arguments of the last deployment of `key` on `chain`.
    fn args_for(&self, chain: ChainId, key: AddressKey) -> Option<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, k, _)| *c == chain && *k == key)
            .map(|(_, _, args)| args.clone())
    }
}

impl ContractDeployer for StubDeployer {
    async fn deploy(
        &self,
        request: &DeployRequest,
        params: &DeployParams,
    ) -> Result<String, DeployError> {
        self.calls
            .lock()
            .unwrap()
            .push((params.chain_id, request.key, request.args.clone()));

        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(params.chain_id, request.key))
        {
            return Err(DeployError::failed(
                request.kind,
                anyhow::anyhow!("injected failure"),
            ));
        }

        Ok(DryRunDeployer::address_for(request, params).to_string())
    }
}

fn address(n: u64) -> String {
    format!("0x{n:040x}")
}

fn connector(sibling: ChainId) -> AddressKey {
    AddressKey::Connector {
        sibling,
        integration: IntegrationType::Fast,
    }
}

fn project(spokes: &[ChainId]) -> Arc<ProjectConfig> {
    project_with(spokes, |_| {})
}

fn project_with(
    spokes: &[ChainId],
    customize: impl FnOnce(&mut RawTokenConstants),
) -> Arc<ProjectConfig> {
    let all_chains = std::iter::once(HUB).chain(spokes.iter().copied());

    let mut raw = RawTokenConstants {
        hub_chain: HUB,
        spoke_chains: spokes.to_vec(),
        integration_types: vec![IntegrationType::Fast],
        token_addresses: all_chains
            .clone()
            .map(|chain| (chain.to_string(), address(1000 + chain)))
            .collect(),
        super_token: None,
        hook: Default::default(),
    };
    customize(&mut raw);
    let chains: BTreeMap<String, RawChainConfig> = all_chains
        .map(|chain| {
            (
                chain.to_string(),
                RawChainConfig {
                    rpc_url: None,
                    socket: Some(address(2000 + chain)),
                },
            )
        })
        .collect();

    let selection = ProjectSelection {
        project: "testing".to_string(),
        mode: DeploymentMode::Dev,
        token: "USDC".to_string(),
    };
    Arc::new(ProjectConfig::from_raw(selection, &raw, &chains).expect("valid project config"))
}

fn super_token() -> RawSuperTokenInfo {
    RawSuperTokenInfo {
        name: Some("Bridged USDC".to_string()),
        symbol: Some("USDC.b".to_string()),
        decimals: Some(6),
        initial_supply_owner: Some(address(7)),
        owner: Some(address(8)),
        initial_supply: Some("1000".to_string()),
    }
}

fn fast_limits(pool_count: Option<u32>) -> BTreeMap<IntegrationType, RawLimits> {
    BTreeMap::from([(
        IntegrationType::Fast,
        RawLimits {
            sending_limit: "1000000".to_string(),
            receiving_limit: "1000000".to_string(),
            pool_count,
        },
    )])
}

/// Initialize tracing for tests (idempotent).
fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

fn fast_retry(max_attempts: usize) -> RetryConfig {
    RetryConfig {
        min_delay_ms: 1,
        max_delay_ms: 5,
        max_attempts,
        jitter: false,
    }
}

fn store_at(dir: &Path) -> Arc<AddressStore> {
    Arc::new(AddressStore::open(dir.join("addresses.json")))
}

async fn params(driver: &DeploymentDriver<impl ContractDeployer>, chain: ChainId) -> DeployParams {
    driver
        .params_for(chain, SignerKey::default())
        .await
        .expect("chain is part of the deployment")
}

#[tokio::test]
async fn test_hub_with_two_spokes_reaches_expected_records() {
    init_test_tracing();
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let store = store_at(temp_dir.path());
    let driver = Arc::new(DeploymentDriver::new(
        project(&[SPOKE_A, SPOKE_B]),
        Arc::new(StubDeployer::default()),
        store.clone(),
    ));

    let outcomes = Orchestrator::new(driver, fast_retry(3), SignerKey::default())
        .run_all()
        .await;
    assert!(outcomes.iter().all(|o| o.is_complete()), "{outcomes:?}");

    let persisted = AddressStore::load(store.path());
    let hub = persisted.record(HUB);
    for kind in [ContractKind::ExchangeRate, ContractKind::Controller] {
        assert!(hub.contract(kind).is_some(), "hub is missing {kind}");
    }
    assert!(hub.contains(&connector(SPOKE_A)));
    assert!(hub.contains(&connector(SPOKE_B)));
    assert!(hub.contract(ContractKind::Vault).is_none());

    for spoke in [SPOKE_A, SPOKE_B] {
        let record = persisted.record(spoke);
        assert!(record.contract(ContractKind::Vault).is_some());
        assert!(record.contains(&connector(HUB)));
        assert!(record.contract(ContractKind::Controller).is_none());
        assert_eq!(record.connectors.len(), 1);
    }
}

#[tokio::test]
async fn test_second_pass_deploys_nothing() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let deployer = Arc::new(StubDeployer::default());
    let driver = DeploymentDriver::new(
        project(&[SPOKE_A]),
        deployer.clone(),
        store_at(temp_dir.path()),
    );

    let mut hub = params(&driver, HUB).await;
    let first = driver.run_once(&mut hub).await.unwrap();
    assert!(first.is_complete());
    assert_eq!(first.deployed, 3);

    let calls = deployer.call_count();
    let second = driver.run_once(&mut hub).await.unwrap();
    assert!(second.is_complete());
    assert_eq!(second.deployed, 0);
    assert_eq!(deployer.call_count(), calls);
}

#[tokio::test]
async fn test_converges_within_two_passes() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let driver = DeploymentDriver::new(
        project(&[SPOKE_A]),
        Arc::new(StubDeployer::default()),
        store_at(temp_dir.path()),
    );

    for chain in [HUB, SPOKE_A] {
        let mut params = params(&driver, chain).await;
        let mut passes = 0;
        loop {
            passes += 1;
            if driver.run_once(&mut params).await.unwrap().is_complete() {
                break;
            }
            assert!(passes < 2, "chain {chain} did not converge");
        }
    }
}

#[tokio::test]
async fn test_failed_connector_does_not_block_sibling() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let deployer = Arc::new(StubDeployer::default());
    let store = store_at(temp_dir.path());
    let driver = DeploymentDriver::new(project(&[SPOKE_A, SPOKE_B]), deployer.clone(), store);
    deployer.fail(HUB, connector(SPOKE_A));

    let mut hub = params(&driver, HUB).await;
    let first = driver.run_once(&mut hub).await.unwrap();
    assert!(!first.is_complete());
    assert_eq!(first.failures.len(), 1);
    assert!(first.permanent_failure().is_none());

    let persisted = AddressStore::load(driver.store().path()).record(HUB);
    let wired_b = persisted
        .get(&connector(SPOKE_B))
        .expect("connector to B is persisted")
        .to_string();
    assert!(!persisted.contains(&connector(SPOKE_A)));

    deployer.heal();
    let second = driver.run_once(&mut hub).await.unwrap();
    assert!(second.is_complete());
    assert_eq!(second.deployed, 1);
    assert_eq!(deployer.calls_for(HUB, connector(SPOKE_A)), 2);
    assert_eq!(deployer.calls_for(HUB, connector(SPOKE_B)), 1);
    assert_eq!(hub.addresses.get(&connector(SPOKE_B)), Some(wired_b.as_str()));
}

#[tokio::test]
async fn test_recorded_address_is_never_replaced() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let store = store_at(temp_dir.path());

    let mut seeded = AddressRecord::default();
    seeded.insert_if_absent(
        AddressKey::Contract(ContractKind::Controller),
        "0xfixed".to_string(),
    );
    store.save(&seeded, HUB).await.unwrap();

    let deployer = Arc::new(StubDeployer::default());
    let driver = DeploymentDriver::new(project(&[SPOKE_A]), deployer.clone(), store.clone());

    let mut hub = params(&driver, HUB).await;
    assert!(driver.run_once(&mut hub).await.unwrap().is_complete());
    assert!(driver.run_once(&mut hub).await.unwrap().is_complete());

    assert_eq!(
        deployer.calls_for(HUB, AddressKey::Contract(ContractKind::Controller)),
        0
    );
    assert_eq!(
        store.record(HUB).await.contract(ContractKind::Controller),
        Some("0xfixed")
    );
}

#[tokio::test]
async fn test_resume_after_crash_matches_uninterrupted_run() {
    init_test_tracing();
    let spokes = [SPOKE_A, SPOKE_B];

    let uninterrupted_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let uninterrupted = DeploymentDriver::new(
        project(&spokes),
        Arc::new(StubDeployer::default()),
        store_at(uninterrupted_dir.path()),
    );
    for chain in [HUB, SPOKE_A, SPOKE_B] {
        let mut params = params(&uninterrupted, chain).await;
        assert!(uninterrupted.run_once(&mut params).await.unwrap().is_complete());
    }

    // First process: role contracts land, every connector fails, then the process dies.
    let resumed_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    {
        let deployer = Arc::new(StubDeployer::default());
        for sibling in spokes {
            deployer.fail(HUB, connector(sibling));
        }
        let driver = DeploymentDriver::new(
            project(&spokes),
            deployer,
            store_at(resumed_dir.path()),
        );
        let mut hub = params(&driver, HUB).await;
        let report = driver.run_once(&mut hub).await.unwrap();
        assert!(matches!(report.state, ChainState::NeedsConnectors { .. }));
    }

    // Second process: starts from the persisted file alone.
    let deployer = Arc::new(StubDeployer::default());
    let driver = DeploymentDriver::new(
        project(&spokes),
        deployer.clone(),
        store_at(resumed_dir.path()),
    );
    for chain in [HUB, SPOKE_A, SPOKE_B] {
        let mut params = params(&driver, chain).await;
        assert!(driver.run_once(&mut params).await.unwrap().is_complete());
    }
    assert_eq!(
        deployer.calls_for(HUB, AddressKey::Contract(ContractKind::Controller)),
        0
    );

    let expected = AddressStore::load(&uninterrupted_dir.path().join("addresses.json"));
    let resumed = AddressStore::load(&resumed_dir.path().join("addresses.json"));
    assert_eq!(resumed, expected);
}

#[tokio::test]
async fn test_missing_token_is_reported_as_misconfigured() {
    init_test_tracing();
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");

    let mut config = (*project(&[SPOKE_A, SPOKE_B])).clone();
    config.token_addresses.remove(&SPOKE_B);

    let driver = Arc::new(DeploymentDriver::new(
        Arc::new(config),
        Arc::new(StubDeployer::default()),
        store_at(temp_dir.path()),
    ));
    let outcomes = Orchestrator::new(driver, fast_retry(5), SignerKey::default())
        .run(&[HUB, SPOKE_A, SPOKE_B])
        .await;

    let by_chain: BTreeMap<_, _> = outcomes.into_iter().map(|o| (o.chain, o.status)).collect();
    assert!(matches!(by_chain[&HUB], ChainStatus::Complete { .. }));
    assert!(matches!(by_chain[&SPOKE_A], ChainStatus::Complete { .. }));
    assert!(matches!(
        by_chain[&SPOKE_B],
        ChainStatus::Misconfigured { passes: 1, .. }
    ));
}

#[tokio::test]
async fn test_persistent_failure_stalls_after_retry_budget() {
    init_test_tracing();
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let deployer = Arc::new(StubDeployer::default());
    deployer.fail(HUB, AddressKey::Contract(ContractKind::ExchangeRate));

    let driver = Arc::new(DeploymentDriver::new(
        project(&[SPOKE_A]),
        deployer.clone(),
        store_at(temp_dir.path()),
    ));
    let outcomes = Orchestrator::new(driver, fast_retry(2), SignerKey::default())
        .run(&[HUB, SPOKE_A])
        .await;

    assert!(matches!(
        outcomes[0].status,
        ChainStatus::Stalled { passes: 3, .. }
    ));
    assert!(outcomes[1].is_complete());
    assert_eq!(
        deployer.calls_for(HUB, AddressKey::Contract(ContractKind::ExchangeRate)),
        3
    );
}

#[tokio::test]
async fn test_unknown_chain_is_rejected() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let driver = Arc::new(DeploymentDriver::new(
        project(&[SPOKE_A]),
        Arc::new(StubDeployer::default()),
        store_at(temp_dir.path()),
    ));

    let outcomes = Orchestrator::new(driver, fast_retry(1), SignerKey::default())
        .run(&[99])
        .await;
    assert!(matches!(
        outcomes[0].status,
        ChainStatus::Misconfigured { passes: 0, .. }
    ));
}

#[tokio::test]
async fn test_recorded_mintable_token_completes_hub_with_super_token_metadata() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let store = store_at(temp_dir.path());

    let mut seeded = AddressRecord::default();
    seeded.insert_if_absent(AddressKey::Contract(ContractKind::MintableToken), address(42));
    store.save(&seeded, HUB).await.unwrap();

    let deployer = Arc::new(StubDeployer::default());
    let config = project_with(&[SPOKE_A], |raw| {
        raw.token_addresses.remove(&HUB.to_string());
        raw.super_token = Some(super_token());
    });
    let driver = DeploymentDriver::new(config, deployer.clone(), store);

    let mut hub = params(&driver, HUB).await;
    let report = driver.run_once(&mut hub).await.unwrap();
    assert!(report.is_complete(), "{}", report.state);
    assert!(report.failures.is_empty());

    assert_eq!(
        deployer.calls_for(HUB, AddressKey::Contract(ContractKind::SuperToken)),
        0
    );
    let controller_args = deployer
        .args_for(HUB, AddressKey::Contract(ContractKind::Controller))
        .expect("controller deployed");
    assert_eq!(controller_args[0], address(42));
}

#[tokio::test]
async fn test_hub_deploys_super_token_without_configured_token() {
    init_test_tracing();
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let store = store_at(temp_dir.path());
    let deployer = Arc::new(StubDeployer::default());
    let config = project_with(&[SPOKE_A], |raw| {
        raw.token_addresses.remove(&HUB.to_string());
        raw.super_token = Some(super_token());
    });
    let driver = DeploymentDriver::new(config, deployer.clone(), store.clone());

    let mut hub = params(&driver, HUB).await;
    assert!(driver.run_once(&mut hub).await.unwrap().is_complete());

    let record = store.record(HUB).await;
    let super_token = record
        .contract(ContractKind::SuperToken)
        .expect("super token recorded")
        .to_string();
    assert!(record.contract(ContractKind::MintableToken).is_none());

    let token_args = deployer
        .args_for(HUB, AddressKey::Contract(ContractKind::SuperToken))
        .unwrap();
    assert_eq!(token_args[..3], ["Bridged USDC", "USDC.b", "6"]);
    assert_eq!(token_args[5], "1000");

    let controller_args = deployer
        .args_for(HUB, AddressKey::Contract(ContractKind::Controller))
        .unwrap();
    assert_eq!(controller_args[0], super_token);
}

#[tokio::test]
async fn test_hub_without_any_token_reports_one_misconfiguration() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let config = project_with(&[SPOKE_A], |raw| {
        raw.token_addresses.remove(&HUB.to_string());
    });
    let driver = Arc::new(DeploymentDriver::new(
        config,
        Arc::new(StubDeployer::default()),
        store_at(temp_dir.path()),
    ));

    let mut hub = params(&driver, HUB).await;
    let report = driver.run_once(&mut hub).await.unwrap();
    assert!(matches!(
        report.state,
        ChainState::NeedsRoleContracts { ref missing } if missing.contains(&ContractKind::MintableToken)
    ));
    let controller_failures: Vec<_> = report
        .failures
        .iter()
        .filter(|e| e.kind() == ContractKind::Controller)
        .collect();
    assert_eq!(controller_failures.len(), 1);
    assert!(matches!(
        controller_failures[0],
        DeployError::Misconfigured { .. }
    ));

    let outcomes = Orchestrator::new(driver, fast_retry(3), SignerKey::default())
        .run(&[HUB])
        .await;
    assert!(matches!(
        outcomes[0].status,
        ChainStatus::Misconfigured { passes: 1, .. }
    ));
}

#[tokio::test]
async fn test_limit_hook_is_required_and_gets_pool_flag() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    let store = store_at(temp_dir.path());
    let deployer = Arc::new(StubDeployer::default());
    let config = project_with(&[SPOKE_A], |raw| {
        raw.hook = RawHookConfig {
            hook_type: HookType::LimitHook,
            limits: BTreeMap::from([
                (HUB.to_string(), fast_limits(None)),
                (SPOKE_A.to_string(), fast_limits(Some(2))),
            ]),
        };
    });
    let driver = DeploymentDriver::new(config, deployer.clone(), store.clone());
    let hook = AddressKey::Contract(ContractKind::LimitHook);

    deployer.fail(HUB, hook);
    let mut hub = params(&driver, HUB).await;
    let first = driver.run_once(&mut hub).await.unwrap();
    assert_eq!(
        first.state,
        ChainState::NeedsRoleContracts {
            missing: vec![ContractKind::LimitHook]
        }
    );

    deployer.heal();
    assert!(driver.run_once(&mut hub).await.unwrap().is_complete());
    let mut spoke = params(&driver, SPOKE_A).await;
    assert!(driver.run_once(&mut spoke).await.unwrap().is_complete());

    let hub_record = store.record(HUB).await;
    let spoke_record = store.record(SPOKE_A).await;
    assert!(hub_record.contract(ContractKind::LimitHook).is_some());
    assert!(spoke_record.contract(ContractKind::LimitHook).is_some());

    let controller = hub_record.contract(ContractKind::Controller).unwrap();
    assert_eq!(
        deployer.args_for(HUB, hook).unwrap(),
        vec![controller.to_string(), "false".to_string()]
    );
    let vault = spoke_record.contract(ContractKind::Vault).unwrap();
    assert_eq!(
        deployer.args_for(SPOKE_A, hook).unwrap(),
        vec![vault.to_string(), "true".to_string()]
    );
}

#[tokio::test]
async fn test_failed_store_write_keeps_deployments_for_next_pass() {
    let temp_dir = TempDir::new("bridgeup-test").expect("Failed to create temp dir");
    // A regular file where the store directory should be.
    let outdata = temp_dir.path().join("outdata");
    std::fs::write(&outdata, "not a directory").unwrap();
    let store = Arc::new(AddressStore::open(outdata.join("addresses.json")));

    let deployer = Arc::new(StubDeployer::default());
    let driver = DeploymentDriver::new(project(&[SPOKE_A]), deployer.clone(), store.clone());

    let mut hub = params(&driver, HUB).await;
    let err = driver.run_once(&mut hub).await.unwrap_err();
    assert!(matches!(err, DriverError::Persist { chain: HUB, .. }));
    assert!(err.is_retryable());
    assert!(hub.addresses.contract(ContractKind::Controller).is_some());
    assert!(hub.addresses.contains(&connector(SPOKE_A)));
    let calls = deployer.call_count();

    std::fs::remove_file(&outdata).unwrap();
    let report = driver.run_once(&mut hub).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.deployed, 0);
    assert_eq!(deployer.call_count(), calls);

    let persisted = AddressStore::load(store.path()).record(HUB);
    assert_eq!(
        persisted.contract(ContractKind::Controller),
        hub.addresses.contract(ContractKind::Controller)
    );
    assert!(persisted.contains(&connector(SPOKE_A)));
}
